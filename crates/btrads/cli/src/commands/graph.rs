//! Decision graph inspection

use super::{load_graph, read_document};
use crate::error::CliResult;
use crate::output::{self, OutputFormat};
use btrads_types::{DecisionGraph, DecisionNode, GraphDefinition, NodeKind};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

/// Graph subcommands
#[derive(Subcommand, Debug)]
pub enum GraphCommands {
    /// List the nodes of a graph
    Show {
        /// Graph definition; defaults to BT-RADS
        #[arg(long)]
        graph: Option<PathBuf>,
    },

    /// Print a graph definition as JSON or YAML
    Export {
        /// Graph definition; defaults to BT-RADS
        #[arg(long)]
        graph: Option<PathBuf>,
    },

    /// Check a graph definition for structural errors
    Validate {
        /// Graph definition (JSON or YAML)
        file: PathBuf,
    },
}

pub fn execute(command: GraphCommands, format: OutputFormat) -> CliResult<()> {
    match command {
        GraphCommands::Show { graph } => show(&load_graph(graph.as_deref())?, format),
        GraphCommands::Export { graph } => {
            let graph = load_graph(graph.as_deref())?;
            let format = match format {
                OutputFormat::Table => OutputFormat::Json,
                other => other,
            };
            output::print_structured(graph.definition(), format)
        }
        GraphCommands::Validate { file } => {
            let definition: GraphDefinition = read_document(&file)?;
            let graph = definition.build()?;
            output::print_success(&format!(
                "{} is valid: {} nodes, {} terminals, depth {}",
                graph.name(),
                graph.node_count(),
                graph.terminals().count(),
                graph.depth()
            ));
            Ok(())
        }
    }
}

#[derive(Tabled, Serialize)]
struct NodeRow {
    #[tabled(rename = "Node")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Routes")]
    routes: String,
}

impl From<&DecisionNode> for NodeRow {
    fn from(node: &DecisionNode) -> Self {
        let kind = match node.kind {
            NodeKind::Extraction => "extraction",
            NodeKind::Decision => "decision",
            NodeKind::Terminal => "terminal",
        };
        let source = match (&node.extractor, node.rule, node.score) {
            (_, _, Some(score)) => score.to_string(),
            (Some(extractor), Some(rule), _) => format!("{extractor} + {rule}"),
            (Some(extractor), None, _) => extractor.to_string(),
            (None, Some(rule), _) => rule.to_string(),
            (None, None, _) => "-".into(),
        };
        let mut routes: Vec<String> = node
            .transitions
            .iter()
            .map(|(key, target)| format!("{key} → {target}"))
            .collect();
        if let Some(default) = &node.default_next {
            routes.push(format!("* → {default}"));
        }
        Self {
            id: node.id.to_string(),
            kind,
            label: node.label.clone(),
            source,
            routes: routes.join("\n"),
        }
    }
}

fn show(graph: &DecisionGraph, format: OutputFormat) -> CliResult<()> {
    let rows: Vec<NodeRow> = graph.nodes().map(NodeRow::from).collect();
    if format == OutputFormat::Table {
        output::print_header(&format!("Decision graph: {}", graph.name()));
        output::print_field("Entry", graph.entry());
        output::print_field("Nodes", graph.node_count());
        output::print_field("Depth", graph.depth());
        output::print_field("Max hops", graph.max_hops());
        println!();
    }
    output::print_rows(rows, format)
}
