//! CLI command implementations

pub mod assess;
pub mod batch;
pub mod graph;
pub mod rules;

use crate::error::{CliError, CliResult};
use btrads_engine::{
    reference_graph, CaseOrchestrator, EngineConfig, Extractor, ExtractorRegistry,
    KeywordExtractor, RuleExtractor, StatusNotifier, EXTRACTOR_REFS,
};
use btrads_types::{DecisionGraph, GraphDefinition};
use clap::ValueEnum;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Offline extractor backing every graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum ExtractorKind {
    /// Keyword cues in the clinical note
    #[default]
    Keyword,
    /// Quantitative rules only; nodes without a rule take their default
    Rules,
}

impl ExtractorKind {
    fn build(self) -> Arc<dyn Extractor> {
        match self {
            ExtractorKind::Keyword => Arc::new(KeywordExtractor::new()),
            ExtractorKind::Rules => Arc::new(RuleExtractor::new()),
        }
    }
}

/// Read a JSON or YAML document, chosen by file extension
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    if !path.exists() {
        return Err(CliError::NotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    if is_yaml {
        Ok(serde_yaml::from_str(&raw)?)
    } else {
        Ok(serde_json::from_str(&raw)?)
    }
}

/// The graph in `path`, or the reference BT-RADS graph
pub(crate) fn load_graph(path: Option<&Path>) -> CliResult<DecisionGraph> {
    match path {
        Some(path) => {
            let definition: GraphDefinition = read_document(path)?;
            Ok(definition.build()?)
        }
        None => Ok(reference_graph()?),
    }
}

/// Orchestrator over `graph` with one extractor registered for every reference
pub(crate) fn build_orchestrator(
    graph: DecisionGraph,
    kind: ExtractorKind,
    config: EngineConfig,
    notifier: Option<Arc<dyn StatusNotifier>>,
) -> CliResult<CaseOrchestrator> {
    let extractor = kind.build();
    let refs: Vec<String> = graph
        .extractor_refs()
        .map(|(_, r)| r.0.clone())
        .collect();
    let registry = ExtractorRegistry::new()
        .with_all(EXTRACTOR_REFS, extractor.clone())
        .with_all(refs.iter().map(String::as_str), extractor);

    let mut builder = CaseOrchestrator::builder(Arc::new(graph), registry).with_config(config);
    if let Some(notifier) = notifier {
        builder = builder.with_notifier(notifier);
    }
    Ok(builder.build()?)
}

/// Shared `--graph` / `--extractor` options
#[derive(clap::Args, Debug, Clone)]
pub struct EngineArgs {
    /// Decision graph definition (JSON or YAML); defaults to BT-RADS
    #[arg(long)]
    pub graph: Option<PathBuf>,

    /// Extractor used for every extraction node
    #[arg(long, value_enum, default_value = "keyword")]
    pub extractor: ExtractorKind,
}
