//! Batch scoring of a file of patient records

use super::{build_orchestrator, load_graph, read_document, EngineArgs};
use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};
use btrads_engine::{BatchReport, BatchRunner, EngineConfig, GateMode};
use btrads_types::PatientRecord;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Patient records: a JSON or YAML array
    pub file: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Cases run concurrently (overrides the configuration)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Also write the full report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

pub async fn execute(args: BatchArgs, mut config: EngineConfig, format: OutputFormat) -> CliResult<()> {
    let records: Vec<PatientRecord> = read_document(&args.file)?;
    if let Some(0) = args.concurrency {
        return Err(CliError::InvalidArgument("--concurrency must be at least 1".into()));
    }

    // Nobody is there to answer a validation in batch mode
    if config.validation.mode != GateMode::AutoAccept {
        tracing::warn!("Batch runs ignore manual validation");
        config.validation.mode = GateMode::AutoAccept;
    }

    let graph = load_graph(args.engine.graph.as_deref())?;
    let orchestrator = build_orchestrator(graph, args.engine.extractor, config, None)?;
    let mut runner = BatchRunner::new(Arc::new(orchestrator));
    if let Some(concurrency) = args.concurrency {
        runner = runner.with_concurrency(concurrency);
    }

    let report = runner.run(records).await;
    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }
    print_report(&report, format)
}

#[derive(Tabled, Serialize)]
struct CaseRow {
    #[tabled(rename = "Patient")]
    patient: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Truth")]
    truth: String,
    #[tabled(rename = "Notes")]
    notes: usize,
}

fn print_report(report: &BatchReport, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return output::print_structured(report, format);
    }

    let rows = report
        .results
        .iter()
        .map(|r| CaseRow {
            patient: r.patient_id.clone(),
            score: r.score.to_string(),
            status: r.status.to_string(),
            confidence: format!("{:.2}", r.confidence_score),
            truth: match (r.ground_truth, r.matches_ground_truth()) {
                (Some(truth), Some(true)) => format!("{truth} ✓"),
                (Some(truth), _) => format!("{truth} ✗"),
                (None, _) => "-".into(),
            },
            notes: r.annotations.len() + r.warnings.len(),
        })
        .collect();
    output::print_rows(rows, OutputFormat::Table)?;

    let summary = &report.summary;
    println!();
    output::print_header("Batch Summary");
    output::print_field("Cases", summary.total);
    output::print_field("Completed", summary.completed);
    output::print_field("Failed", summary.failed);
    output::print_field("Degraded", summary.degraded);
    if summary.lost > 0 {
        output::print_warning(&format!("{} case(s) produced no result", summary.lost));
    }
    output::print_field("Mean confidence", format!("{:.2}", summary.mean_confidence));
    let distribution: Vec<String> = summary
        .score_distribution
        .iter()
        .map(|(code, count)| format!("BT-{code}: {count}"))
        .collect();
    output::print_field("Scores", distribution.join(", "));
    if let Some(accuracy) = summary.accuracy {
        output::print_field(
            "Accuracy",
            format!(
                "{:.1}% ({}/{})",
                accuracy * 100.0,
                summary.agreements,
                summary.with_ground_truth
            ),
        );
    }
    output::print_field("Duration (ms)", summary.duration_ms);
    Ok(())
}
