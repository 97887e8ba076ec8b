//! Single-case assessment, optionally with an interactive validator

use super::{build_orchestrator, load_graph, read_document, EngineArgs};
use crate::error::CliResult;
use crate::output::{self, OutputFormat};
use btrads_engine::{
    BroadcastNotifier, CaseOrchestrator, EngineConfig, GateMode, StatusEvent, ValidationDecision,
};
use btrads_types::{normalize_key, BtradsResult, ExtractedValue, PatientRecord, PendingValidation};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;

#[derive(Args, Debug)]
pub struct AssessArgs {
    /// Patient record (JSON or YAML)
    pub file: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Confirm each extracted value on stdin before it routes the case
    #[arg(long)]
    pub review: bool,

    /// With --review, only hold values below this confidence
    #[arg(long, requires = "review")]
    pub review_below: Option<f64>,

    /// Validator id recorded on reviewed values
    #[arg(long, default_value = "cli")]
    pub validator: String,
}

pub async fn execute(args: AssessArgs, config: EngineConfig, format: OutputFormat) -> CliResult<()> {
    let record: PatientRecord = read_document(&args.file)?;
    let graph = load_graph(args.engine.graph.as_deref())?;

    let result = if args.review {
        let notifier = Arc::new(BroadcastNotifier::default());
        let orchestrator = Arc::new(build_orchestrator(
            graph,
            args.engine.extractor,
            config,
            Some(notifier.clone()),
        )?);
        let mode = GateMode::ManualGate {
            review_below: args.review_below,
        };
        review(orchestrator, &notifier, record, mode, &args.validator).await?
    } else {
        let orchestrator = build_orchestrator(graph, args.engine.extractor, config, None)?;
        orchestrator.run_with_mode(&record, GateMode::AutoAccept).await
    };

    print_result(&result, format)
}

// ── Interactive review ───────────────────────────────────────────────

async fn review(
    orchestrator: Arc<CaseOrchestrator>,
    notifier: &BroadcastNotifier,
    record: PatientRecord,
    mode: GateMode,
    validator: &str,
) -> CliResult<BtradsResult> {
    let mut events = notifier.subscribe();
    let case = orchestrator.new_case(&record);
    let case_id = case.case_id.clone();
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let ground_truth = record.ground_truth;
        tokio::spawn(async move { orchestrator.drive(case, ground_truth, mode).await })
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match events.recv().await {
            Ok(StatusEvent::ValidationRequired { pending }) if pending.case_id == case_id => {
                answer(&orchestrator, &pending, &mut input, validator).await?;
            }
            Ok(StatusEvent::Completed { case_id: done, .. }) if done == case_id => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Status events dropped");
                if let Some(pending) = orchestrator.gate().pending(&case_id) {
                    answer(&orchestrator, &pending, &mut input, validator).await?;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    Ok(running.await?)
}

/// Prompt on stderr and resolve the pending request from one stdin line.
/// Requests that were already answered are skipped.
///
/// An empty line (or end of input) accepts the proposal, `abort` fails the
/// node, and anything else replaces the value.
async fn answer(
    orchestrator: &CaseOrchestrator,
    pending: &PendingValidation,
    input: &mut Lines<BufReader<Stdin>>,
    validator: &str,
) -> CliResult<()> {
    let gate = orchestrator.gate();
    let current = gate.pending(&pending.case_id);
    if current.map(|p| p.token) != Some(pending.token.clone()) {
        return Ok(());
    }

    let proposed = &pending.proposed;
    let options: Vec<String> = orchestrator
        .graph()
        .get(&pending.node_id)
        .map(|node| node.keys().map(str::to_string).collect())
        .unwrap_or_default();

    eprintln!();
    eprintln!("{} {}", "Review".bold().cyan(), pending.node_id.to_string().bold());
    eprintln!("  proposed:   {} ({:.2})", proposed.value.to_string().green(), proposed.confidence);
    if !proposed.reasoning.is_empty() {
        eprintln!("  reasoning:  {}", proposed.reasoning.dimmed());
    }
    if !options.is_empty() {
        eprintln!("  options:    {}", options.join(", "));
    }
    eprint!("  [enter] accept, a value to correct, or 'abort': ");

    let line = input.next_line().await?.unwrap_or_default();
    let line = line.trim();
    if line.is_empty() || normalize_key(line) == proposed.decision_key() {
        gate.approve(&pending.case_id, &pending.token, validator)?;
    } else if line.eq_ignore_ascii_case("abort") {
        gate.abort(&pending.case_id, &pending.token)?;
    } else {
        let decision = ValidationDecision::new(ExtractedValue::category(line), validator)
            .with_notes("corrected at the terminal");
        gate.resolve(&pending.case_id, &pending.token, decision)?;
    }
    Ok(())
}

// ── Rendering ────────────────────────────────────────────────────────

#[derive(Tabled, Serialize)]
struct PathRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

pub(crate) fn print_result(result: &BtradsResult, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return output::print_structured(result, format);
    }

    output::print_header("BT-RADS Assessment");
    output::print_field("Patient", &result.patient_id);
    output::print_field(
        "Score",
        format!("{} ({})", result.score.to_string().bold().green(), result.score.label()),
    );
    output::print_field("Status", result.status);
    output::print_field("Confidence", format!("{:.2}", result.confidence_score));
    if let Some(days) = result.days_since_radiation {
        output::print_field("Days since radiation", days);
    }
    if let Some(volume) = &result.volume_assessment {
        output::print_field("Volumes", volume);
    }
    if let Some(medication) = &result.medication_effects {
        output::print_field("Medications", medication);
    }
    if result.total_validations > 0 {
        output::print_field(
            "Validations",
            format!("{} ({} modified)", result.total_validations, result.modifications_made),
        );
    }
    if let Some(truth) = result.ground_truth {
        let verdict = if truth == result.score {
            "agrees".green()
        } else {
            "disagrees".red()
        };
        output::print_field("Ground truth", format!("{truth} ({verdict})"));
    }

    println!();
    let rows = result
        .path
        .iter()
        .map(|step| PathRow {
            node: step.node_id.to_string(),
            label: step.label.clone(),
            decision: step.decision.clone().unwrap_or_else(|| "-".into()),
            confidence: step
                .confidence
                .map_or_else(|| "-".into(), |c| format!("{c:.2}")),
        })
        .collect();
    output::print_rows(rows, OutputFormat::Table)?;

    if !result.reasoning.is_empty() {
        println!();
        println!("{}", "Reasoning".bold());
        for line in result.reasoning.split(" → ") {
            println!("  {line}");
        }
    }
    for annotation in &result.annotations {
        output::print_warning(&format!(
            "{}: {} ({})",
            annotation.node_id, annotation.info.reason, annotation.info.clinical_impact
        ));
    }
    for warning in &result.warnings {
        output::print_warning(warning);
    }
    Ok(())
}
