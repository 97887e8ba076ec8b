//! Batch runner: many independent cases on one orchestrator
//!
//! Cases share only the read-only graph and the validation gate. At most
//! `concurrency` cases are in flight; results come back in input order.

use crate::config::GateMode;
use crate::orchestrator::CaseOrchestrator;
use btrads_types::{BtradsResult, CaseStatus, PatientRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Aggregate view over a set of results
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Cases with at least one annotated node
    pub degraded: usize,
    /// Cases whose task died before producing a result
    pub lost: usize,
    pub mean_confidence: f64,
    /// Case count by score code
    pub score_distribution: BTreeMap<String, usize>,
    pub with_ground_truth: usize,
    pub agreements: usize,
    /// `agreements / with_ground_truth`, absent without ground truth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub total_validations: usize,
    pub modifications_made: usize,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn from_results(results: &[BtradsResult]) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                CaseStatus::Failed => summary.failed += 1,
                _ => summary.completed += 1,
            }
            if result.is_degraded() {
                summary.degraded += 1;
            }
            *summary
                .score_distribution
                .entry(result.score.code().to_string())
                .or_insert(0) += 1;
            if let Some(agrees) = result.matches_ground_truth() {
                summary.with_ground_truth += 1;
                if agrees {
                    summary.agreements += 1;
                }
            }
            summary.total_validations += result.total_validations;
            summary.modifications_made += result.modifications_made;
        }
        if !results.is_empty() {
            summary.mean_confidence =
                results.iter().map(|r| r.confidence_score).sum::<f64>() / results.len() as f64;
        }
        if summary.with_ground_truth > 0 {
            summary.accuracy = Some(summary.agreements as f64 / summary.with_ground_truth as f64);
        }
        summary
    }
}

/// Results of one batch, in input order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<BtradsResult>,
    pub summary: BatchSummary,
}

/// Runs patient records concurrently with a bounded limit
#[derive(Clone, Debug)]
pub struct BatchRunner {
    orchestrator: Arc<CaseOrchestrator>,
    concurrency: usize,
}

impl BatchRunner {
    /// Concurrency comes from the orchestrator's config
    pub fn new(orchestrator: Arc<CaseOrchestrator>) -> Self {
        let concurrency = orchestrator.config().batch.concurrency;
        Self {
            orchestrator,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Nobody answers validation requests in a batch, so every case runs
    /// with the gate in `AutoAccept` whatever the configured mode
    pub async fn run(&self, records: Vec<PatientRecord>) -> BatchReport {
        let started = Instant::now();
        let total = records.len();
        tracing::info!(cases = total, concurrency = self.concurrency, "Batch started");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, record) in records.into_iter().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                (index, orchestrator.run_with_mode(&record, GateMode::AutoAccept).await)
            });
        }

        let mut slots: Vec<Option<BtradsResult>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => tracing::error!(error = %err, "Batch case task failed"),
            }
        }

        let results: Vec<BtradsResult> = slots.into_iter().flatten().collect();
        let mut summary = BatchSummary::from_results(&results);
        summary.lost = total - results.len();
        summary.total = total;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            cases = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            mean_confidence = summary.mean_confidence,
            duration_ms = summary.duration_ms,
            "Batch finished"
        );
        BatchReport { results, summary }
    }
}
