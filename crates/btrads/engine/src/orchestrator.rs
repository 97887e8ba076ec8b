//! Case Orchestrator: drives one patient case from entry to a score
//!
//! Per node the orchestrator:
//! 1. Calls the node's extractor (retried, time-bounded)
//! 2. Lets a decisive quantitative rule override the extracted value
//! 3. Passes the result through the validation gate
//! 4. Records the outcome on the case and follows the matching edge
//!
//! Every failure along the way degrades to an error-typed result and the
//! node's default edge, so each case ends on a terminal score.

use crate::config::{EngineConfig, GateMode};
use crate::extractor::{ExtractionRequest, ExtractorRegistry, ResolvedExtractors};
use crate::extractors::RuleExtractor;
use crate::notification::{NoopNotifier, StatusEvent, StatusNotifier};
use crate::persistence::{CaseEventSink, NullSink};
use crate::reference_graph::summarize_path;
use crate::validation_gate::ValidationGate;
use btrads_rules::{derive_score, RuleEngine, RuleVerdict};
use btrads_types::{
    BtradsError, BtradsResult, BtradsScore, CaseState, ClinicalContext, DecisionGraph,
    DecisionNode, EngineResult, ExtractedValue, ExtractionResult, ExtractorError, MissingInfo,
    NodeId, NodeKind, NodeRecord, PatientRecord,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Source label for results whose validation did not complete
const VALIDATION_SOURCE: &str = "validation_gate";

/// Outcome of a retried extractor call
struct Attempted {
    outcome: Result<ExtractionResult, ExtractorError>,
    source: String,
    attempts: u32,
    elapsed_ms: u64,
}

/// Drives cases through a shared decision graph
#[derive(Clone)]
pub struct CaseOrchestrator {
    graph: Arc<DecisionGraph>,
    extractors: ResolvedExtractors,
    rules: RuleEngine,
    gate: Arc<ValidationGate>,
    sink: Arc<dyn CaseEventSink>,
    notifier: Arc<dyn StatusNotifier>,
    config: EngineConfig,
}

impl CaseOrchestrator {
    pub fn builder(graph: Arc<DecisionGraph>, registry: ExtractorRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(graph, registry)
    }

    pub fn graph(&self) -> &Arc<DecisionGraph> {
        &self.graph
    }

    /// Gate shared by every case of this orchestrator
    pub fn gate(&self) -> &Arc<ValidationGate> {
        &self.gate
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A fresh case positioned at the graph entry
    pub fn new_case(&self, record: &PatientRecord) -> CaseState {
        CaseState::new(
            ClinicalContext::from_record(record),
            self.graph.entry().clone(),
        )
    }

    /// Classify one patient with the configured gate mode
    pub async fn run(&self, record: &PatientRecord) -> BtradsResult {
        self.run_with_mode(record, self.config.validation.mode).await
    }

    pub async fn run_with_mode(&self, record: &PatientRecord, mode: GateMode) -> BtradsResult {
        let case = self.new_case(record);
        self.drive(case, record.ground_truth, mode).await
    }

    /// Walk `case` to a terminal node.
    ///
    /// Callers that need the case id up front (to answer validations)
    /// build the case with [`new_case`](Self::new_case) and drive it here.
    pub async fn drive(
        &self,
        mut case: CaseState,
        ground_truth: Option<BtradsScore>,
        mode: GateMode,
    ) -> BtradsResult {
        case.start();
        tracing::info!(
            case_id = %case.case_id,
            patient = %case.patient_id,
            graph = %self.graph.name(),
            "Case started"
        );
        self.notifier.notify(StatusEvent::ProcessingStarted {
            case_id: case.case_id.clone(),
            patient_id: case.patient_id.clone(),
        });

        let hop_limit = self.hop_limit();
        loop {
            if case.hops > hop_limit {
                let err = BtradsError::HopLimitExceeded(hop_limit);
                return self.fail_case(case, err, ground_truth).await;
            }

            let node = match self.graph.get(&case.current_node) {
                Ok(node) => node,
                Err(err) => return self.fail_case(case, err, ground_truth).await,
            };

            let record = match node.kind {
                NodeKind::Terminal => return self.finish(case, node, ground_truth).await,
                NodeKind::Extraction => {
                    self.activate(&case, node);
                    self.extract_node(&mut case, node, mode).await
                }
                NodeKind::Decision => {
                    self.activate(&case, node);
                    self.decide_node(&case, node)
                }
            };

            if record.is_error() {
                self.notifier.notify(StatusEvent::NodeFailed {
                    case_id: case.case_id.clone(),
                    node_id: node.id.clone(),
                    error: record.extraction().error.clone().unwrap_or_default(),
                });
            }
            self.persist(&case, &node.id, &record).await;

            let key = case.record(node, record);
            let next = match self.graph.next(&node.id, &key) {
                Ok(next) => next.clone(),
                Err(err) => return self.fail_case(case, err, ground_truth).await,
            };
            tracing::debug!(
                case_id = %case.case_id,
                node = %node.id,
                key = %key,
                next = %next,
                "Transition"
            );
            case.advance(next);
        }
    }

    fn hop_limit(&self) -> usize {
        self.config.traversal.max_hops.min(self.graph.max_hops())
    }

    fn activate(&self, case: &CaseState, node: &DecisionNode) {
        tracing::debug!(case_id = %case.case_id, node = %node.id, "Node activated");
        self.notifier.notify(StatusEvent::NodeActivated {
            case_id: case.case_id.clone(),
            node_id: node.id.clone(),
            label: node.label.clone(),
        });
    }

    // ── Extraction Nodes ─────────────────────────────────────────────

    async fn extract_node(
        &self,
        case: &mut CaseState,
        node: &DecisionNode,
        mode: GateMode,
    ) -> NodeRecord {
        let verdict = self.decisive_verdict(case, node);
        let attempted = self.call_extractor(case, node).await;
        let (attempts, elapsed_ms) = (attempted.attempts, attempted.elapsed_ms);

        let result = match (attempted.outcome, verdict) {
            (Ok(extracted), Some(verdict)) => self.override_with_rule(case, node, extracted, verdict),
            (Ok(extracted), None) => self.annotate_low_confidence(extracted),
            // A failed extraction always takes the default edge, rule or not
            (Err(err), _) => {
                tracing::warn!(
                    case_id = %case.case_id,
                    node = %node.id,
                    attempts,
                    error = %err,
                    "Extraction failed, following default edge"
                );
                ExtractionResult::failed(node.id.clone(), attempted.source, &err)
            }
        };
        let result = result
            .with_attempts(attempts)
            .with_processing_time(elapsed_ms);

        if result.is_error() {
            return NodeRecord::Extracted(result);
        }
        self.notify_extracted(case, &result);

        if mode.holds(result.confidence) {
            self.validate(case, node, result).await
        } else {
            NodeRecord::Extracted(result)
        }
    }

    fn decisive_verdict(&self, case: &CaseState, node: &DecisionNode) -> Option<RuleVerdict> {
        if !self.config.rules.prefer_rules {
            return None;
        }
        let rule = node.rule?;
        self.rules
            .evaluate(rule, &case.context)
            .filter(|verdict| verdict.decisive)
    }

    async fn call_extractor(&self, case: &CaseState, node: &DecisionNode) -> Attempted {
        let started = Instant::now();
        let Some(extractor) = self.extractors.get(&node.id) else {
            return Attempted {
                outcome: Err(ExtractorError::Unsupported(node.id.clone())),
                source: String::new(),
                attempts: 0,
                elapsed_ms: 0,
            };
        };

        let cfg = &self.config.extraction;
        let max_attempts = cfg.max_attempts.max(1);
        let mut request = ExtractionRequest::new(case.case_id.clone(), node.clone(), case.context.clone())
            .with_prior_values(prior_values(case));
        let mut attempt = 1;

        loop {
            request.attempt = attempt;
            let outcome = match tokio::time::timeout(cfg.timeout(), extractor.extract(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ExtractorError::Timeout {
                    after_ms: cfg.timeout_ms,
                }),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = cfg.backoff(attempt);
                    tracing::debug!(
                        case_id = %case.case_id,
                        node = %node.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Extractor failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => {
                    return Attempted {
                        outcome: outcome.map(|mut result| {
                            result.node_id = node.id.clone();
                            result
                        }),
                        source: extractor.name().to_string(),
                        attempts: attempt,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                }
            }
        }
    }

    /// Take the rule's value, keeping the extractor's evidence
    fn override_with_rule(
        &self,
        case: &mut CaseState,
        node: &DecisionNode,
        extracted: ExtractionResult,
        verdict: RuleVerdict,
    ) -> ExtractionResult {
        let disagreement = (extracted.decision_key() != verdict.key).then(|| {
            format!(
                "extractor proposed {} ({:.2}), rule decided {}",
                extracted.value, extracted.confidence, verdict.key
            )
        });
        if let Some(note) = &disagreement {
            tracing::warn!(case_id = %case.case_id, node = %node.id, "Rule overrides extractor: {note}");
            case.warn(format!("{}: {note}", node.id));
        }

        let mut result = self.rule_result(node, verdict);
        if let Some(note) = disagreement {
            result.reasoning = format!("{} [{note}]", result.reasoning);
        }
        result.evidence = extracted.evidence;
        result
    }

    fn rule_result(&self, node: &DecisionNode, verdict: RuleVerdict) -> ExtractionResult {
        let (value, confidence) = if verdict.decisive {
            (ExtractedValue::category(&verdict.key), self.config.rules.rule_confidence)
        } else {
            (ExtractedValue::Unknown, 0.0)
        };
        ExtractionResult::new(
            node.id.clone(),
            value,
            confidence,
            verdict.reasoning,
            RuleExtractor::NAME,
        )
        .rule_based()
    }

    fn annotate_low_confidence(&self, result: ExtractionResult) -> ExtractionResult {
        let threshold = self.config.extraction.low_confidence_threshold;
        if result.confidence >= threshold {
            return result;
        }
        let info = MissingInfo::new(
            result.node_id.to_string(),
            format!("Low extraction confidence ({:.2} < {threshold:.2})", result.confidence),
            "Routing decision may be unreliable",
        )
        .with_fallback("Review the clinical note for this node");
        result.with_missing_info(info)
    }

    fn notify_extracted(&self, case: &CaseState, result: &ExtractionResult) {
        tracing::debug!(
            case_id = %case.case_id,
            node = %result.node_id,
            value = %result.value,
            confidence = result.confidence,
            rule_applied = result.rule_applied,
            "Extraction complete"
        );
        self.notifier.notify(StatusEvent::ExtractionComplete {
            case_id: case.case_id.clone(),
            node_id: result.node_id.clone(),
            value: result.decision_key(),
            confidence: result.confidence,
            rule_applied: result.rule_applied,
        });
    }

    async fn validate(
        &self,
        case: &mut CaseState,
        node: &DecisionNode,
        result: ExtractionResult,
    ) -> NodeRecord {
        let ticket = match self.gate.request(&case.case_id, &case.patient_id, result.clone()) {
            Ok(ticket) => ticket,
            Err(err) => {
                tracing::warn!(case_id = %case.case_id, node = %node.id, error = %err, "Validation request refused");
                case.warn(format!("{}: {err}", node.id));
                return NodeRecord::Extracted(result);
            }
        };

        tracing::info!(
            case_id = %case.case_id,
            node = %node.id,
            token = %ticket.token(),
            "Awaiting validation"
        );
        case.await_validation(ticket.pending.clone());
        self.notifier.notify(StatusEvent::ValidationRequired {
            pending: ticket.pending.clone(),
        });

        let validation = &self.config.validation;
        let outcome = self
            .gate
            .wait(ticket, validation.timeout(), validation.correction_confidence_factor)
            .await;
        case.clear_pending();

        match outcome {
            Ok(validated) => {
                self.notifier.notify(StatusEvent::ValidationComplete {
                    case_id: case.case_id.clone(),
                    node_id: node.id.clone(),
                    modified: validated.is_modified(),
                });
                NodeRecord::Validated(validated)
            }
            Err(err) => {
                tracing::warn!(case_id = %case.case_id, node = %node.id, error = %err, "Validation did not complete");
                NodeRecord::Extracted(ExtractionResult::failed(node.id.clone(), VALIDATION_SOURCE, &err))
            }
        }
    }

    // ── Decision Nodes ───────────────────────────────────────────────

    fn decide_node(&self, case: &CaseState, node: &DecisionNode) -> NodeRecord {
        let result = match node.rule {
            Some(rule) => match self.rules.evaluate(rule, &case.context) {
                Some(verdict) => self.rule_result(node, verdict),
                None => ExtractionResult::failed(
                    node.id.clone(),
                    RuleExtractor::NAME,
                    ExtractorError::InsufficientData(format!("no quantitative data for {rule}")),
                ),
            },
            None => ExtractionResult::failed(
                node.id.clone(),
                RuleExtractor::NAME,
                BtradsError::MissingRule(node.id.clone()),
            ),
        };
        if !result.is_error() {
            self.notify_extracted(case, &result);
        }
        NodeRecord::Extracted(result)
    }

    // ── Completion ───────────────────────────────────────────────────

    async fn persist(&self, case: &CaseState, node_id: &NodeId, record: &NodeRecord) {
        if let Err(err) = self
            .sink
            .record_node(&case.case_id, node_id, record, Utc::now())
            .await
        {
            tracing::warn!(case_id = %case.case_id, node = %node_id, error = %err, "Failed to persist node event");
        }
    }

    async fn finish(
        &self,
        mut case: CaseState,
        terminal: &DecisionNode,
        ground_truth: Option<BtradsScore>,
    ) -> BtradsResult {
        case.arrive(terminal);
        case.complete();
        let score = terminal.score.unwrap_or(BtradsScore::FALLBACK);
        self.conclude(case, terminal.id.clone(), score, ground_truth).await
    }

    async fn fail_case(
        &self,
        mut case: CaseState,
        err: BtradsError,
        ground_truth: Option<BtradsScore>,
    ) -> BtradsResult {
        tracing::warn!(case_id = %case.case_id, node = %case.current_node, error = %err, "Case failed");
        case.fail(err.to_string());
        let terminal = self
            .graph
            .terminals()
            .find(|n| n.score == Some(BtradsScore::FALLBACK))
            .map_or_else(|| case.current_node.clone(), |n| n.id.clone());
        self.conclude(case, terminal, BtradsScore::FALLBACK, ground_truth)
            .await
    }

    async fn conclude(
        &self,
        mut case: CaseState,
        terminal_node: NodeId,
        score: BtradsScore,
        ground_truth: Option<BtradsScore>,
    ) -> BtradsResult {
        let summary = summarize_path(&self.graph, &case);
        let derived = summary.score_inputs.as_ref().map(derive_score);
        if let Some((derived_score, reasoning)) = &derived {
            if *derived_score != score {
                tracing::warn!(
                    case_id = %case.case_id,
                    graph_score = %score,
                    table_score = %derived_score,
                    "Score table disagrees with graph"
                );
                case.warn(format!(
                    "Score table gives {derived_score} ({reasoning}), graph reached {score}"
                ));
            }
        }

        let completed_at = Utc::now();
        let result = BtradsResult {
            case_id: case.case_id.clone(),
            patient_id: case.patient_id.clone(),
            score,
            terminal_node,
            status: case.status,
            reasoning: case.joined_reasoning(),
            confidence_score: case.mean_confidence(),
            volume_assessment: summary.volume_assessment,
            medication_effects: summary.medication_effects,
            days_since_radiation: case.context.days_since_radiation,
            total_validations: case.total_validations(),
            modifications_made: case.modifications_made(),
            annotations: case.annotations(),
            derived_score: derived.map(|(s, _)| s),
            ground_truth,
            started_at: case.started_at,
            completed_at,
            processing_duration_ms: (completed_at - case.started_at).num_milliseconds(),
            path: case.visited_path,
            warnings: case.warnings,
        };

        if let Err(err) = self.sink.record_result(&result).await {
            tracing::warn!(case_id = %result.case_id, error = %err, "Failed to persist result");
        }
        self.notifier.notify(StatusEvent::Completed {
            case_id: result.case_id.clone(),
            score: result.score,
            confidence: result.confidence_score,
        });
        tracing::info!(
            case_id = %result.case_id,
            patient = %result.patient_id,
            score = %result.score,
            status = %result.status,
            confidence = result.confidence_score,
            "Case finished"
        );
        result
    }
}

impl std::fmt::Debug for CaseOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseOrchestrator")
            .field("graph", &self.graph.name())
            .field("extractors", &self.extractors)
            .field("gate", &self.gate)
            .field("config", &self.config)
            .finish()
    }
}

/// Values decided so far, for extractors that condition on them
fn prior_values(case: &CaseState) -> BTreeMap<NodeId, ExtractedValue> {
    case.visited_path
        .iter()
        .filter_map(|step| {
            case.result(&step.node_id)
                .map(|record| (step.node_id.clone(), record.value().clone()))
        })
        .collect()
}

// ── Builder ──────────────────────────────────────────────────────────

/// Collects collaborators; extractors are resolved against the graph on `build`
pub struct OrchestratorBuilder {
    graph: Arc<DecisionGraph>,
    registry: ExtractorRegistry,
    config: EngineConfig,
    gate: Option<Arc<ValidationGate>>,
    sink: Option<Arc<dyn CaseEventSink>>,
    notifier: Option<Arc<dyn StatusNotifier>>,
}

impl OrchestratorBuilder {
    pub fn new(graph: Arc<DecisionGraph>, registry: ExtractorRegistry) -> Self {
        Self {
            graph,
            registry,
            config: EngineConfig::default(),
            gate: None,
            sink: None,
            notifier: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_gate(mut self, gate: Arc<ValidationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn CaseEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Fails when an extraction node has no registered extractor
    pub fn build(self) -> EngineResult<CaseOrchestrator> {
        let extractors = self.registry.resolve(&self.graph)?;
        tracing::info!(
            graph = %self.graph.name(),
            nodes = self.graph.node_count(),
            extractors = extractors.len(),
            "Orchestrator ready"
        );
        Ok(CaseOrchestrator {
            graph: self.graph,
            extractors,
            rules: RuleEngine::new(),
            gate: self.gate.unwrap_or_default(),
            sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            config: self.config,
        })
    }
}
