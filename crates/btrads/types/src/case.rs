//! Case state: one patient's traversal of the decision graph
//!
//! The orchestrator owns a `CaseState` for the lifetime of a case and is
//! the only code that mutates it. Everything recorded here is what the
//! final result and the persistence events are built from.

use crate::{ClinicalContext, DecisionNode, ExtractionResult, MissingInfo, NodeId, NodeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a case
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseId(pub String);

impl CaseId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// First eight characters, for log lines
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one pending validation request
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationToken(pub String);

impl ValidationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// `{patient}_{node}_{millis}_{nonce}`
    pub fn generate(patient_id: &str, node_id: &NodeId) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_{}_{}_{}",
            patient_id,
            node_id,
            Utc::now().timestamp_millis(),
            &nonce[..8]
        ))
    }
}

impl std::fmt::Display for ValidationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Created,
    Running,
    AwaitingValidation,
    Completed,
    Failed,
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Completed | CaseStatus::Failed)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaseStatus::Created => "created",
            CaseStatus::Running => "running",
            CaseStatus::AwaitingValidation => "awaiting_validation",
            CaseStatus::Completed => "completed",
            CaseStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Path ─────────────────────────────────────────────────────────────

/// One step of the visited path
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisitedStep {
    pub node_id: NodeId,
    pub label: String,
    /// Routing key chosen at this node; `None` on the terminal step
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub at: DateTime<Utc>,
}

/// An open request on the validation gate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingValidation {
    pub token: ValidationToken,
    pub case_id: CaseId,
    pub node_id: NodeId,
    pub proposed: ExtractionResult,
    pub requested_at: DateTime<Utc>,
}

/// A MissingInfo note tagged with the node it came from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeAnnotation {
    pub node_id: NodeId,
    pub info: MissingInfo,
}

// ── Case State ───────────────────────────────────────────────────────

/// Mutable record of one case
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseState {
    pub case_id: CaseId,
    pub patient_id: String,
    pub context: ClinicalContext,
    pub status: CaseStatus,
    pub current_node: NodeId,
    pub visited_path: Vec<VisitedStep>,
    pub results: HashMap<NodeId, NodeRecord>,
    pub confidence_trace: Vec<f64>,
    /// Per-node reasoning in visit order
    pub reasoning: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_validation: Option<PendingValidation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub hops: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseState {
    pub fn new(context: ClinicalContext, entry: NodeId) -> Self {
        let now = Utc::now();
        Self {
            case_id: CaseId::generate(),
            patient_id: context.patient_id.clone(),
            context,
            status: CaseStatus::Created,
            current_node: entry,
            visited_path: Vec::new(),
            results: HashMap::new(),
            confidence_trace: Vec::new(),
            reasoning: Vec::new(),
            pending_validation: None,
            warnings: Vec::new(),
            hops: 0,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn with_case_id(mut self, case_id: CaseId) -> Self {
        self.case_id = case_id;
        self
    }

    pub fn start(&mut self) {
        self.status = CaseStatus::Running;
        self.touch();
    }

    /// Record the outcome at a non-terminal node; returns the routing key
    pub fn record(&mut self, node: &DecisionNode, record: NodeRecord) -> String {
        let key = record.decision_key();
        let confidence = record.confidence();
        self.visited_path.push(VisitedStep {
            node_id: node.id.clone(),
            label: node.label.clone(),
            decision: Some(key.clone()),
            confidence: Some(confidence),
            at: Utc::now(),
        });
        self.confidence_trace.push(confidence);
        self.reasoning.push(record.reasoning());
        self.results.insert(node.id.clone(), record);
        self.touch();
        key
    }

    /// Move to the next node
    pub fn advance(&mut self, next: NodeId) {
        self.current_node = next;
        self.hops += 1;
        self.touch();
    }

    /// Append the terminal step to the path
    pub fn arrive(&mut self, terminal: &DecisionNode) {
        self.visited_path.push(VisitedStep {
            node_id: terminal.id.clone(),
            label: terminal.label.clone(),
            decision: None,
            confidence: None,
            at: Utc::now(),
        });
        self.touch();
    }

    pub fn await_validation(&mut self, pending: PendingValidation) {
        self.pending_validation = Some(pending);
        self.status = CaseStatus::AwaitingValidation;
        self.touch();
    }

    pub fn clear_pending(&mut self) {
        self.pending_validation = None;
        if self.status == CaseStatus::AwaitingValidation {
            self.status = CaseStatus::Running;
        }
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = CaseStatus::Completed;
        self.touch();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = CaseStatus::Failed;
        self.warnings.push(reason.into());
        self.touch();
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn result(&self, node_id: &NodeId) -> Option<&NodeRecord> {
        self.results.get(node_id)
    }

    /// Mean of the confidence trace; 0 when no node was decided
    pub fn mean_confidence(&self) -> f64 {
        if self.confidence_trace.is_empty() {
            0.0
        } else {
            self.confidence_trace.iter().sum::<f64>() / self.confidence_trace.len() as f64
        }
    }

    pub fn joined_reasoning(&self) -> String {
        self.reasoning.join(" → ")
    }

    pub fn total_validations(&self) -> usize {
        self.results.values().filter(|r| r.is_validated()).count()
    }

    pub fn modifications_made(&self) -> usize {
        self.results.values().filter(|r| r.is_modified()).count()
    }

    /// MissingInfo notes in visit order
    pub fn annotations(&self) -> Vec<NodeAnnotation> {
        self.visited_path
            .iter()
            .filter_map(|step| self.results.get(&step.node_id))
            .flat_map(|record| {
                let extraction = record.extraction();
                extraction.missing_info.iter().map(move |info| NodeAnnotation {
                    node_id: extraction.node_id.clone(),
                    info: info.clone(),
                })
            })
            .collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BtradsScore, ExtractedValue, ExtractorError, PatientRecord};

    fn state() -> CaseState {
        let ctx = ClinicalContext::from_record(&PatientRecord::new("p1"));
        CaseState::new(ctx, NodeId::new("a"))
    }

    #[test]
    fn short_id_respects_char_boundaries() {
        assert_eq!(CaseId::new("abcdefghijk").short(), "abcdefgh");
        assert_eq!(CaseId::new("abc").short(), "abc");
        assert_eq!(CaseId::new("pé-ü-ø-ñ-x").short(), "pé-ü-ø-ñ");
    }

    #[test]
    fn records_path_and_trace() {
        let mut case = state();
        case.start();
        let node = DecisionNode::extraction("a", "A", "x").otherwise("end");
        let result = ExtractionResult::new(
            NodeId::new("a"),
            ExtractedValue::Flag(true),
            0.8,
            "prior available",
            "test",
        );
        let key = case.record(&node, NodeRecord::Extracted(result));
        assert_eq!(key, "yes");
        case.advance(NodeId::new("end"));
        case.arrive(&DecisionNode::terminal("end", BtradsScore::Bt2));

        assert_eq!(case.visited_path.len(), 2);
        assert_eq!(case.visited_path[1].decision, None);
        assert_eq!(case.hops, 1);
        assert_eq!(case.mean_confidence(), 0.8);
        assert_eq!(case.joined_reasoning(), "prior available");
    }

    #[test]
    fn empty_trace_has_zero_confidence() {
        assert_eq!(state().mean_confidence(), 0.0);
    }

    #[test]
    fn annotations_follow_visit_order() {
        let mut case = state();
        for id in ["a", "b"] {
            let node = DecisionNode::extraction(id, id, "x").otherwise("end");
            let failed = ExtractionResult::failed(
                NodeId::new(id),
                "x",
                &ExtractorError::Unavailable("down".into()),
            );
            case.record(&node, NodeRecord::Extracted(failed));
        }
        let notes = case.annotations();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].node_id, NodeId::new("a"));
        assert_eq!(notes[1].node_id, NodeId::new("b"));
    }

    #[test]
    fn token_embeds_patient_and_node() {
        let token = ValidationToken::generate("p1", &NodeId::new("node_2"));
        assert!(token.0.starts_with("p1_node_2_"));
    }
}
