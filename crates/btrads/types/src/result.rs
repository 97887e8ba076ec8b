//! The final, immutable record of a classified case

use crate::{BtradsScore, CaseId, CaseStatus, NodeAnnotation, NodeId, VisitedStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one case, produced exactly once
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BtradsResult {
    pub case_id: CaseId,
    pub patient_id: String,
    pub score: BtradsScore,
    pub terminal_node: NodeId,
    pub status: CaseStatus,
    /// Per-node reasoning joined with " → "
    pub reasoning: String,
    pub path: Vec<VisitedStep>,
    /// Mean of the per-node confidences
    pub confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_assessment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medication_effects: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_since_radiation: Option<i64>,
    pub total_validations: usize,
    pub modifications_made: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<NodeAnnotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Score recomputed from the score table, for cross-checking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_score: Option<BtradsScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<BtradsScore>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub processing_duration_ms: i64,
}

impl BtradsResult {
    /// Agreement with the supplied ground truth, if any
    pub fn matches_ground_truth(&self) -> Option<bool> {
        self.ground_truth.map(|truth| truth == self.score)
    }

    /// Some node was decided by fallback rather than by a value
    pub fn is_degraded(&self) -> bool {
        !self.annotations.is_empty() || self.status == CaseStatus::Failed
    }

    /// Routing keys along the path, terminal excluded
    pub fn decisions(&self) -> Vec<(&NodeId, &str)> {
        self.path
            .iter()
            .filter_map(|s| s.decision.as_deref().map(|d| (&s.node_id, d)))
            .collect()
    }
}
