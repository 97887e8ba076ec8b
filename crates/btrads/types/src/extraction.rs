//! Extraction results and their validated successors

use crate::{normalize_key, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key used when a node has no usable value
pub const UNKNOWN_KEY: &str = "unknown";

// ── Medication Status ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteroidStatus {
    None,
    Stable,
    Increasing,
    Decreasing,
    Started,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvastinStatus {
    None,
    Ongoing,
    FirstTreatment,
    Started,
    Unknown,
}

/// Structured medication finding
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MedicationStatus {
    pub steroid_status: SteroidStatus,
    pub avastin_status: AvastinStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MedicationStatus {
    pub fn new(steroid_status: SteroidStatus, avastin_status: AvastinStatus) -> Self {
        Self {
            steroid_status,
            avastin_status,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Routing key: avastin takes precedence over steroids
    pub fn decision_key(&self) -> &'static str {
        match (self.avastin_status, self.steroid_status) {
            (AvastinStatus::Ongoing | AvastinStatus::FirstTreatment | AvastinStatus::Started, _) => {
                "avastin"
            }
            (_, SteroidStatus::Increasing | SteroidStatus::Started) => "increasing_steroids",
            (
                AvastinStatus::None,
                SteroidStatus::None | SteroidStatus::Stable | SteroidStatus::Decreasing,
            ) => "neither",
            _ => UNKNOWN_KEY,
        }
    }
}

// ── Extracted Value ──────────────────────────────────────────────────

/// Value produced for a node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ExtractedValue {
    Flag(bool),
    Category(String),
    Medication(MedicationStatus),
    /// No usable value
    Unknown,
}

impl ExtractedValue {
    pub fn category(value: impl AsRef<str>) -> Self {
        ExtractedValue::Category(normalize_key(value.as_ref()))
    }

    /// Transition key this value routes on
    pub fn decision_key(&self) -> String {
        match self {
            ExtractedValue::Flag(true) => "yes".into(),
            ExtractedValue::Flag(false) => "no".into(),
            ExtractedValue::Category(c) => normalize_key(c),
            ExtractedValue::Medication(m) => m.decision_key().into(),
            ExtractedValue::Unknown => UNKNOWN_KEY.into(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.decision_key() == UNKNOWN_KEY
    }
}

impl std::fmt::Display for ExtractedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractedValue::Medication(m) => write!(
                f,
                "steroids {:?}, avastin {:?}",
                m.steroid_status, m.avastin_status
            ),
            other => f.write_str(&other.decision_key()),
        }
    }
}

// ── Evidence & Annotations ───────────────────────────────────────────

/// A supporting span of the clinical note
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

impl Evidence {
    pub fn new(text: impl Into<String>, start: usize, end: usize, confidence: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            confidence: clamp_unit(confidence),
        }
    }
}

/// Note that a node was decided with incomplete information
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissingInfo {
    pub field: String,
    pub reason: String,
    pub clinical_impact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fallback: Option<String>,
}

impl MissingInfo {
    pub fn new(
        field: impl Into<String>,
        reason: impl Into<String>,
        clinical_impact: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
            clinical_impact: clinical_impact.into(),
            suggested_fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.suggested_fallback = Some(fallback.into());
        self
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ── Extraction Result ────────────────────────────────────────────────

/// Output of one extractor call (or of its failure)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub node_id: NodeId,
    pub value: ExtractedValue,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    pub source_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_info: Vec<MissingInfo>,
    /// Set when a quantitative rule produced the value
    #[serde(default)]
    pub rule_applied: bool,
    /// Set when the extractor failed and this is a placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub processing_time_ms: u64,
    pub produced_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn new(
        node_id: NodeId,
        value: ExtractedValue,
        confidence: f64,
        reasoning: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            value,
            reasoning: reasoning.into(),
            confidence: clamp_unit(confidence),
            evidence: Vec::new(),
            source_label: source_label.into(),
            missing_info: Vec::new(),
            rule_applied: false,
            error: None,
            attempts: 1,
            processing_time_ms: 0,
            produced_at: Utc::now(),
        }
    }

    /// Placeholder for a node whose extraction could not be completed
    pub fn failed(
        node_id: NodeId,
        source_label: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        let field = node_id.to_string();
        let mut result = Self::new(
            node_id,
            ExtractedValue::Unknown,
            0.0,
            format!("Extraction failed: {error}"),
            source_label,
        );
        result.error = Some(error.to_string());
        result.missing_info.push(
            MissingInfo::new(field, error.to_string(), "Cannot proceed with this BT-RADS node")
                .with_fallback("Manual review required"),
        );
        result
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn with_missing_info(mut self, info: MissingInfo) -> Self {
        self.missing_info.push(info);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_processing_time(mut self, millis: u64) -> Self {
        self.processing_time_ms = millis;
        self
    }

    /// Mark the value as produced by a quantitative rule
    pub fn rule_based(mut self) -> Self {
        self.rule_applied = true;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn decision_key(&self) -> String {
        self.value.decision_key()
    }
}

// ── Validation ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Validator accepted the proposed value
    Approved,
    /// Validator replaced the proposed value
    Modified,
}

/// An extraction result after the validation gate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatedResult {
    pub proposed: ExtractionResult,
    pub validated_value: ExtractedValue,
    pub status: ValidationStatus,
    pub validator_id: String,
    pub validated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Confidence after validation
    pub confidence: f64,
}

impl ValidatedResult {
    /// Build from a validator decision.
    ///
    /// A value whose key differs from the proposal counts as a modification
    /// and has its confidence scaled by `correction_factor`.
    pub fn new(
        proposed: ExtractionResult,
        validated_value: ExtractedValue,
        validator_id: impl Into<String>,
        notes: Option<String>,
        correction_factor: f64,
    ) -> Self {
        let modified = validated_value.decision_key() != proposed.decision_key();
        let confidence = if modified {
            clamp_unit(proposed.confidence * correction_factor)
        } else {
            proposed.confidence
        };
        Self {
            proposed,
            validated_value,
            status: if modified {
                ValidationStatus::Modified
            } else {
                ValidationStatus::Approved
            },
            validator_id: validator_id.into(),
            validated_at: Utc::now(),
            notes,
            confidence,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.status == ValidationStatus::Modified
    }
}

/// What a case recorded for a node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum NodeRecord {
    Extracted(ExtractionResult),
    Validated(ValidatedResult),
}

impl NodeRecord {
    pub fn value(&self) -> &ExtractedValue {
        match self {
            NodeRecord::Extracted(r) => &r.value,
            NodeRecord::Validated(v) => &v.validated_value,
        }
    }

    pub fn decision_key(&self) -> String {
        self.value().decision_key()
    }

    pub fn confidence(&self) -> f64 {
        match self {
            NodeRecord::Extracted(r) => r.confidence,
            NodeRecord::Validated(v) => v.confidence,
        }
    }

    /// The underlying extraction
    pub fn extraction(&self) -> &ExtractionResult {
        match self {
            NodeRecord::Extracted(r) => r,
            NodeRecord::Validated(v) => &v.proposed,
        }
    }

    pub fn reasoning(&self) -> String {
        match self {
            NodeRecord::Extracted(r) => r.reasoning.clone(),
            NodeRecord::Validated(v) => match (&v.status, &v.notes) {
                (ValidationStatus::Modified, Some(notes)) => format!(
                    "{} (validator set {}: {})",
                    v.proposed.reasoning, v.validated_value, notes
                ),
                (ValidationStatus::Modified, None) => format!(
                    "{} (validator set {})",
                    v.proposed.reasoning, v.validated_value
                ),
                _ => v.proposed.reasoning.clone(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, NodeRecord::Extracted(r) if r.is_error())
    }

    pub fn is_validated(&self) -> bool {
        matches!(self, NodeRecord::Validated(_))
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, NodeRecord::Validated(v) if v.is_modified())
    }
}
