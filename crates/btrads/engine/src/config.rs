//! Engine configuration

use btrads_rules::RULE_CONFIDENCE;
use btrads_types::DEFAULT_MAX_HOPS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub extraction: ExtractionConfig,
    pub rules: RuleConfig,
    pub validation: ValidationConfig,
    pub batch: BatchConfig,
    pub traversal: TraversalConfig,
}

/// Extractor call policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Attempts per node, including the first
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `retry_backoff_ms * 2^(n-1)`
    pub retry_backoff_ms: u64,
    /// Bound on a single extractor call
    pub timeout_ms: u64,
    /// Successful extractions below this get a MissingInfo note
    pub low_confidence_threshold: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 1000,
            timeout_ms: 120_000,
            low_confidence_threshold: 0.7,
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Quantitative rule override policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Prefer a decisive rule over the extractor value
    pub prefer_rules: bool,
    /// Confidence recorded for rule-decided nodes
    pub rule_confidence: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            prefer_rules: true,
            rule_confidence: RULE_CONFIDENCE,
        }
    }
}

/// How extraction nodes pass the validation gate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GateMode {
    /// Pass every result through unchanged
    #[default]
    AutoAccept,
    /// Hold results for a validator; with `review_below`, only results under that confidence
    ManualGate {
        #[serde(default)]
        review_below: Option<f64>,
    },
}

impl GateMode {
    pub fn manual() -> Self {
        GateMode::ManualGate { review_below: None }
    }

    /// Whether a result with this confidence must wait for a validator
    pub fn holds(&self, confidence: f64) -> bool {
        match self {
            GateMode::AutoAccept => false,
            GateMode::ManualGate { review_below: None } => true,
            GateMode::ManualGate {
                review_below: Some(threshold),
            } => confidence < *threshold,
        }
    }
}

/// Validation gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub mode: GateMode,
    /// Waiting longer than this aborts the node; `None` waits indefinitely
    pub timeout_secs: Option<u64>,
    /// Applied to confidence when a validator changes the value
    pub correction_confidence_factor: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: GateMode::AutoAccept,
            timeout_secs: None,
            correction_confidence_factor: 0.9,
        }
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Batch execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Cases run concurrently
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Traversal guard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub max_hops: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let cfg = ExtractionConfig {
            retry_backoff_ms: 100,
            ..Default::default()
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn manual_gate_threshold() {
        assert!(!GateMode::AutoAccept.holds(0.1));
        assert!(GateMode::manual().holds(0.99));
        let partial = GateMode::ManualGate {
            review_below: Some(0.8),
        };
        assert!(partial.holds(0.79));
        assert!(!partial.holds(0.8));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{ "extraction": { "max_attempts": 5 }, "validation": { "mode": { "mode": "manual_gate", "review_below": 0.8 } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.extraction.max_attempts, 5);
        assert_eq!(cfg.extraction.timeout_ms, 120_000);
        assert_eq!(cfg.rules.rule_confidence, RULE_CONFIDENCE);
        assert!(cfg.validation.mode.holds(0.5));
        assert_eq!(cfg.traversal.max_hops, 8);
    }
}
