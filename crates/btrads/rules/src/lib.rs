//! BT-RADS Rule Engine
//!
//! Pure, deterministic clinical rules over quantitative imaging data. Every
//! function returns a category together with a one-line justification that
//! reproduces the numbers it was computed from.
//!
//! `RuleEngine::evaluate` binds the rules to decision-graph transition keys
//! so the orchestrator can prefer a rule over a noisy extraction.

#![deny(unsafe_code)]

mod direction;
mod scoring;
mod timing;
mod worsening;

pub use direction::*;
pub use scoring::*;
pub use timing::*;
pub use worsening::*;

use btrads_types::{ClinicalContext, RuleKind, UNKNOWN_KEY};
use serde::{Deserialize, Serialize};

/// Changes within ±10% are stable
pub const STABLE_PCT_BAND: f64 = 10.0;

/// Absolute changes below 1 mL are not clinically significant
pub const MIN_SIGNIFICANT_ABS_CHANGE_ML: f64 = 1.0;

/// Inclusive threshold for a major increase
pub const MAJOR_EXTENT_PCT: f64 = 40.0;

/// Follow-ups within this many days of radiation favor treatment effect
pub const RADIATION_WINDOW_DAYS: i64 = 90;

/// Confidence assigned to a decisive rule outcome
pub const RULE_CONFIDENCE: f64 = 0.95;

/// Outcome of applying one rule to a case's context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub rule: RuleKind,
    /// Transition key, "unknown" when the rule could not decide
    pub key: String,
    pub reasoning: String,
    /// The key names a real transition
    pub decisive: bool,
}

impl RuleVerdict {
    fn decisive(rule: RuleKind, key: &str, reasoning: String) -> Self {
        Self {
            rule,
            key: key.to_string(),
            reasoning,
            decisive: true,
        }
    }

    fn indecisive(rule: RuleKind, reasoning: String) -> Self {
        Self {
            rule,
            key: UNKNOWN_KEY.to_string(),
            reasoning,
            decisive: false,
        }
    }

    fn from_key(rule: RuleKind, key: Option<&str>, reasoning: String) -> Self {
        match key {
            Some(k) => Self::decisive(rule, k, reasoning),
            None => Self::indecisive(rule, reasoning),
        }
    }
}

/// Stateless evaluator binding rules to graph keys
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `rule` to the context.
    ///
    /// Returns `None` when the quantitative data the rule needs is absent.
    pub fn evaluate(&self, rule: RuleKind, ctx: &ClinicalContext) -> Option<RuleVerdict> {
        match rule {
            RuleKind::OverallAssessment => {
                let (flair, enh) = Self::percent_changes(ctx)?;
                let (assessment, reasoning) = overall_assessment(
                    flair,
                    enh,
                    ctx.flair.abs_change_ml,
                    ctx.enhancement.abs_change_ml,
                );
                Some(RuleVerdict::decisive(rule, assessment.key(), reasoning))
            }
            RuleKind::RadiationTiming => {
                let days = ctx.days_since_radiation?;
                let (timing, reasoning) = radiation_timing(days);
                Some(RuleVerdict::from_key(rule, timing.key(), reasoning))
            }
            RuleKind::ComponentWorsening => {
                let (flair, enh) = Self::percent_changes(ctx)?;
                let (components, reasoning) = component_worsening(flair, enh);
                Some(RuleVerdict::from_key(rule, components.key(), reasoning))
            }
            RuleKind::ExtentThreshold => {
                let (flair, enh) = Self::percent_changes(ctx)?;
                let (extent, reasoning) = extent_classification(flair, enh);
                Some(RuleVerdict::from_key(rule, extent.key(), reasoning))
            }
        }
    }

    fn percent_changes(ctx: &ClinicalContext) -> Option<(f64, f64)> {
        Some((ctx.flair.pct_change?, ctx.enhancement.pct_change?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btrads_types::PatientRecord;
    use chrono::NaiveDate;

    fn ctx(record: PatientRecord) -> ClinicalContext {
        ClinicalContext::from_record(&record)
    }

    #[test]
    fn needs_volumes() {
        let engine = RuleEngine::new();
        let empty = ctx(PatientRecord::new("p"));
        assert!(engine.evaluate(RuleKind::OverallAssessment, &empty).is_none());
        assert!(engine.evaluate(RuleKind::RadiationTiming, &empty).is_none());
    }

    #[test]
    fn assessment_is_decisive() {
        let verdict = RuleEngine::new()
            .evaluate(
                RuleKind::OverallAssessment,
                &ctx(PatientRecord::new("p").with_change_pct(-48.0, -25.0)),
            )
            .unwrap();
        assert_eq!(verdict.key, "improved");
        assert!(verdict.decisive);
    }

    #[test]
    fn no_worsening_is_indecisive() {
        let verdict = RuleEngine::new()
            .evaluate(
                RuleKind::ComponentWorsening,
                &ctx(PatientRecord::new("p").with_change_pct(2.0, 3.0)),
            )
            .unwrap();
        assert_eq!(verdict.key, UNKNOWN_KEY);
        assert!(!verdict.decisive);
    }

    #[test]
    fn radiation_after_followup_is_indecisive() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day);
        let record = PatientRecord::new("p").with_dates(None, d(1, 1), d(2, 1));
        let verdict = RuleEngine::new()
            .evaluate(RuleKind::RadiationTiming, &ctx(record))
            .unwrap();
        assert!(!verdict.decisive);
    }

    #[test]
    fn extent_maps_to_graph_keys() {
        let verdict = RuleEngine::new()
            .evaluate(
                RuleKind::ExtentThreshold,
                &ctx(PatientRecord::new("p").with_change_pct(45.0, 20.0)),
            )
            .unwrap();
        assert_eq!(verdict.key, "major");
    }
}
