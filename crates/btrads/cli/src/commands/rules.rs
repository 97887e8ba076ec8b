//! Direct evaluation of the quantitative rules

use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};
use btrads_rules::{radiation_timing, RuleEngine};
use btrads_types::{parse_clinical_date, ClinicalContext, PatientRecord, RuleKind, UNKNOWN_KEY};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

const ALL_RULES: [RuleKind; 4] = [
    RuleKind::OverallAssessment,
    RuleKind::RadiationTiming,
    RuleKind::ComponentWorsening,
    RuleKind::ExtentThreshold,
];

/// Rule subcommands
#[derive(Subcommand, Debug)]
pub enum RulesCommands {
    /// Apply every rule to the given measurements
    Evaluate(Measurements),

    /// Classify a day count against the post-radiation window
    Timing {
        /// Days between radiation and follow-up
        #[arg(allow_negative_numbers = true)]
        days: i64,
    },
}

/// Quantitative inputs; percent changes win over volumes when both are given
#[derive(Args, Debug)]
pub struct Measurements {
    /// FLAIR percent change
    #[arg(long, allow_negative_numbers = true)]
    pub flair_pct: Option<f64>,
    /// Enhancement percent change
    #[arg(long, allow_negative_numbers = true)]
    pub enh_pct: Option<f64>,
    /// FLAIR volumes in mL, baseline then follow-up
    #[arg(long, num_args = 2, value_names = ["BASELINE", "FOLLOWUP"])]
    pub flair_ml: Option<Vec<f64>>,
    /// Enhancement volumes in mL, baseline then follow-up
    #[arg(long, num_args = 2, value_names = ["BASELINE", "FOLLOWUP"])]
    pub enh_ml: Option<Vec<f64>>,
    /// Follow-up imaging date
    #[arg(long)]
    pub followup_date: Option<String>,
    /// Radiation completion date
    #[arg(long)]
    pub radiation_date: Option<String>,
}

impl Measurements {
    fn to_context(&self) -> CliResult<ClinicalContext> {
        let mut record = PatientRecord::new("cli");
        record.flair_change_pct = self.flair_pct;
        record.enhancement_change_pct = self.enh_pct;
        if let Some([baseline, followup]) = self.flair_ml.as_deref() {
            record.baseline_flair_volume = Some(*baseline);
            record.followup_flair_volume = Some(*followup);
        }
        if let Some([baseline, followup]) = self.enh_ml.as_deref() {
            record.baseline_enhancement_volume = Some(*baseline);
            record.followup_enhancement_volume = Some(*followup);
        }
        record.followup_date = parse_date(self.followup_date.as_deref())?;
        record.radiation_date = parse_date(self.radiation_date.as_deref())?;
        Ok(ClinicalContext::from_record(&record))
    }
}

fn parse_date(raw: Option<&str>) -> CliResult<Option<NaiveDate>> {
    raw.map(|raw| {
        parse_clinical_date(raw)
            .ok_or_else(|| CliError::InvalidArgument(format!("unrecognized date: {raw}")))
    })
    .transpose()
}

#[derive(Tabled, Serialize)]
struct VerdictRow {
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Decisive")]
    decisive: bool,
    #[tabled(rename = "Reasoning")]
    reasoning: String,
}

pub fn execute(command: RulesCommands, format: OutputFormat) -> CliResult<()> {
    match command {
        RulesCommands::Evaluate(measurements) => {
            let ctx = measurements.to_context()?;
            let engine = RuleEngine::new();
            let rows = ALL_RULES
                .iter()
                .map(|&rule| match engine.evaluate(rule, &ctx) {
                    Some(verdict) => VerdictRow {
                        rule: rule.to_string(),
                        key: verdict.key,
                        decisive: verdict.decisive,
                        reasoning: verdict.reasoning,
                    },
                    None => VerdictRow {
                        rule: rule.to_string(),
                        key: "-".into(),
                        decisive: false,
                        reasoning: "insufficient data".into(),
                    },
                })
                .collect();
            output::print_rows(rows, format)
        }
        RulesCommands::Timing { days } => {
            let (timing, reasoning) = radiation_timing(days);
            let row = VerdictRow {
                rule: RuleKind::RadiationTiming.to_string(),
                key: timing.key().unwrap_or(UNKNOWN_KEY).to_string(),
                decisive: timing.key().is_some(),
                reasoning,
            };
            output::print_rows(vec![row], format)
        }
    }
}
