//! Patient input and the quantitative context derived from it

use crate::BtradsScore;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Accepted clinical date layouts
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m-%d-%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a date as written in clinical records.
///
/// Slash dates are read month-first; a two-digit year is read as 20xx/19xx.
pub fn parse_clinical_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some((first, _)) = raw.split_once('/') {
        if first.len() <= 2 {
            let year_len = raw.rsplit('/').next().map_or(0, str::len);
            let format = if year_len == 2 { "%m/%d/%y" } else { "%m/%d/%Y" };
            if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                return Some(date);
            }
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|dt| dt.date())
        })
}

/// Serde adapter for optional clinical dates in any accepted layout
pub mod clinical_date {
    use super::parse_clinical_date;
    use chrono::NaiveDate;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => s.serialize_str(&d.format("%Y-%m-%d").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse_clinical_date(text)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("unrecognized date: {text}"))),
        }
    }
}

// ── Patient Record ───────────────────────────────────────────────────

/// One follow-up study as supplied by the caller
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    #[serde(default)]
    pub clinical_note: String,
    #[serde(default, with = "clinical_date", skip_serializing_if = "Option::is_none")]
    pub baseline_date: Option<NaiveDate>,
    #[serde(default, with = "clinical_date", skip_serializing_if = "Option::is_none")]
    pub followup_date: Option<NaiveDate>,
    #[serde(default, with = "clinical_date", skip_serializing_if = "Option::is_none")]
    pub radiation_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_flair_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_flair_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_enhancement_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_enhancement_volume: Option<f64>,
    /// Used only when the volumes are absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flair_change_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhancement_change_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<BtradsScore>,
}

impl PatientRecord {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Default::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.clinical_note = note.into();
        self
    }

    pub fn with_dates(
        mut self,
        baseline: Option<NaiveDate>,
        followup: Option<NaiveDate>,
        radiation: Option<NaiveDate>,
    ) -> Self {
        self.baseline_date = baseline;
        self.followup_date = followup;
        self.radiation_date = radiation;
        self
    }

    pub fn with_flair_volumes(mut self, baseline: f64, followup: f64) -> Self {
        self.baseline_flair_volume = Some(baseline);
        self.followup_flair_volume = Some(followup);
        self
    }

    pub fn with_enhancement_volumes(mut self, baseline: f64, followup: f64) -> Self {
        self.baseline_enhancement_volume = Some(baseline);
        self.followup_enhancement_volume = Some(followup);
        self
    }

    pub fn with_change_pct(mut self, flair: f64, enhancement: f64) -> Self {
        self.flair_change_pct = Some(flair);
        self.enhancement_change_pct = Some(enhancement);
        self
    }

    pub fn with_ground_truth(mut self, score: BtradsScore) -> Self {
        self.ground_truth = Some(score);
        self
    }
}

// ── Clinical Context ─────────────────────────────────────────────────

/// Change of one imaging component between baseline and follow-up
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeChange {
    pub baseline_ml: Option<f64>,
    pub followup_ml: Option<f64>,
    pub pct_change: Option<f64>,
    pub abs_change_ml: Option<f64>,
}

impl VolumeChange {
    /// Derive from volumes when both are present, otherwise from a supplied percent
    pub fn derive(baseline: Option<f64>, followup: Option<f64>, supplied_pct: Option<f64>) -> Self {
        match (baseline, followup) {
            (Some(b), Some(f)) => {
                let pct_change = if b > 0.0 {
                    Some((f - b) / b * 100.0)
                } else {
                    supplied_pct
                };
                Self {
                    baseline_ml: Some(b),
                    followup_ml: Some(f),
                    pct_change,
                    abs_change_ml: Some(f - b),
                }
            }
            _ => Self {
                baseline_ml: baseline,
                followup_ml: followup,
                pct_change: supplied_pct,
                abs_change_ml: None,
            },
        }
    }
}

/// Read-only quantitative context for one case, computed once at case start
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalContext {
    pub patient_id: String,
    pub clinical_note: String,
    pub baseline_date: Option<NaiveDate>,
    pub followup_date: Option<NaiveDate>,
    pub radiation_date: Option<NaiveDate>,
    pub flair: VolumeChange,
    pub enhancement: VolumeChange,
    /// Follow-up date minus radiation completion date
    pub days_since_radiation: Option<i64>,
}

impl ClinicalContext {
    pub fn from_record(record: &PatientRecord) -> Self {
        let days_since_radiation = match (record.followup_date, record.radiation_date) {
            (Some(followup), Some(radiation)) => Some((followup - radiation).num_days()),
            _ => None,
        };
        Self {
            patient_id: record.patient_id.clone(),
            clinical_note: record.clinical_note.clone(),
            baseline_date: record.baseline_date,
            followup_date: record.followup_date,
            radiation_date: record.radiation_date,
            flair: VolumeChange::derive(
                record.baseline_flair_volume,
                record.followup_flair_volume,
                record.flair_change_pct,
            ),
            enhancement: VolumeChange::derive(
                record.baseline_enhancement_volume,
                record.followup_enhancement_volume,
                record.enhancement_change_pct,
            ),
            days_since_radiation,
        }
    }

    /// Both percent changes are known
    pub fn has_volume_changes(&self) -> bool {
        self.flair.pct_change.is_some() && self.enhancement.pct_change.is_some()
    }
}

impl From<&PatientRecord> for ClinicalContext {
    fn from(record: &PatientRecord) -> Self {
        Self::from_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_clinical_layouts() {
        assert_eq!(parse_clinical_date("2024-03-05"), Some(date(2024, 3, 5)));
        assert_eq!(parse_clinical_date("03/05/2024"), Some(date(2024, 3, 5)));
        assert_eq!(parse_clinical_date("3/5/24"), Some(date(2024, 3, 5)));
        assert_eq!(parse_clinical_date("2024/03/05"), Some(date(2024, 3, 5)));
        assert_eq!(parse_clinical_date("03-05-2024"), Some(date(2024, 3, 5)));
        assert_eq!(parse_clinical_date("2024-03-05 10:30:00"), Some(date(2024, 3, 5)));
        assert_eq!(parse_clinical_date("not a date"), None);
        assert_eq!(parse_clinical_date(""), None);
    }

    #[test]
    fn derives_percent_and_absolute_change() {
        let record = PatientRecord::new("p1")
            .with_flair_volumes(10.0, 5.2)
            .with_enhancement_volumes(4.0, 3.0);
        let ctx = ClinicalContext::from_record(&record);
        assert!((ctx.flair.pct_change.unwrap() + 48.0).abs() < 1e-9);
        assert!((ctx.flair.abs_change_ml.unwrap() + 4.8).abs() < 1e-9);
        assert!((ctx.enhancement.pct_change.unwrap() + 25.0).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_supplied_percent() {
        let record = PatientRecord::new("p1").with_change_pct(-48.0, -25.0);
        let ctx = ClinicalContext::from_record(&record);
        assert_eq!(ctx.flair.pct_change, Some(-48.0));
        assert_eq!(ctx.flair.abs_change_ml, None);
        assert!(ctx.has_volume_changes());
    }

    #[test]
    fn zero_baseline_has_no_derived_percent() {
        let change = VolumeChange::derive(Some(0.0), Some(2.0), None);
        assert_eq!(change.pct_change, None);
        assert_eq!(change.abs_change_ml, Some(2.0));
    }

    #[test]
    fn days_since_radiation() {
        let record = PatientRecord::new("p1").with_dates(
            Some(date(2024, 1, 1)),
            Some(date(2024, 3, 30)),
            Some(date(2024, 1, 1)),
        );
        assert_eq!(ClinicalContext::from_record(&record).days_since_radiation, Some(89));
    }

    #[test]
    fn record_accepts_loose_dates() {
        let json = r#"{
            "patient_id": "p9",
            "followup_date": "04/01/2024",
            "radiation_date": "",
            "ground_truth": "3c"
        }"#;
        let record: PatientRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.followup_date, Some(date(2024, 4, 1)));
        assert_eq!(record.radiation_date, None);
        assert_eq!(record.ground_truth, Some(BtradsScore::Bt3c));
    }
}
