//! The 90-day post-radiation window

use crate::RADIATION_WINDOW_DAYS;
use btrads_types::parse_clinical_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiationTiming {
    WithinWindow,
    BeyondWindow,
    Unknown,
}

impl RadiationTiming {
    pub fn key(&self) -> Option<&'static str> {
        match self {
            RadiationTiming::WithinWindow => Some("within_90_days"),
            RadiationTiming::BeyondWindow => Some("beyond_90_days"),
            RadiationTiming::Unknown => None,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "within_90_days" => Some(RadiationTiming::WithinWindow),
            "beyond_90_days" => Some(RadiationTiming::BeyondWindow),
            _ => None,
        }
    }
}

/// Negative day counts mean the dates were unusable
pub fn radiation_timing(days_since_radiation: i64) -> (RadiationTiming, String) {
    if days_since_radiation < 0 {
        (
            RadiationTiming::Unknown,
            "Radiation date unknown or calculation failed".into(),
        )
    } else if days_since_radiation < RADIATION_WINDOW_DAYS {
        (
            RadiationTiming::WithinWindow,
            format!("{days_since_radiation} days since radiation (<90 days)"),
        )
    } else {
        (
            RadiationTiming::BeyondWindow,
            format!("{days_since_radiation} days since radiation (≥90 days)"),
        )
    }
}

/// Days from `earlier` to `later`
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    (later - earlier).num_days()
}

/// Days between two clinical date strings, `None` if either does not parse
pub fn days_between_str(earlier: &str, later: &str) -> Option<i64> {
    let a = parse_clinical_date(earlier)?;
    let b = parse_clinical_date(later)?;
    Some(days_between(a, b))
}
