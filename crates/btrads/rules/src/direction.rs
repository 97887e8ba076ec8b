//! Volume direction and overall imaging assessment

use crate::{MIN_SIGNIFICANT_ABS_CHANGE_ML, STABLE_PCT_BAND};
use serde::{Deserialize, Serialize};

/// Direction of change for one component
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Stable,
}

/// Classify a component's change.
///
/// An absolute change below 1 mL is stable whatever the percentage says;
/// otherwise anything within ±10% is stable.
pub fn classify_direction(pct_change: f64, abs_change_ml: Option<f64>) -> (Direction, String) {
    if let Some(abs) = abs_change_ml {
        if abs.abs() < MIN_SIGNIFICANT_ABS_CHANGE_ML {
            return (
                Direction::Stable,
                format!("Stable {pct_change:+.1}% (absolute change {abs:.2}ml < 1ml threshold)"),
            );
        }
    }

    if pct_change > STABLE_PCT_BAND {
        (Direction::Up, format!("Increased {pct_change:.1}%"))
    } else if pct_change < -STABLE_PCT_BAND {
        (Direction::Down, format!("Decreased {pct_change:.1}%"))
    } else {
        (
            Direction::Stable,
            format!("Stable {pct_change:.1}% (within ±10%)"),
        )
    }
}

/// Overall comparison with the prior study
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallAssessment {
    Improved,
    Unchanged,
    Worse,
}

impl OverallAssessment {
    /// Transition key in the decision graph
    pub fn key(&self) -> &'static str {
        match self {
            OverallAssessment::Improved => "improved",
            OverallAssessment::Unchanged => "unchanged",
            OverallAssessment::Worse => "worse",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "improved" => Some(OverallAssessment::Improved),
            "unchanged" => Some(OverallAssessment::Unchanged),
            "worse" => Some(OverallAssessment::Worse),
            _ => None,
        }
    }
}

/// Combine FLAIR and enhancement into one assessment.
///
/// When the two move in opposite non-stable directions, enhancement wins.
/// A stable component defers to the other one.
pub fn overall_assessment(
    flair_pct: f64,
    enh_pct: f64,
    flair_abs_ml: Option<f64>,
    enh_abs_ml: Option<f64>,
) -> (OverallAssessment, String) {
    let (flair_dir, flair_reason) = classify_direction(flair_pct, flair_abs_ml);
    let (enh_dir, enh_reason) = classify_direction(enh_pct, enh_abs_ml);

    let mixed = flair_dir != enh_dir && flair_dir != Direction::Stable && enh_dir != Direction::Stable;
    if mixed {
        let assessment = if enh_dir == Direction::Up {
            OverallAssessment::Worse
        } else {
            OverallAssessment::Improved
        };
        return (
            assessment,
            format!("Mixed pattern - Enhancement priority: ENH {enh_reason}"),
        );
    }

    let describe = |dir: Direction| {
        let mut parts = Vec::new();
        if flair_dir == dir {
            parts.push(format!("FLAIR {flair_reason}"));
        }
        if enh_dir == dir {
            parts.push(format!("ENH {enh_reason}"));
        }
        parts.join(" and ")
    };

    if flair_dir == Direction::Up || enh_dir == Direction::Up {
        (OverallAssessment::Worse, describe(Direction::Up))
    } else if flair_dir == Direction::Down || enh_dir == Direction::Down {
        (OverallAssessment::Improved, describe(Direction::Down))
    } else {
        (
            OverallAssessment::Unchanged,
            format!("FLAIR {flair_reason}, ENH {enh_reason}"),
        )
    }
}
