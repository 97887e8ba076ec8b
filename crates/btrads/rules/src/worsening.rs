//! Which components worsened, and by how much

use crate::{MAJOR_EXTENT_PCT, STABLE_PCT_BAND};
use serde::{Deserialize, Serialize};

/// Components with a significant increase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentWorsening {
    /// Exactly one of FLAIR or enhancement
    One,
    /// Both FLAIR and enhancement
    Both,
    None,
}

impl ComponentWorsening {
    pub fn key(&self) -> Option<&'static str> {
        match self {
            ComponentWorsening::One => Some("flair_or_enh"),
            ComponentWorsening::Both => Some("flair_and_enh"),
            ComponentWorsening::None => None,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "flair_or_enh" => Some(ComponentWorsening::One),
            "flair_and_enh" => Some(ComponentWorsening::Both),
            _ => None,
        }
    }
}

/// A component is worse when its change exceeds +10%
pub fn component_worsening(flair_pct: f64, enh_pct: f64) -> (ComponentWorsening, String) {
    let flair_worse = flair_pct > STABLE_PCT_BAND;
    let enh_worse = enh_pct > STABLE_PCT_BAND;

    match (flair_worse, enh_worse) {
        (true, true) => (
            ComponentWorsening::Both,
            format!("Both components worse: FLAIR +{flair_pct:.1}%, ENH +{enh_pct:.1}%"),
        ),
        (true, false) => (
            ComponentWorsening::One,
            format!("FLAIR worse: +{flair_pct:.1}% (ENH {enh_pct:+.1}%)"),
        ),
        (false, true) => (
            ComponentWorsening::One,
            format!("Enhancement worse: +{enh_pct:.1}% (FLAIR {flair_pct:+.1}%)"),
        ),
        (false, false) => (
            ComponentWorsening::None,
            format!("No significant worsening: FLAIR {flair_pct:+.1}%, ENH {enh_pct:+.1}%"),
        ),
    }
}

/// Size of the larger increase against the 40% threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extent {
    Major,
    Minor,
    None,
}

impl Extent {
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Extent::Major => Some("major"),
            Extent::Minor => Some("minor"),
            Extent::None => None,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "major" => Some(Extent::Major),
            "minor" => Some(Extent::Minor),
            _ => None,
        }
    }
}

/// `max(flair, enh) >= 40` is major, any positive increase below that is minor
pub fn extent_classification(flair_pct: f64, enh_pct: f64) -> (Extent, String) {
    let max_increase = flair_pct.max(enh_pct);

    if max_increase >= MAJOR_EXTENT_PCT {
        let component = if flair_pct >= MAJOR_EXTENT_PCT {
            "FLAIR"
        } else {
            "Enhancement"
        };
        (
            Extent::Major,
            format!("{component} increased {max_increase:.1}% (≥40% threshold)"),
        )
    } else if max_increase > 0.0 {
        (
            Extent::Minor,
            format!("Maximum increase {max_increase:.1}% (<40% threshold)"),
        )
    } else {
        (
            Extent::None,
            format!("No positive changes to evaluate: FLAIR {flair_pct:+.1}%, ENH {enh_pct:+.1}%"),
        )
    }
}
