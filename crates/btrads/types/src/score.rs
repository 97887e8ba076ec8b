//! BT-RADS outcome categories

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One of the eight BT-RADS follow-up categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BtradsScore {
    #[serde(rename = "0")]
    Bt0,
    #[serde(rename = "1a")]
    Bt1a,
    #[serde(rename = "1b")]
    Bt1b,
    #[serde(rename = "2")]
    Bt2,
    #[serde(rename = "3a")]
    Bt3a,
    #[serde(rename = "3b")]
    Bt3b,
    #[serde(rename = "3c")]
    Bt3c,
    #[serde(rename = "4")]
    Bt4,
}

impl BtradsScore {
    pub const ALL: [BtradsScore; 8] = [
        BtradsScore::Bt0,
        BtradsScore::Bt1a,
        BtradsScore::Bt1b,
        BtradsScore::Bt2,
        BtradsScore::Bt3a,
        BtradsScore::Bt3b,
        BtradsScore::Bt3c,
        BtradsScore::Bt4,
    ];

    /// Conservative score used when a case cannot be classified
    pub const FALLBACK: BtradsScore = BtradsScore::Bt3b;

    /// Short category code ("1a", "3c", ...)
    pub fn code(&self) -> &'static str {
        match self {
            Self::Bt0 => "0",
            Self::Bt1a => "1a",
            Self::Bt1b => "1b",
            Self::Bt2 => "2",
            Self::Bt3a => "3a",
            Self::Bt3b => "3b",
            Self::Bt3c => "3c",
            Self::Bt4 => "4",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Bt0 => "BT-0 (Baseline)",
            Self::Bt1a => "BT-1a (Improved)",
            Self::Bt1b => "BT-1b (Medication Effect)",
            Self::Bt2 => "BT-2 (Stable)",
            Self::Bt3a => "BT-3a (Favor Treatment)",
            Self::Bt3b => "BT-3b (Indeterminate)",
            Self::Bt3c => "BT-3c (Favor Tumor)",
            Self::Bt4 => "BT-4 (Highly Suspicious)",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Bt0 => "No suitable prior for comparison",
            Self::Bt1a => "True improvement",
            Self::Bt1b => "Improvement due to medication",
            Self::Bt2 => "No significant change",
            Self::Bt3a => "Worsening within 90 days of XRT",
            Self::Bt3b => "Mixed or uncertain worsening",
            Self::Bt3c => "Worsening favoring tumor",
            Self::Bt4 => "Highly suspicious for tumor progression",
        }
    }

    /// Parse a score from "1a", "BT-1a" or "bt 1a" forms
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let code = lowered
            .strip_prefix("bt-")
            .or_else(|| lowered.strip_prefix("bt "))
            .or_else(|| lowered.strip_prefix("bt"))
            .unwrap_or(&lowered)
            .trim();
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }
}

impl std::fmt::Display for BtradsScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BT-{}", self.code())
    }
}

impl FromStr for BtradsScore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown BT-RADS score: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(BtradsScore::parse("1a"), Some(BtradsScore::Bt1a));
        assert_eq!(BtradsScore::parse("BT-3c"), Some(BtradsScore::Bt3c));
        assert_eq!(BtradsScore::parse(" bt 4 "), Some(BtradsScore::Bt4));
        assert_eq!(BtradsScore::parse("5"), None);
    }

    #[test]
    fn serializes_as_code() {
        let json = serde_json::to_string(&BtradsScore::Bt1b).unwrap();
        assert_eq!(json, "\"1b\"");
        let back: BtradsScore = serde_json::from_str("\"3a\"").unwrap();
        assert_eq!(back, BtradsScore::Bt3a);
    }

    #[test]
    fn display_uses_bt_prefix() {
        assert_eq!(BtradsScore::FALLBACK.to_string(), "BT-3b");
    }
}
