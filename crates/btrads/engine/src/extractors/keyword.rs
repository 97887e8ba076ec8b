//! Pattern-matching extractor over the clinical note
//!
//! A low-confidence reader for when no model is available. Each extractor
//! ref has an ordered cue table; the first key with a matching phrase wins,
//! so negated phrases are listed ahead of the phrases they contain.

use crate::extractor::{ExtractionRequest, Extractor};
use crate::reference_graph::{
    AVASTIN_RESPONSE_REF, COMPONENT_ANALYSIS, EXTENT_ANALYSIS, IMAGING_COMPARISON,
    MEDICATION_EFFECTS, PRIOR_ASSESSMENT, PROGRESSION_PATTERN, RADIATION_TIMELINE,
    STEROID_EFFECTS_REF,
};
use async_trait::async_trait;
use btrads_types::{
    AvastinStatus, Evidence, ExtractedValue, ExtractionResult, ExtractorError, MedicationStatus,
    SteroidStatus,
};

/// Confidence of a phrase match
pub const MATCH_CONFIDENCE: f64 = 0.5;
/// Confidence of a medication reading, which combines two weaker matches
pub const MEDICATION_CONFIDENCE: f64 = 0.4;
/// Confidence when nothing matched
pub const NO_MATCH_CONFIDENCE: f64 = 0.2;

type CueTable = &'static [(&'static str, &'static [&'static str])];

const PRIOR_CUES: CueTable = &[
    ("no", &["no prior", "first scan", "baseline study", "no previous"]),
    (
        "yes",
        &[
            "compared to prior",
            "comparison with previous",
            "interval change",
            "since prior",
            "prior study",
            "previous mri",
        ],
    ),
];

const IMAGING_CUES: CueTable = &[
    ("improved", &["improved", "improvement", "decreased", "smaller"]),
    ("unchanged", &["stable", "unchanged", "no change"]),
    ("worse", &["worse", "progression", "increased", "new "]),
];

const AVASTIN_RESPONSE_CUES: CueTable = &[
    (
        "first_study_enh_only",
        &["first study", "first post-avastin", "initial response", "enhancement only"],
    ),
    (
        "sustained_improvement",
        &["sustained", "continued improvement", "persistent improvement"],
    ),
];

const STEROID_EFFECT_CUES: CueTable = &[
    (
        "unlikely_steroid_effect",
        &["unlikely steroid", "not steroid", "despite steroid", "stable steroid"],
    ),
    (
        "likely_steroid_effect",
        &["steroid effect", "steroid response", "likely steroid", "dexamethasone"],
    ),
];

const RADIATION_CUES: CueTable = &[
    (
        "within_90_days",
        &["within 90 days", "recent radiation", "recently completed radiation"],
    ),
    (
        "beyond_90_days",
        &["beyond 90 days", "remote radiation", "more than 90 days"],
    ),
];

const COMPONENT_CUES: CueTable = &[
    (
        "flair_and_enh",
        &["both flair and enhancement", "flair and enhancement worse", "both components"],
    ),
    (
        "flair_or_enh",
        &[
            "flair worse",
            "flair increased",
            "more flair",
            "enhancement worse",
            "enhancement increased",
            "new enhancement",
        ],
    ),
];

const EXTENT_CUES: CueTable = &[
    ("major", &["significant", "marked", "extensive", "major"]),
    ("minor", &["mild", "minimal", "slight", "minor"]),
];

const PROGRESSION_CUES: CueTable = &[
    ("no", &["no progression", "first worsening", "first time", "not progressive"]),
    (
        "yes",
        &["progressive", "continued growth", "serial", "multiple studies", "progression"],
    ),
];

fn cues_for(extractor_ref: &str) -> Option<CueTable> {
    let table = match extractor_ref {
        PRIOR_ASSESSMENT => PRIOR_CUES,
        IMAGING_COMPARISON => IMAGING_CUES,
        AVASTIN_RESPONSE_REF => AVASTIN_RESPONSE_CUES,
        STEROID_EFFECTS_REF => STEROID_EFFECT_CUES,
        RADIATION_TIMELINE => RADIATION_CUES,
        COMPONENT_ANALYSIS => COMPONENT_CUES,
        EXTENT_ANALYSIS => EXTENT_CUES,
        PROGRESSION_PATTERN => PROGRESSION_CUES,
        _ => return None,
    };
    Some(table)
}

/// A phrase found in the note
#[derive(Debug, Clone, Copy, PartialEq)]
struct Hit {
    start: usize,
    end: usize,
}

impl Hit {
    fn evidence(&self, note: &str, confidence: f64) -> Evidence {
        Evidence::new(&note[self.start..self.end], self.start, self.end, confidence)
    }
}

/// Note lowered once; ASCII lowering keeps byte offsets valid in the original
struct Note<'a> {
    original: &'a str,
    lowered: String,
}

impl<'a> Note<'a> {
    fn new(original: &'a str) -> Self {
        Self {
            original,
            lowered: original.to_ascii_lowercase(),
        }
    }

    fn find(&self, needle: &str) -> Option<Hit> {
        self.lowered.find(needle).map(|start| Hit {
            start,
            end: start + needle.len(),
        })
    }

    fn find_any(&self, needles: &[&str]) -> Option<Hit> {
        needles.iter().find_map(|n| self.find(n))
    }

    fn contains_any(&self, needles: &[&str]) -> bool {
        self.find_any(needles).is_some()
    }
}

/// Reads extraction values from keywords in the clinical note
#[derive(Clone, Debug, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub const NAME: &'static str = "keyword";

    pub fn new() -> Self {
        Self
    }

    fn categorize(&self, request: &ExtractionRequest, cues: CueTable, note: &Note<'_>) -> ExtractionResult {
        let node_id = request.node_id().clone();
        for (key, needles) in cues {
            if let Some(hit) = note.find_any(needles) {
                let phrase = &note.original[hit.start..hit.end];
                return ExtractionResult::new(
                    node_id,
                    ExtractedValue::category(key),
                    MATCH_CONFIDENCE,
                    format!("{}: \"{}\" suggests {key} (pattern matching)", request.node.label, phrase.trim()),
                    Self::NAME,
                )
                .with_evidence(hit.evidence(note.original, MATCH_CONFIDENCE));
            }
        }
        ExtractionResult::new(
            node_id,
            ExtractedValue::Unknown,
            NO_MATCH_CONFIDENCE,
            format!("{}: no recognizable phrase in note", request.node.label),
            Self::NAME,
        )
    }

    fn medication(&self, request: &ExtractionRequest, note: &Note<'_>) -> ExtractionResult {
        let on_steroids = note.contains_any(&["steroid", "dexamethasone", "decadron"]);
        let steroid_status = if note.contains_any(&["no steroid", "not on steroid", "off steroid"]) {
            SteroidStatus::None
        } else if on_steroids && note.contains_any(&["stable"]) {
            SteroidStatus::Stable
        } else if on_steroids && note.contains_any(&["increas"]) {
            SteroidStatus::Increasing
        } else if note.contains_any(&["decreas", "taper"]) {
            SteroidStatus::Decreasing
        } else if on_steroids && note.contains_any(&["started"]) {
            SteroidStatus::Started
        } else if on_steroids {
            SteroidStatus::Unknown
        } else {
            SteroidStatus::None
        };

        let on_avastin = note.contains_any(&["avastin", "bevacizumab"]);
        let avastin_status = if note.contains_any(&["no avastin", "not on avastin", "no bevacizumab"]) {
            AvastinStatus::None
        } else if on_avastin && note.contains_any(&["first"]) {
            AvastinStatus::FirstTreatment
        } else if on_avastin && note.contains_any(&["ongoing", "continuing", "continued"]) {
            AvastinStatus::Ongoing
        } else if on_avastin && note.contains_any(&["started"]) {
            AvastinStatus::Started
        } else if on_avastin {
            AvastinStatus::Unknown
        } else {
            AvastinStatus::None
        };

        let status = MedicationStatus::new(steroid_status, avastin_status);
        let mut result = ExtractionResult::new(
            request.node_id().clone(),
            ExtractedValue::Medication(status.clone()),
            MEDICATION_CONFIDENCE,
            format!(
                "Medications from note: steroids {:?}, avastin {:?} (pattern matching)",
                status.steroid_status, status.avastin_status
            ),
            Self::NAME,
        );
        for needles in [&["steroid", "dexamethasone", "decadron"][..], &["avastin", "bevacizumab"][..]] {
            if let Some(hit) = note.find_any(needles) {
                result = result.with_evidence(hit.evidence(note.original, MEDICATION_CONFIDENCE));
            }
        }
        result
    }
}

#[async_trait]
impl Extractor for KeywordExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, ExtractorError> {
        if request.clinical_note().trim().is_empty() {
            return Err(ExtractorError::InsufficientData("empty clinical note".into()));
        }
        let note = Note::new(request.clinical_note());
        let extractor_ref = request.extractor_ref();

        if extractor_ref == MEDICATION_EFFECTS {
            return Ok(self.medication(request, &note));
        }
        let cues = cues_for(extractor_ref)
            .ok_or_else(|| ExtractorError::Unsupported(request.node_id().clone()))?;
        Ok(self.categorize(request, cues, &note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btrads_types::{CaseId, ClinicalContext, DecisionNode, PatientRecord};

    fn request(extractor_ref: &str, note: &str) -> ExtractionRequest {
        let node = DecisionNode::extraction("n", "Node", extractor_ref).otherwise("end");
        let ctx = ClinicalContext::from_record(&PatientRecord::new("p").with_note(note));
        ExtractionRequest::new(CaseId::new("c"), node, ctx)
    }

    async fn key(extractor_ref: &str, note: &str) -> String {
        KeywordExtractor::new()
            .extract(&request(extractor_ref, note))
            .await
            .unwrap()
            .decision_key()
    }

    #[tokio::test]
    async fn negation_wins_over_plain_phrase() {
        assert_eq!(key(PRIOR_ASSESSMENT, "No prior imaging available.").await, "no");
        assert_eq!(key(PRIOR_ASSESSMENT, "Compared to prior MRI of 1/2/2024.").await, "yes");
        assert_eq!(key(PROGRESSION_PATTERN, "No progression on serial imaging").await, "no");
    }

    #[tokio::test]
    async fn evidence_points_into_original_note() {
        let note = "FINDINGS: Lesion is SMALLER than before.";
        let result = KeywordExtractor::new()
            .extract(&request(IMAGING_COMPARISON, note))
            .await
            .unwrap();
        assert_eq!(result.decision_key(), "improved");
        let evidence = &result.evidence[0];
        assert_eq!(evidence.text, "SMALLER");
        assert_eq!(&note[evidence.start..evidence.end], "SMALLER");
    }

    #[tokio::test]
    async fn no_match_is_unknown_with_low_confidence() {
        let result = KeywordExtractor::new()
            .extract(&request(EXTENT_ANALYSIS, "Patient tolerating treatment."))
            .await
            .unwrap();
        assert!(result.value.is_unknown());
        assert_eq!(result.confidence, NO_MATCH_CONFIDENCE);
    }

    #[tokio::test]
    async fn medications_route_avastin_first() {
        assert_eq!(
            key(MEDICATION_EFFECTS, "Continuing Avastin. Dexamethasone increased to 4mg.").await,
            "avastin"
        );
        assert_eq!(key(MEDICATION_EFFECTS, "Dexamethasone increased to 4mg.").await, "increasing_steroids");
        assert_eq!(key(MEDICATION_EFFECTS, "No steroids. No avastin.").await, "neither");
    }

    #[tokio::test]
    async fn empty_note_is_insufficient() {
        let err = KeywordExtractor::new()
            .extract(&request(IMAGING_COMPARISON, "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::InsufficientData(_)));
    }

    #[tokio::test]
    async fn unknown_ref_is_unsupported() {
        let err = KeywordExtractor::new()
            .extract(&request("something_else", "text"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Unsupported(_)));
    }
}
