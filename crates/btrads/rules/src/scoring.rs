//! Final score table
//!
//! Recomputes the score from the decisions taken along a path. The graph
//! remains authoritative; the table is a cross-check for it.

use crate::{ComponentWorsening, Extent, OverallAssessment, RadiationTiming};
use btrads_types::BtradsScore;
use serde::{Deserialize, Serialize};

/// Medication route taken at the medications node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationRoute {
    Avastin,
    IncreasingSteroids,
    Neither,
}

impl MedicationRoute {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "avastin" => Some(MedicationRoute::Avastin),
            "increasing_steroids" => Some(MedicationRoute::IncreasingSteroids),
            "neither" => Some(MedicationRoute::Neither),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvastinResponse {
    FirstStudyEnhOnly,
    SustainedImprovement,
}

impl AvastinResponse {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "first_study_enh_only" => Some(AvastinResponse::FirstStudyEnhOnly),
            "sustained_improvement" => Some(AvastinResponse::SustainedImprovement),
            _ => None,
        }
    }
}

/// Decisions collected along a path; `None` means undetermined or not visited
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreInputs {
    pub suitable_prior: Option<bool>,
    pub assessment: Option<OverallAssessment>,
    pub medication: Option<MedicationRoute>,
    pub avastin_response: Option<AvastinResponse>,
    pub steroid_effect_likely: Option<bool>,
    pub radiation: Option<RadiationTiming>,
    pub components: Option<ComponentWorsening>,
    pub extent: Option<Extent>,
    pub progressive: Option<bool>,
}

/// Map a derived score from path decisions
pub fn derive_score(inputs: &ScoreInputs) -> (BtradsScore, String) {
    if inputs.suitable_prior == Some(false) {
        return (
            BtradsScore::Bt0,
            "No suitable prior imaging for comparison".into(),
        );
    }

    match inputs.assessment {
        Some(OverallAssessment::Unchanged) => (
            BtradsScore::Bt2,
            "Stable disease - no significant change".into(),
        ),
        Some(OverallAssessment::Improved) => improved(inputs),
        Some(OverallAssessment::Worse) => worse(inputs),
        None => indeterminate(),
    }
}

fn improved(inputs: &ScoreInputs) -> (BtradsScore, String) {
    match inputs.medication {
        Some(MedicationRoute::Avastin) => match inputs.avastin_response {
            Some(AvastinResponse::SustainedImprovement) => (
                BtradsScore::Bt1a,
                "Sustained improvement on Avastin (true improvement)".into(),
            ),
            _ => (
                BtradsScore::Bt1b,
                "Improvement on Avastin (medication effect)".into(),
            ),
        },
        Some(MedicationRoute::IncreasingSteroids) => match inputs.steroid_effect_likely {
            Some(false) => (
                BtradsScore::Bt1a,
                "Improvement unlikely explained by steroids (true improvement)".into(),
            ),
            _ => (
                BtradsScore::Bt1b,
                "Improvement with increasing steroids (medication effect)".into(),
            ),
        },
        Some(MedicationRoute::Neither) | None => (
            BtradsScore::Bt1a,
            "True tumor improvement (no medication effects)".into(),
        ),
    }
}

fn worse(inputs: &ScoreInputs) -> (BtradsScore, String) {
    if inputs.radiation == Some(RadiationTiming::WithinWindow) {
        return (
            BtradsScore::Bt3a,
            "Worsening within 90 days of radiation (favor treatment effect)".into(),
        );
    }

    match (inputs.components, inputs.extent) {
        (Some(ComponentWorsening::One), _) => (
            BtradsScore::Bt3b,
            "Indeterminate progression (only one component worse)".into(),
        ),
        (Some(ComponentWorsening::Both), Some(Extent::Major)) => (
            BtradsScore::Bt4,
            "Highly suspicious for tumor progression (≥40% increase)".into(),
        ),
        (Some(ComponentWorsening::Both), Some(Extent::Minor)) => {
            if inputs.progressive == Some(true) {
                (
                    BtradsScore::Bt4,
                    "Progressive disease over multiple studies".into(),
                )
            } else {
                (
                    BtradsScore::Bt3c,
                    "Favors tumor but not clearly progressive".into(),
                )
            }
        }
        _ => indeterminate(),
    }
}

fn indeterminate() -> (BtradsScore, String) {
    (
        BtradsScore::FALLBACK,
        "Indeterminate (insufficient data for definitive classification)".into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worse_with(components: ComponentWorsening, extent: Option<Extent>) -> ScoreInputs {
        ScoreInputs {
            suitable_prior: Some(true),
            assessment: Some(OverallAssessment::Worse),
            radiation: Some(RadiationTiming::BeyondWindow),
            components: Some(components),
            extent,
            ..Default::default()
        }
    }

    #[test]
    fn no_prior_is_baseline() {
        let inputs = ScoreInputs {
            suitable_prior: Some(false),
            assessment: Some(OverallAssessment::Worse),
            ..Default::default()
        };
        assert_eq!(derive_score(&inputs).0, BtradsScore::Bt0);
    }

    #[test]
    fn improved_branches() {
        let mut inputs = ScoreInputs {
            suitable_prior: Some(true),
            assessment: Some(OverallAssessment::Improved),
            medication: Some(MedicationRoute::Neither),
            ..Default::default()
        };
        assert_eq!(derive_score(&inputs).0, BtradsScore::Bt1a);

        inputs.medication = Some(MedicationRoute::Avastin);
        assert_eq!(derive_score(&inputs).0, BtradsScore::Bt1b);
        inputs.avastin_response = Some(AvastinResponse::SustainedImprovement);
        assert_eq!(derive_score(&inputs).0, BtradsScore::Bt1a);

        inputs.medication = Some(MedicationRoute::IncreasingSteroids);
        assert_eq!(derive_score(&inputs).0, BtradsScore::Bt1b);
        inputs.steroid_effect_likely = Some(false);
        assert_eq!(derive_score(&inputs).0, BtradsScore::Bt1a);
    }

    #[test]
    fn worse_branches() {
        let mut early = worse_with(ComponentWorsening::Both, Some(Extent::Major));
        early.radiation = Some(RadiationTiming::WithinWindow);
        assert_eq!(derive_score(&early).0, BtradsScore::Bt3a);

        assert_eq!(
            derive_score(&worse_with(ComponentWorsening::One, None)).0,
            BtradsScore::Bt3b
        );
        assert_eq!(
            derive_score(&worse_with(ComponentWorsening::Both, Some(Extent::Major))).0,
            BtradsScore::Bt4
        );

        let mut minor = worse_with(ComponentWorsening::Both, Some(Extent::Minor));
        assert_eq!(derive_score(&minor).0, BtradsScore::Bt3c);
        minor.progressive = Some(true);
        assert_eq!(derive_score(&minor).0, BtradsScore::Bt4);
    }

    #[test]
    fn undetermined_falls_back_to_3b() {
        let (score, why) = derive_score(&ScoreInputs::default());
        assert_eq!(score, BtradsScore::Bt3b);
        assert!(why.starts_with("Indeterminate"));
        assert_eq!(
            derive_score(&worse_with(ComponentWorsening::Both, None)).0,
            BtradsScore::Bt3b
        );
    }
}
