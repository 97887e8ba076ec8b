//! The reference BT-RADS algorithm
//!
//! Nine extraction nodes and eight outcomes. Every fallback edge points at
//! the conservative outcome for its branch.

use btrads_rules::{
    AvastinResponse, ComponentWorsening, Extent, MedicationRoute, OverallAssessment,
    RadiationTiming, ScoreInputs,
};
use btrads_types::{
    BtradsScore, CaseState, DecisionGraph, DecisionNode, EngineResult, ExtractedValue,
    GraphDefinition, NodeRecord, RuleKind,
};

pub const REFERENCE_GRAPH_NAME: &str = "bt-rads";

// ── Node ids ─────────────────────────────────────────────────────────

pub const SUITABLE_PRIOR: &str = "node_1_suitable_prior";
pub const IMAGING_ASSESSMENT: &str = "node_2_imaging_assessment";
pub const MEDICATIONS: &str = "node_3a_medications";
pub const AVASTIN_RESPONSE: &str = "node_3b_avastin_response";
pub const STEROID_EFFECTS: &str = "node_3c_steroid_effects";
pub const TIME_SINCE_XRT: &str = "node_4_time_since_xrt";
pub const WHAT_IS_WORSE: &str = "node_5_what_is_worse";
pub const HOW_MUCH_WORSE: &str = "node_6_how_much_worse";
pub const PROGRESSIVE: &str = "node_7_progressive";

pub const OUTCOME_BT_0: &str = "outcome_bt_0";
pub const OUTCOME_BT_1A: &str = "outcome_bt_1a";
pub const OUTCOME_BT_1B: &str = "outcome_bt_1b";
pub const OUTCOME_BT_2: &str = "outcome_bt_2";
pub const OUTCOME_BT_3A: &str = "outcome_bt_3a";
pub const OUTCOME_BT_3B: &str = "outcome_bt_3b";
pub const OUTCOME_BT_3C: &str = "outcome_bt_3c";
pub const OUTCOME_BT_4: &str = "outcome_bt_4";

// ── Extractor refs ───────────────────────────────────────────────────

pub const PRIOR_ASSESSMENT: &str = "prior_assessment";
pub const IMAGING_COMPARISON: &str = "imaging_comparison";
pub const MEDICATION_EFFECTS: &str = "medication_effects";
pub const AVASTIN_RESPONSE_REF: &str = "avastin_response";
pub const STEROID_EFFECTS_REF: &str = "steroid_effects";
pub const RADIATION_TIMELINE: &str = "radiation_timeline";
pub const COMPONENT_ANALYSIS: &str = "component_analysis";
pub const EXTENT_ANALYSIS: &str = "extent_analysis";
pub const PROGRESSION_PATTERN: &str = "progression_pattern";

/// Every extractor ref used by the reference graph
pub const EXTRACTOR_REFS: [&str; 9] = [
    PRIOR_ASSESSMENT,
    IMAGING_COMPARISON,
    MEDICATION_EFFECTS,
    AVASTIN_RESPONSE_REF,
    STEROID_EFFECTS_REF,
    RADIATION_TIMELINE,
    COMPONENT_ANALYSIS,
    EXTENT_ANALYSIS,
    PROGRESSION_PATTERN,
];

/// Unvalidated reference definition, for export or editing
pub fn reference_definition() -> EngineResult<GraphDefinition> {
    GraphDefinition::new(REFERENCE_GRAPH_NAME, SUITABLE_PRIOR)
        .with_node(
            DecisionNode::extraction(SUITABLE_PRIOR, "Suitable Prior?", PRIOR_ASSESSMENT)
                .with_description("Determine if suitable prior imaging is available")
                .on("yes", IMAGING_ASSESSMENT)
                .on("no", OUTCOME_BT_0)
                .otherwise(IMAGING_ASSESSMENT),
        )?
        .with_node(
            DecisionNode::extraction(IMAGING_ASSESSMENT, "Imaging Assessment", IMAGING_COMPARISON)
                .with_description("Compare current with prior imaging")
                .with_rule(RuleKind::OverallAssessment)
                .on("improved", MEDICATIONS)
                .on("unchanged", OUTCOME_BT_2)
                .on("worse", TIME_SINCE_XRT)
                .otherwise(OUTCOME_BT_2),
        )?
        .with_node(
            DecisionNode::extraction(MEDICATIONS, "On Medications?", MEDICATION_EFFECTS)
                .with_description("Check for Avastin or increasing steroids")
                .on("avastin", AVASTIN_RESPONSE)
                .on("increasing_steroids", STEROID_EFFECTS)
                .on("neither", OUTCOME_BT_1A)
                .otherwise(OUTCOME_BT_1A),
        )?
        .with_node(
            DecisionNode::extraction(AVASTIN_RESPONSE, "Avastin Response Type", AVASTIN_RESPONSE_REF)
                .with_description("Determine type of Avastin response")
                .on("first_study_enh_only", OUTCOME_BT_1B)
                .on("sustained_improvement", OUTCOME_BT_1A)
                .otherwise(OUTCOME_BT_1B),
        )?
        .with_node(
            DecisionNode::extraction(STEROID_EFFECTS, "Steroid Effect Likely?", STEROID_EFFECTS_REF)
                .with_description("Determine if steroids explain improvement")
                .on("likely_steroid_effect", OUTCOME_BT_1B)
                .on("unlikely_steroid_effect", OUTCOME_BT_1A)
                .otherwise(OUTCOME_BT_1B),
        )?
        .with_node(
            DecisionNode::extraction(TIME_SINCE_XRT, "Time Since XRT", RADIATION_TIMELINE)
                .with_description("Check if within 90 days of radiation")
                .with_rule(RuleKind::RadiationTiming)
                .on("within_90_days", OUTCOME_BT_3A)
                .on("beyond_90_days", WHAT_IS_WORSE)
                .otherwise(WHAT_IS_WORSE),
        )?
        .with_node(
            DecisionNode::extraction(WHAT_IS_WORSE, "What is Worse?", COMPONENT_ANALYSIS)
                .with_description("Determine which components are worse")
                .with_rule(RuleKind::ComponentWorsening)
                .on("flair_or_enh", OUTCOME_BT_3B)
                .on("flair_and_enh", HOW_MUCH_WORSE)
                .otherwise(OUTCOME_BT_3B),
        )?
        .with_node(
            DecisionNode::extraction(HOW_MUCH_WORSE, "How Much Worse?", EXTENT_ANALYSIS)
                .with_description("Apply 40% threshold rule")
                .with_rule(RuleKind::ExtentThreshold)
                .on("major", OUTCOME_BT_4)
                .on("minor", PROGRESSIVE)
                .otherwise(OUTCOME_BT_3C),
        )?
        .with_node(
            DecisionNode::extraction(PROGRESSIVE, "Progressive?", PROGRESSION_PATTERN)
                .with_description("Check for progression over multiple studies")
                .on("yes", OUTCOME_BT_4)
                .on("no", OUTCOME_BT_3C)
                .otherwise(OUTCOME_BT_3C),
        )?
        .with_node(DecisionNode::terminal(OUTCOME_BT_0, BtradsScore::Bt0))?
        .with_node(DecisionNode::terminal(OUTCOME_BT_1A, BtradsScore::Bt1a))?
        .with_node(DecisionNode::terminal(OUTCOME_BT_1B, BtradsScore::Bt1b))?
        .with_node(DecisionNode::terminal(OUTCOME_BT_2, BtradsScore::Bt2))?
        .with_node(DecisionNode::terminal(OUTCOME_BT_3A, BtradsScore::Bt3a))?
        .with_node(DecisionNode::terminal(OUTCOME_BT_3B, BtradsScore::Bt3b))?
        .with_node(DecisionNode::terminal(OUTCOME_BT_3C, BtradsScore::Bt3c))?
        .with_node(DecisionNode::terminal(OUTCOME_BT_4, BtradsScore::Bt4))
}

/// The validated reference graph
pub fn reference_graph() -> EngineResult<DecisionGraph> {
    reference_definition()?.build()
}

// ── Path summary ─────────────────────────────────────────────────────

/// Clinically meaningful digest of a finished path
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathSummary {
    /// `None` when no scoring-relevant node was visited
    pub score_inputs: Option<ScoreInputs>,
    pub volume_assessment: Option<String>,
    pub medication_effects: Option<String>,
}

/// Collect score-table inputs from the nodes a case visited.
///
/// Nodes are recognized by extractor ref, so any graph built from the
/// standard extractors can be cross-checked against the score table.
pub fn summarize_path(graph: &DecisionGraph, case: &CaseState) -> PathSummary {
    let mut inputs = ScoreInputs::default();
    let mut summary = PathSummary::default();
    let mut relevant = false;

    for step in &case.visited_path {
        let (Ok(node), Some(record)) = (graph.get(&step.node_id), case.result(&step.node_id)) else {
            continue;
        };
        let key = record.decision_key();
        let topic = node
            .extractor
            .as_ref()
            .map(|e| e.0.as_str())
            .or_else(|| node.rule.map(rule_topic));
        let Some(topic) = topic else {
            continue;
        };

        match topic {
            PRIOR_ASSESSMENT => inputs.suitable_prior = yes_no(&key),
            IMAGING_COMPARISON => {
                inputs.assessment = OverallAssessment::from_key(&key);
                summary.volume_assessment = Some(record.reasoning());
            }
            MEDICATION_EFFECTS => {
                inputs.medication = MedicationRoute::from_key(&key);
                summary.medication_effects = Some(describe_medication(record));
            }
            AVASTIN_RESPONSE_REF => inputs.avastin_response = AvastinResponse::from_key(&key),
            STEROID_EFFECTS_REF => {
                inputs.steroid_effect_likely = match key.as_str() {
                    "likely_steroid_effect" => Some(true),
                    "unlikely_steroid_effect" => Some(false),
                    _ => None,
                }
            }
            RADIATION_TIMELINE => inputs.radiation = RadiationTiming::from_key(&key),
            COMPONENT_ANALYSIS => inputs.components = ComponentWorsening::from_key(&key),
            EXTENT_ANALYSIS => inputs.extent = Extent::from_key(&key),
            PROGRESSION_PATTERN => inputs.progressive = yes_no(&key),
            _ => continue,
        }
        relevant = true;
    }

    summary.score_inputs = relevant.then_some(inputs);
    summary
}

fn rule_topic(rule: RuleKind) -> &'static str {
    match rule {
        RuleKind::OverallAssessment => IMAGING_COMPARISON,
        RuleKind::RadiationTiming => RADIATION_TIMELINE,
        RuleKind::ComponentWorsening => COMPONENT_ANALYSIS,
        RuleKind::ExtentThreshold => EXTENT_ANALYSIS,
    }
}

fn yes_no(key: &str) -> Option<bool> {
    match key {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

fn describe_medication(record: &NodeRecord) -> String {
    match record.value() {
        ExtractedValue::Medication(m) => match &m.details {
            Some(details) => format!("{} ({details})", record.value()),
            None => record.value().to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btrads_types::{normalize_key, NodeKind, UNKNOWN_KEY};

    #[test]
    fn reference_graph_is_valid() {
        let graph = reference_graph().unwrap();
        assert_eq!(graph.node_count(), 17);
        assert_eq!(graph.terminals().count(), 8);
        assert_eq!(graph.depth(), 6);
        assert!(graph.depth() <= graph.max_hops());
        assert_eq!(graph.extractor_refs().count(), 9);
    }

    #[test]
    fn every_score_has_exactly_one_outcome() {
        let graph = reference_graph().unwrap();
        for score in BtradsScore::ALL {
            assert_eq!(
                graph.terminals().filter(|n| n.score == Some(score)).count(),
                1,
                "{score}"
            );
        }
    }

    #[test]
    fn routing_is_total() {
        let graph = reference_graph().unwrap();
        for node in graph.nodes().filter(|n| n.kind != NodeKind::Terminal) {
            let mut keys: Vec<String> = node.keys().map(str::to_string).collect();
            keys.push(UNKNOWN_KEY.into());
            keys.push("something else entirely".into());
            for key in keys {
                let next = graph.next(&node.id, &key).unwrap();
                assert!(graph.contains(next), "{} --{}--> {}", node.id, key, next);
            }
        }
    }

    #[test]
    fn fallbacks_are_conservative() {
        let graph = reference_graph().unwrap();
        let fallback = |id: &str| graph.next(&id.into(), UNKNOWN_KEY).unwrap().0.clone();
        assert_eq!(fallback(SUITABLE_PRIOR), IMAGING_ASSESSMENT);
        assert_eq!(fallback(IMAGING_ASSESSMENT), OUTCOME_BT_2);
        assert_eq!(fallback(MEDICATIONS), OUTCOME_BT_1A);
        assert_eq!(fallback(AVASTIN_RESPONSE), OUTCOME_BT_1B);
        assert_eq!(fallback(STEROID_EFFECTS), OUTCOME_BT_1B);
        assert_eq!(fallback(TIME_SINCE_XRT), WHAT_IS_WORSE);
        assert_eq!(fallback(WHAT_IS_WORSE), OUTCOME_BT_3B);
        assert_eq!(fallback(HOW_MUCH_WORSE), OUTCOME_BT_3C);
        assert_eq!(fallback(PROGRESSIVE), OUTCOME_BT_3C);
    }

    #[test]
    fn keys_are_normalized() {
        let graph = reference_graph().unwrap();
        for node in graph.nodes() {
            for key in node.keys() {
                assert_eq!(key, normalize_key(key));
            }
        }
    }
}
