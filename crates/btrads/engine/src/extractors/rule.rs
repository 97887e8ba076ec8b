use crate::extractor::{ExtractionRequest, Extractor};
use async_trait::async_trait;
use btrads_rules::{RuleEngine, RULE_CONFIDENCE};
use btrads_types::{ExtractedValue, ExtractionResult, ExtractorError};

/// Answers rule-bound nodes from quantitative data alone
#[derive(Clone, Debug)]
pub struct RuleExtractor {
    rules: RuleEngine,
    confidence: f64,
}

impl RuleExtractor {
    pub const NAME: &'static str = "rule_engine";

    pub fn new() -> Self {
        Self {
            rules: RuleEngine::new(),
            confidence: RULE_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Default for RuleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for RuleExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, ExtractorError> {
        let rule = request
            .node
            .rule
            .ok_or_else(|| ExtractorError::Unsupported(request.node_id().clone()))?;
        let verdict = self
            .rules
            .evaluate(rule, &request.context)
            .ok_or_else(|| ExtractorError::InsufficientData(format!("no quantitative data for {rule}")))?;

        // An indecisive rule carries no more weight than a missing value
        let (value, confidence) = if verdict.decisive {
            (ExtractedValue::category(&verdict.key), self.confidence)
        } else {
            (ExtractedValue::Unknown, 0.0)
        };
        Ok(ExtractionResult::new(
            request.node_id().clone(),
            value,
            confidence,
            verdict.reasoning,
            Self::NAME,
        )
        .rule_based())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btrads_types::{CaseId, ClinicalContext, DecisionNode, PatientRecord, RuleKind};

    fn request(rule: Option<RuleKind>, record: PatientRecord) -> ExtractionRequest {
        let mut node = DecisionNode::extraction("n", "N", "x").otherwise("end");
        node.rule = rule;
        ExtractionRequest::new(CaseId::new("c"), node, ClinicalContext::from_record(&record))
    }

    #[tokio::test]
    async fn decisive_rule_answers() {
        let req = request(
            Some(RuleKind::OverallAssessment),
            PatientRecord::new("p").with_change_pct(30.0, 35.0),
        );
        let result = RuleExtractor::new().extract(&req).await.unwrap();
        assert_eq!(result.decision_key(), "worse");
        assert!(result.rule_applied);
        assert_eq!(result.confidence, RULE_CONFIDENCE);
    }

    #[tokio::test]
    async fn indecisive_rule_has_no_confidence() {
        let req = request(
            Some(RuleKind::ExtentThreshold),
            PatientRecord::new("p").with_change_pct(-5.0, -8.0),
        );
        let result = RuleExtractor::new().extract(&req).await.unwrap();
        assert!(result.value.is_unknown());
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn missing_data_is_insufficient() {
        let req = request(Some(RuleKind::ExtentThreshold), PatientRecord::new("p"));
        let err = RuleExtractor::new().extract(&req).await.unwrap_err();
        assert!(matches!(err, ExtractorError::InsufficientData(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn node_without_rule_is_unsupported() {
        let req = request(None, PatientRecord::new("p").with_change_pct(1.0, 1.0));
        let err = RuleExtractor::new().extract(&req).await.unwrap_err();
        assert!(matches!(err, ExtractorError::Unsupported(_)));
    }
}
