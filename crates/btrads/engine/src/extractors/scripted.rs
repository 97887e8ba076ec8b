//! Fixed answers per node, for scripted runs and tests

use crate::extractor::{ExtractionRequest, Extractor};
use async_trait::async_trait;
use btrads_types::{ExtractedValue, ExtractionResult, ExtractorError, NodeId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Clone, Debug)]
enum Script {
    Answer {
        value: ExtractedValue,
        confidence: f64,
        reasoning: String,
    },
    Fail(ExtractorError),
    /// Fail `failures` times, then answer
    Flaky {
        failures: u32,
        error: ExtractorError,
        value: ExtractedValue,
        confidence: f64,
    },
}

/// Extractor that replays a script
pub struct StaticExtractor {
    name: String,
    scripts: HashMap<NodeId, Script>,
    fallback: Option<Script>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<NodeId, u32>>,
}

impl StaticExtractor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: HashMap::new(),
            fallback: None,
            delay: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Answer `node` with a fixed value
    pub fn answer(self, node: impl Into<NodeId>, value: ExtractedValue, confidence: f64) -> Self {
        let reasoning = format!("Scripted answer: {value}");
        self.answer_with_reasoning(node, value, confidence, reasoning)
    }

    pub fn answer_with_reasoning(
        mut self,
        node: impl Into<NodeId>,
        value: ExtractedValue,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        self.scripts.insert(
            node.into(),
            Script::Answer {
                value,
                confidence,
                reasoning: reasoning.into(),
            },
        );
        self
    }

    /// Fail every call for `node`
    pub fn fail(mut self, node: impl Into<NodeId>, error: ExtractorError) -> Self {
        self.scripts.insert(node.into(), Script::Fail(error));
        self
    }

    /// Fail the first `failures` calls for `node`, then answer
    pub fn flaky(
        mut self,
        node: impl Into<NodeId>,
        failures: u32,
        error: ExtractorError,
        value: ExtractedValue,
        confidence: f64,
    ) -> Self {
        self.scripts.insert(
            node.into(),
            Script::Flaky {
                failures,
                error,
                value,
                confidence,
            },
        );
        self
    }

    /// Fail every node without a script
    pub fn fail_unscripted(mut self, error: ExtractorError) -> Self {
        self.fallback = Some(Script::Fail(error));
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls made for `node` so far
    pub fn calls(&self, node: &NodeId) -> u32 {
        self.call_counts().get(node).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.call_counts().values().sum()
    }

    fn call_counts(&self) -> MutexGuard<'_, HashMap<NodeId, u32>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answered(
        &self,
        node: &NodeId,
        value: &ExtractedValue,
        confidence: f64,
        reasoning: &str,
    ) -> ExtractionResult {
        ExtractionResult::new(
            node.clone(),
            value.clone(),
            confidence,
            reasoning,
            self.name.clone(),
        )
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, ExtractorError> {
        let node = request.node_id();
        let call = {
            let mut counts = self.call_counts();
            let count = counts.entry(node.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .scripts
            .get(node)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ExtractorError::Unsupported(node.clone()))?;

        match script {
            Script::Answer {
                value,
                confidence,
                reasoning,
            } => Ok(self.answered(node, value, *confidence, reasoning)),
            Script::Fail(error) => Err(error.clone()),
            Script::Flaky {
                failures,
                error,
                value,
                confidence,
            } => {
                if call <= *failures {
                    Err(error.clone())
                } else {
                    Ok(self.answered(
                        node,
                        value,
                        *confidence,
                        &format!("Scripted answer after {failures} failures: {value}"),
                    ))
                }
            }
        }
    }
}
