//! Extractor contract and registry
//!
//! An extractor turns clinical text plus context into a typed value for one
//! node. Extractors are registered by name and resolved against a graph
//! once, when the orchestrator is built; a graph that names an unregistered
//! extractor never gets to run a case.

use async_trait::async_trait;
use btrads_types::{
    BtradsError, CaseId, ClinicalContext, DecisionGraph, DecisionNode, EngineResult,
    ExtractedValue, ExtractionResult, ExtractorError, NodeId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Everything an extractor may look at for one node
#[derive(Clone, Debug)]
pub struct ExtractionRequest {
    pub case_id: CaseId,
    pub node: DecisionNode,
    pub context: ClinicalContext,
    /// Values already decided on this case, by node
    pub prior_values: BTreeMap<NodeId, ExtractedValue>,
    /// 1-based attempt number
    pub attempt: u32,
}

impl ExtractionRequest {
    pub fn new(case_id: CaseId, node: DecisionNode, context: ClinicalContext) -> Self {
        Self {
            case_id,
            node,
            context,
            prior_values: BTreeMap::new(),
            attempt: 1,
        }
    }

    pub fn with_prior_values(mut self, prior: BTreeMap<NodeId, ExtractedValue>) -> Self {
        self.prior_values = prior;
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    /// Extractor ref of the node, empty for nodes without one
    pub fn extractor_ref(&self) -> &str {
        self.node.extractor.as_ref().map_or("", |e| e.0.as_str())
    }

    pub fn clinical_note(&self) -> &str {
        &self.context.clinical_note
    }
}

/// Produces a typed value for an extraction node.
///
/// Calls must be safe to retry; the orchestrator bounds each one with a
/// timeout and may call again after a retryable error.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Label recorded as the source of results
    fn name(&self) -> &str;

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, ExtractorError>;
}

/// Extractors by registered name
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extractor under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(name.into(), extractor);
    }

    pub fn with(mut self, name: impl Into<String>, extractor: Arc<dyn Extractor>) -> Self {
        self.register(name, extractor);
        self
    }

    /// Register one extractor under several names
    pub fn with_all<'a>(
        mut self,
        names: impl IntoIterator<Item = &'a str>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        for name in names {
            self.register(name, extractor.clone());
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extractors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Bind every extraction node of `graph` to its extractor
    pub fn resolve(&self, graph: &DecisionGraph) -> EngineResult<ResolvedExtractors> {
        let mut by_node = HashMap::new();
        for (node_id, extractor_ref) in graph.extractor_refs() {
            let extractor = self.extractors.get(&extractor_ref.0).ok_or_else(|| {
                BtradsError::ExtractorNotRegistered {
                    node: node_id.clone(),
                    extractor: extractor_ref.0.clone(),
                }
            })?;
            by_node.insert(node_id.clone(), extractor.clone());
        }
        Ok(ResolvedExtractors { by_node })
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.names())
            .finish()
    }
}

/// Node-indexed extractor table for one graph
#[derive(Clone)]
pub struct ResolvedExtractors {
    by_node: HashMap<NodeId, Arc<dyn Extractor>>,
}

impl ResolvedExtractors {
    pub fn get(&self, node_id: &NodeId) -> Option<&Arc<dyn Extractor>> {
        self.by_node.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

impl std::fmt::Debug for ResolvedExtractors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<(&str, &str)> = self
            .by_node
            .iter()
            .map(|(id, e)| (id.as_str(), e.name()))
            .collect();
        nodes.sort_unstable();
        f.debug_struct("ResolvedExtractors").field("nodes", &nodes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::StaticExtractor;
    use crate::reference_graph::{reference_graph, EXTRACTOR_REFS, PRIOR_ASSESSMENT};

    #[test]
    fn resolves_every_extraction_node() {
        let graph = reference_graph().unwrap();
        let registry =
            ExtractorRegistry::new().with_all(EXTRACTOR_REFS, Arc::new(StaticExtractor::new("s")));
        let resolved = registry.resolve(&graph).unwrap();
        assert_eq!(resolved.len(), 9);
    }

    #[test]
    fn missing_extractor_is_fatal() {
        let graph = reference_graph().unwrap();
        let registry = ExtractorRegistry::new().with(PRIOR_ASSESSMENT, Arc::new(StaticExtractor::new("s")));
        let err = registry.resolve(&graph).unwrap_err();
        assert!(matches!(err, BtradsError::ExtractorNotRegistered { .. }));
    }
}
