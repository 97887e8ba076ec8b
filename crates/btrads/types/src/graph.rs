//! Decision graphs: the static BT-RADS algorithm
//!
//! A `GraphDefinition` is an editable list of nodes. Validating it produces
//! a `DecisionGraph`, which is indexed, read-only and meant to be shared
//! across concurrently running cases behind an `Arc`.
//!
//! Every non-terminal node carries a default transition, so routing on any
//! key (including "unknown") always lands on an existing node.

use crate::{BtradsError, BtradsScore, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Hop bound of the reference algorithm
pub const DEFAULT_MAX_HOPS: usize = 8;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a graph node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name under which an extractor is registered
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractorRef(pub String);

impl ExtractorRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for ExtractorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a decision value into a transition key.
///
/// Lowercases, trims and folds spaces and hyphens into underscores, so
/// "Flair and Enh" and "flair_and_enh" route identically.
pub fn normalize_key(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

// ── Node ─────────────────────────────────────────────────────────────

/// The role a node plays in the algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Value comes from an extractor, optionally overridden by a rule
    Extraction,
    /// Value comes only from a rule
    Decision,
    /// Carries the final score
    Terminal,
}

/// Deterministic rule a node may be bound to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// improved / unchanged / worse from FLAIR and enhancement change
    OverallAssessment,
    /// within / beyond the 90-day post-radiation window
    RadiationTiming,
    /// one or both components worse
    ComponentWorsening,
    /// 40% extent threshold
    ExtentThreshold,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleKind::OverallAssessment => "overall_assessment",
            RuleKind::RadiationTiming => "radiation_timing",
            RuleKind::ComponentWorsening => "component_worsening",
            RuleKind::ExtentThreshold => "extent_threshold",
        };
        f.write_str(name)
    }
}

/// A node in the decision graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: NodeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub kind: NodeKind,
    /// Normalized value key -> next node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transitions: BTreeMap<String, NodeId>,
    /// Taken when no transition matches the value key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_next: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extractor: Option<ExtractorRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<BtradsScore>,
}

impl DecisionNode {
    fn bare(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(id),
            label: label.into(),
            description: String::new(),
            kind,
            transitions: BTreeMap::new(),
            default_next: None,
            extractor: None,
            rule: None,
            score: None,
        }
    }

    /// Create an extraction node served by the named extractor
    pub fn extraction(
        id: impl Into<String>,
        label: impl Into<String>,
        extractor: impl Into<String>,
    ) -> Self {
        let mut node = Self::bare(id, label, NodeKind::Extraction);
        node.extractor = Some(ExtractorRef::new(extractor));
        node
    }

    /// Create a rule-only decision node
    pub fn decision(id: impl Into<String>, label: impl Into<String>, rule: RuleKind) -> Self {
        let mut node = Self::bare(id, label, NodeKind::Decision);
        node.rule = Some(rule);
        node
    }

    /// Create a terminal node carrying a score
    pub fn terminal(id: impl Into<String>, score: BtradsScore) -> Self {
        let mut node = Self::bare(id, score.label(), NodeKind::Terminal);
        node.description = score.description().to_string();
        node.score = Some(score);
        node
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Bind a rule that may override the extractor on this node
    pub fn with_rule(mut self, rule: RuleKind) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Add a transition taken when the value key matches
    pub fn on(mut self, key: &str, target: impl Into<String>) -> Self {
        self.transitions.insert(normalize_key(key), NodeId::new(target));
        self
    }

    /// Set the fallback transition
    pub fn otherwise(mut self, target: impl Into<String>) -> Self {
        self.default_next = Some(NodeId::new(target));
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == NodeKind::Terminal
    }

    /// Route a value key: exact match on the normalized key, else the default
    pub fn route(&self, key: &str) -> Option<&NodeId> {
        self.transitions
            .get(&normalize_key(key))
            .or(self.default_next.as_ref())
    }

    /// Distinct successor ids in deterministic order
    pub fn successors(&self) -> Vec<&NodeId> {
        let mut out: Vec<&NodeId> = Vec::new();
        for target in self.transitions.values().chain(self.default_next.iter()) {
            if !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }

    /// Transition keys this node understands
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.transitions.keys().map(String::as_str)
    }
}

// ── Graph Definition ─────────────────────────────────────────────────

/// An editable, unvalidated graph
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub name: String,
    pub entry: NodeId,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    pub nodes: Vec<DecisionNode>,
}

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

impl GraphDefinition {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: NodeId::new(entry),
            max_hops: DEFAULT_MAX_HOPS,
            nodes: Vec::new(),
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Add a node, rejecting duplicate ids
    pub fn add_node(&mut self, node: DecisionNode) -> EngineResult<()> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(BtradsError::DuplicateNodeId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn with_node(mut self, node: DecisionNode) -> EngineResult<Self> {
        self.add_node(node)?;
        Ok(self)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&DecisionNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Validate structure and freeze into a `DecisionGraph`
    pub fn build(self) -> EngineResult<DecisionGraph> {
        DecisionGraph::new(self)
    }

    /// Check structural correctness without consuming the definition
    pub fn validate(&self) -> EngineResult<()> {
        if self.nodes.is_empty() {
            return Err(BtradsError::EmptyGraph);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(BtradsError::DuplicateNodeId(node.id.clone()));
            }
        }

        if !seen.contains(&self.entry) {
            return Err(BtradsError::EntryNotFound(self.entry.clone()));
        }

        for node in &self.nodes {
            self.validate_node(node, &seen)?;
        }

        let reachable = self.reachable_from(&self.entry);
        if let Some(orphan) = self.nodes.iter().find(|n| !reachable.contains(&n.id)) {
            return Err(BtradsError::UnreachableNode(orphan.id.clone()));
        }

        let length = self.longest_path()?;
        if length > self.max_hops {
            return Err(BtradsError::PathTooLong {
                length,
                limit: self.max_hops,
            });
        }

        Ok(())
    }

    fn validate_node(&self, node: &DecisionNode, known: &HashSet<&NodeId>) -> EngineResult<()> {
        match node.kind {
            NodeKind::Terminal => {
                if node.score.is_none() {
                    return Err(BtradsError::MissingScore(node.id.clone()));
                }
                if !node.transitions.is_empty() || node.default_next.is_some() {
                    return Err(BtradsError::TerminalWithTransitions(node.id.clone()));
                }
            }
            NodeKind::Extraction => {
                if node.extractor.is_none() {
                    return Err(BtradsError::MissingExtractorRef(node.id.clone()));
                }
            }
            NodeKind::Decision => {
                if node.rule.is_none() {
                    return Err(BtradsError::MissingRule(node.id.clone()));
                }
            }
        }

        if node.kind != NodeKind::Terminal && node.default_next.is_none() {
            return Err(BtradsError::MissingDefault(node.id.clone()));
        }

        for (key, target) in &node.transitions {
            // lookups are normalized, so a raw key would be dead
            let expected = normalize_key(key);
            if &expected != key {
                return Err(BtradsError::UnnormalizedKey {
                    node: node.id.clone(),
                    key: key.clone(),
                    expected,
                });
            }
            if !known.contains(target) {
                return Err(BtradsError::DanglingTransition {
                    from: node.id.clone(),
                    key: key.clone(),
                    to: target.clone(),
                });
            }
        }
        if let Some(target) = &node.default_next {
            if !known.contains(target) {
                return Err(BtradsError::DanglingTransition {
                    from: node.id.clone(),
                    key: "default".into(),
                    to: target.clone(),
                });
            }
        }
        Ok(())
    }

    fn reachable_from(&self, start: &NodeId) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        let mut stack = vec![start.clone()];

        while let Some(current) = stack.pop() {
            if visited.insert(current.clone()) {
                if let Some(node) = self.get_node(&current) {
                    for next in node.successors() {
                        if !visited.contains(next) {
                            stack.push(next.clone());
                        }
                    }
                }
            }
        }

        visited
    }

    /// Longest entry-to-terminal path in hops; errors on a cycle
    fn longest_path(&self) -> EngineResult<usize> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done(usize),
        }

        fn visit(
            def: &GraphDefinition,
            id: &NodeId,
            marks: &mut HashMap<NodeId, Mark>,
        ) -> EngineResult<usize> {
            match marks.get(id) {
                Some(Mark::Done(depth)) => return Ok(*depth),
                Some(Mark::Visiting) => return Err(BtradsError::CycleDetected(id.clone())),
                None => {}
            }
            marks.insert(id.clone(), Mark::Visiting);

            let node = def
                .get_node(id)
                .ok_or_else(|| BtradsError::NodeNotFound(id.clone()))?;
            let mut depth = 0;
            for next in node.successors() {
                depth = depth.max(visit(def, next, marks)? + 1);
            }

            marks.insert(id.clone(), Mark::Done(depth));
            Ok(depth)
        }

        let mut marks = HashMap::new();
        visit(self, &self.entry, &mut marks)
    }
}

// ── Validated Graph ──────────────────────────────────────────────────

/// A validated, read-only decision graph
#[derive(Clone, Debug)]
pub struct DecisionGraph {
    definition: GraphDefinition,
    index: HashMap<NodeId, usize>,
    depth: usize,
}

impl DecisionGraph {
    /// Validate a definition and index it
    pub fn new(definition: GraphDefinition) -> EngineResult<Self> {
        definition.validate()?;
        let depth = definition.longest_path()?;
        let index = definition
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Ok(Self {
            definition,
            index,
            depth,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn entry(&self) -> &NodeId {
        &self.definition.entry
    }

    pub fn max_hops(&self) -> usize {
        self.definition.max_hops
    }

    /// Longest entry-to-terminal path in hops
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DecisionNode> {
        self.definition.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.definition.nodes.len()
    }

    pub fn get(&self, id: &NodeId) -> EngineResult<&DecisionNode> {
        self.index
            .get(id)
            .map(|&i| &self.definition.nodes[i])
            .ok_or_else(|| BtradsError::NodeNotFound(id.clone()))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Next node for a value key at `id`.
    ///
    /// Exact match on the normalized key, otherwise the node's default.
    pub fn next(&self, id: &NodeId, key: &str) -> EngineResult<&NodeId> {
        let node = self.get(id)?;
        if node.is_terminal() {
            return Err(BtradsError::TerminalNode(id.clone()));
        }
        node.route(key)
            .ok_or_else(|| BtradsError::MissingDefault(id.clone()))
    }

    /// Terminal nodes in definition order
    pub fn terminals(&self) -> impl Iterator<Item = &DecisionNode> {
        self.nodes().filter(|n| n.is_terminal())
    }

    /// Nodes that use the named extractor
    pub fn extractor_refs(&self) -> impl Iterator<Item = (&NodeId, &ExtractorRef)> {
        self.nodes()
            .filter_map(|n| n.extractor.as_ref().map(|e| (&n.id, e)))
    }
}
