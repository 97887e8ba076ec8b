//! Error types for the BT-RADS engine

use crate::{CaseId, NodeId, ValidationToken};

/// Errors raised by graph construction, case execution and the validation gate
#[derive(Debug, thiserror::Error)]
pub enum BtradsError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Duplicate node ID: {0}")]
    DuplicateNodeId(NodeId),

    #[error("Graph has no nodes")]
    EmptyGraph,

    #[error("Entry node not found: {0}")]
    EntryNotFound(NodeId),

    #[error("Dangling transition: {from} --[{key}]--> {to}")]
    DanglingTransition {
        from: NodeId,
        key: String,
        to: NodeId,
    },

    #[error("Transition key '{key}' on node {node} can never match; write it as '{expected}'")]
    UnnormalizedKey {
        node: NodeId,
        key: String,
        expected: String,
    },

    #[error("Node unreachable from entry: {0}")]
    UnreachableNode(NodeId),

    #[error("Cycle detected in decision graph at node: {0}")]
    CycleDetected(NodeId),

    #[error("Longest path has {length} hops, limit is {limit}")]
    PathTooLong { length: usize, limit: usize },

    #[error("Terminal node has no score: {0}")]
    MissingScore(NodeId),

    #[error("Terminal node has outgoing transitions: {0}")]
    TerminalWithTransitions(NodeId),

    #[error("Non-terminal node has no default transition: {0}")]
    MissingDefault(NodeId),

    #[error("Extraction node has no extractor reference: {0}")]
    MissingExtractorRef(NodeId),

    #[error("Decision node has no rule: {0}")]
    MissingRule(NodeId),

    #[error("No extractor registered for '{extractor}' (node {node})")]
    ExtractorNotRegistered { node: NodeId, extractor: String },

    #[error("Node {0} is terminal and has no successors")]
    TerminalNode(NodeId),

    #[error("Case {case_id} already has a pending validation at node {node}")]
    ValidationAlreadyPending { case_id: CaseId, node: NodeId },

    #[error("Validation ID mismatch: expected {expected}, got {got}")]
    ValidationTokenMismatch {
        expected: ValidationToken,
        got: ValidationToken,
    },

    #[error("No validation pending")]
    NoPendingValidation,

    #[error("Validation aborted at node {0}")]
    ValidationAborted(NodeId),

    #[error("Validation timed out at node {0}")]
    ValidationTimeout(NodeId),

    #[error("Hop limit {0} exceeded")]
    HopLimitExceeded(usize),

    #[error("Decision graph validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, BtradsError>;

/// Failure modes of an extractor call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),

    #[error("extraction timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("malformed extractor output: {0}")]
    Malformed(String),

    #[error("extractor does not handle node {0}")]
    Unsupported(NodeId),

    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

impl ExtractorError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractorError::Unavailable(_) | ExtractorError::Timeout { .. } | ExtractorError::Malformed(_)
        )
    }
}
