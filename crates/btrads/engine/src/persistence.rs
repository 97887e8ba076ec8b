//! Case event sink
//!
//! Every recorded node and every final result is offered to a sink. Sink
//! failures are logged and never change the outcome of a case.

use async_trait::async_trait;
use btrads_types::{BtradsResult, CaseId, NodeId, NodeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One persisted node outcome
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub case_id: CaseId,
    pub node_id: NodeId,
    pub record: NodeRecord,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait CaseEventSink: Send + Sync {
    async fn record_node(
        &self,
        case_id: &CaseId,
        node_id: &NodeId,
        record: &NodeRecord,
        at: DateTime<Utc>,
    ) -> Result<(), SinkError>;

    async fn record_result(&self, result: &BtradsResult) -> Result<(), SinkError>;
}

/// Drops everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl CaseEventSink for NullSink {
    async fn record_node(
        &self,
        _case_id: &CaseId,
        _node_id: &NodeId,
        _record: &NodeRecord,
        _at: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    async fn record_result(&self, _result: &BtradsResult) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps events and results in memory, for tests and single-run tools
#[derive(Debug, Default)]
pub struct InMemoryCaseStore {
    events: Mutex<Vec<NodeEvent>>,
    results: Mutex<HashMap<CaseId, BtradsResult>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> MutexGuard<'_, Vec<NodeEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn results(&self) -> MutexGuard<'_, HashMap<CaseId, BtradsResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Node events of one case, in recording order
    pub fn events_for(&self, case_id: &CaseId) -> Vec<NodeEvent> {
        self.events()
            .iter()
            .filter(|e| &e.case_id == case_id)
            .cloned()
            .collect()
    }

    pub fn result_for(&self, case_id: &CaseId) -> Option<BtradsResult> {
        self.results().get(case_id).cloned()
    }

    pub fn result_count(&self) -> usize {
        self.results().len()
    }

    /// All results as pretty JSON, ordered by case id
    pub fn export_json(&self) -> Result<String, SinkError> {
        let results = self.results();
        let mut ordered: Vec<&BtradsResult> = results.values().collect();
        ordered.sort_by(|a, b| a.case_id.0.cmp(&b.case_id.0));
        Ok(serde_json::to_string_pretty(&ordered)?)
    }
}

#[async_trait]
impl CaseEventSink for InMemoryCaseStore {
    async fn record_node(
        &self,
        case_id: &CaseId,
        node_id: &NodeId,
        record: &NodeRecord,
        at: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        self.events().push(NodeEvent {
            case_id: case_id.clone(),
            node_id: node_id.clone(),
            record: record.clone(),
            at,
        });
        Ok(())
    }

    async fn record_result(&self, result: &BtradsResult) -> Result<(), SinkError> {
        self.results().insert(result.case_id.clone(), result.clone());
        Ok(())
    }
}
