//! Status events for UIs and monitors

use btrads_types::{BtradsScore, CaseId, NodeId, PendingValidation};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Progress of one case
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    ProcessingStarted {
        case_id: CaseId,
        patient_id: String,
    },
    NodeActivated {
        case_id: CaseId,
        node_id: NodeId,
        label: String,
    },
    ExtractionComplete {
        case_id: CaseId,
        node_id: NodeId,
        value: String,
        confidence: f64,
        rule_applied: bool,
    },
    ValidationRequired {
        pending: PendingValidation,
    },
    ValidationComplete {
        case_id: CaseId,
        node_id: NodeId,
        modified: bool,
    },
    NodeFailed {
        case_id: CaseId,
        node_id: NodeId,
        error: String,
    },
    Completed {
        case_id: CaseId,
        score: BtradsScore,
        confidence: f64,
    },
}

impl StatusEvent {
    pub fn case_id(&self) -> &CaseId {
        match self {
            StatusEvent::ProcessingStarted { case_id, .. }
            | StatusEvent::NodeActivated { case_id, .. }
            | StatusEvent::ExtractionComplete { case_id, .. }
            | StatusEvent::ValidationComplete { case_id, .. }
            | StatusEvent::NodeFailed { case_id, .. }
            | StatusEvent::Completed { case_id, .. } => case_id,
            StatusEvent::ValidationRequired { pending } => &pending.case_id,
        }
    }
}

/// Receives status events; must not block the case
pub trait StatusNotifier: Send + Sync {
    fn notify(&self, event: StatusEvent);
}

/// Fan-out over a tokio broadcast channel
#[derive(Clone, Debug)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl StatusNotifier for BroadcastNotifier {
    fn notify(&self, event: StatusEvent) {
        // No subscribers is fine
        if self.sender.send(event).is_err() {
            tracing::trace!("Status event dropped, no subscribers");
        }
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl StatusNotifier for NoopNotifier {
    fn notify(&self, _event: StatusEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe();
        notifier.notify(StatusEvent::ProcessingStarted {
            case_id: CaseId::new("c"),
            patient_id: "p".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.case_id(), &CaseId::new("c"));
    }

    #[test]
    fn send_without_subscribers_is_silent() {
        BroadcastNotifier::new(4).notify(StatusEvent::Completed {
            case_id: CaseId::new("c"),
            score: BtradsScore::Bt2,
            confidence: 0.9,
        });
    }

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(StatusEvent::NodeFailed {
            case_id: CaseId::new("c"),
            node_id: NodeId::new("n"),
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "node_failed");
    }
}
