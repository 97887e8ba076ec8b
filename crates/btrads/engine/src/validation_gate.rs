//! Validation gate: human-in-the-loop confirmation of extraction results
//!
//! A case parks a proposed result here and waits. A validator (CLI, API,
//! test) resolves it by case id and token. Each case holds at most one
//! pending request; the slot is claimed and released under one lock, so a
//! second request on the same case is refused instead of clobbering the
//! first.

use btrads_types::{
    BtradsError, CaseId, EngineResult, ExtractedValue, ExtractionResult, PendingValidation,
    ValidatedResult, ValidationToken,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// A validator's answer to a pending request
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationDecision {
    pub value: ExtractedValue,
    pub notes: Option<String>,
    pub validator_id: String,
}

impl ValidationDecision {
    pub fn new(value: ExtractedValue, validator_id: impl Into<String>) -> Self {
        Self {
            value,
            notes: None,
            validator_id: validator_id.into(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Handle returned to the waiting case
#[derive(Debug)]
pub struct ValidationTicket {
    pub pending: PendingValidation,
    reply: oneshot::Receiver<ValidationDecision>,
}

impl ValidationTicket {
    pub fn token(&self) -> &ValidationToken {
        &self.pending.token
    }
}

struct PendingEntry {
    snapshot: PendingValidation,
    reply: oneshot::Sender<ValidationDecision>,
}

/// Shared registry of pending validations, one slot per case
#[derive(Default)]
pub struct ValidationGate {
    pending: Mutex<HashMap<CaseId, PendingEntry>>,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CaseId, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a request for `proposed`, generating a fresh token
    pub fn request(
        &self,
        case_id: &CaseId,
        patient_id: &str,
        proposed: ExtractionResult,
    ) -> EngineResult<ValidationTicket> {
        let mut slots = self.slots();
        if let Some(existing) = slots.get(case_id) {
            return Err(BtradsError::ValidationAlreadyPending {
                case_id: case_id.clone(),
                node: existing.snapshot.node_id.clone(),
            });
        }

        let node_id = proposed.node_id.clone();
        let snapshot = PendingValidation {
            token: ValidationToken::generate(patient_id, &node_id),
            case_id: case_id.clone(),
            node_id,
            proposed,
            requested_at: Utc::now(),
        };
        let (reply, receiver) = oneshot::channel();
        slots.insert(
            case_id.clone(),
            PendingEntry {
                snapshot: snapshot.clone(),
                reply,
            },
        );
        tracing::debug!(case_id = %case_id, token = %snapshot.token, "Validation requested");

        Ok(ValidationTicket {
            pending: snapshot,
            reply: receiver,
        })
    }

    /// Wait for a decision on `ticket`.
    ///
    /// A decision whose value differs from the proposal is recorded as a
    /// modification with its confidence scaled by `correction_factor`.
    pub async fn wait(
        &self,
        ticket: ValidationTicket,
        timeout: Option<Duration>,
        correction_factor: f64,
    ) -> EngineResult<ValidatedResult> {
        let ValidationTicket { pending, reply } = ticket;
        let node_id = pending.node_id.clone();
        let _slot = SlotRelease {
            gate: self,
            case_id: &pending.case_id,
            token: &pending.token,
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(case_id = %pending.case_id, node = %node_id, "Validation timed out");
                    return Err(BtradsError::ValidationTimeout(node_id));
                }
            },
            None => reply.await,
        };

        let decision = outcome.map_err(|_| BtradsError::ValidationAborted(node_id))?;
        Ok(ValidatedResult::new(
            pending.proposed,
            decision.value,
            decision.validator_id,
            decision.notes,
            correction_factor,
        ))
    }

    /// Deliver a decision for the case's pending request
    pub fn resolve(
        &self,
        case_id: &CaseId,
        token: &ValidationToken,
        decision: ValidationDecision,
    ) -> EngineResult<()> {
        let entry = self.take(case_id, token)?;
        tracing::info!(
            case_id = %case_id,
            node = %entry.snapshot.node_id,
            validator = %decision.validator_id,
            "Validation resolved"
        );
        entry
            .reply
            .send(decision)
            .map_err(|_| BtradsError::ValidationAborted(entry.snapshot.node_id))
    }

    /// Accept the proposed value unchanged
    pub fn approve(
        &self,
        case_id: &CaseId,
        token: &ValidationToken,
        validator_id: impl Into<String>,
    ) -> EngineResult<()> {
        let value = self
            .pending(case_id)
            .ok_or(BtradsError::NoPendingValidation)?
            .proposed
            .value;
        self.resolve(case_id, token, ValidationDecision::new(value, validator_id))
    }

    /// Withdraw the pending request; the waiting case sees an abort
    pub fn abort(&self, case_id: &CaseId, token: &ValidationToken) -> EngineResult<()> {
        let entry = self.take(case_id, token)?;
        tracing::info!(case_id = %case_id, node = %entry.snapshot.node_id, "Validation aborted");
        Ok(())
    }

    /// Snapshot of the case's pending request
    pub fn pending(&self, case_id: &CaseId) -> Option<PendingValidation> {
        self.slots().get(case_id).map(|e| e.snapshot.clone())
    }

    /// Every pending request, oldest first
    pub fn pending_all(&self) -> Vec<PendingValidation> {
        let mut all: Vec<PendingValidation> =
            self.slots().values().map(|e| e.snapshot.clone()).collect();
        all.sort_by_key(|p| p.requested_at);
        all
    }

    pub fn pending_count(&self) -> usize {
        self.slots().len()
    }

    /// Remove the entry if `token` matches, leaving it in place otherwise
    fn take(&self, case_id: &CaseId, token: &ValidationToken) -> EngineResult<PendingEntry> {
        let mut slots = self.slots();
        let expected = match slots.get(case_id) {
            Some(entry) => entry.snapshot.token.clone(),
            None => return Err(BtradsError::NoPendingValidation),
        };
        if &expected != token {
            return Err(BtradsError::ValidationTokenMismatch {
                expected,
                got: token.clone(),
            });
        }
        slots
            .remove(case_id)
            .ok_or(BtradsError::NoPendingValidation)
    }

    fn release(&self, case_id: &CaseId, token: &ValidationToken) {
        let mut slots = self.slots();
        if slots.get(case_id).is_some_and(|e| &e.snapshot.token == token) {
            slots.remove(case_id);
        }
    }
}

/// Frees a case's slot when its wait ends, including when the waiting
/// future is dropped before a decision arrives
struct SlotRelease<'a> {
    gate: &'a ValidationGate,
    case_id: &'a CaseId,
    token: &'a ValidationToken,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        self.gate.release(self.case_id, self.token);
    }
}

impl std::fmt::Debug for ValidationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationGate")
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btrads_types::NodeId;
    use std::sync::Arc;

    fn proposal(value: &str, confidence: f64) -> ExtractionResult {
        ExtractionResult::new(
            NodeId::new("node_2_imaging_assessment"),
            ExtractedValue::category(value),
            confidence,
            "proposed",
            "test",
        )
    }

    #[tokio::test]
    async fn approve_keeps_value_and_confidence() {
        let gate = Arc::new(ValidationGate::new());
        let case = CaseId::new("c1");
        let ticket = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();
        let token = ticket.token().clone();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(ticket, None, 0.9).await })
        };
        gate.approve(&case, &token, "dr_a").unwrap();

        let validated = waiter.await.unwrap().unwrap();
        assert!(!validated.is_modified());
        assert_eq!(validated.confidence, 0.8);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn modification_scales_confidence() {
        let gate = Arc::new(ValidationGate::new());
        let case = CaseId::new("c1");
        let ticket = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();
        let token = ticket.token().clone();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(ticket, None, 0.9).await })
        };
        gate.resolve(
            &case,
            &token,
            ValidationDecision::new(ExtractedValue::category("unchanged"), "dr_b").with_notes("stable"),
        )
        .unwrap();

        let validated = waiter.await.unwrap().unwrap();
        assert!(validated.is_modified());
        assert!((validated.confidence - 0.72).abs() < 1e-9);
        assert_eq!(validated.notes.as_deref(), Some("stable"));
    }

    #[test]
    fn second_request_is_refused() {
        let gate = ValidationGate::new();
        let case = CaseId::new("c1");
        let first = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();
        let err = gate.request(&case, "p1", proposal("improved", 0.8)).unwrap_err();
        assert!(matches!(err, BtradsError::ValidationAlreadyPending { .. }));
        assert_eq!(gate.pending(&case).unwrap().token, first.pending.token);
    }

    #[test]
    fn mismatched_token_leaves_request_pending() {
        let gate = ValidationGate::new();
        let case = CaseId::new("c1");
        let ticket = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();
        let err = gate
            .resolve(
                &case,
                &ValidationToken::new("stale"),
                ValidationDecision::new(ExtractedValue::Unknown, "dr"),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Validation ID mismatch: expected {}, got stale", ticket.token())
        );
        assert!(gate.pending(&case).is_some());
    }

    #[test]
    fn resolve_without_request() {
        let gate = ValidationGate::new();
        let err = gate
            .resolve(
                &CaseId::new("none"),
                &ValidationToken::new("t"),
                ValidationDecision::new(ExtractedValue::Unknown, "dr"),
            )
            .unwrap_err();
        assert!(matches!(err, BtradsError::NoPendingValidation));
    }

    #[tokio::test]
    async fn abort_wakes_waiter() {
        let gate = ValidationGate::new();
        let case = CaseId::new("c1");
        let ticket = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();
        let token = ticket.token().clone();
        gate.abort(&case, &token).unwrap();
        let err = gate.wait(ticket, None, 0.9).await.unwrap_err();
        assert!(matches!(err, BtradsError::ValidationAborted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_clears_slot() {
        let gate = ValidationGate::new();
        let case = CaseId::new("c1");
        let ticket = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();
        let err = gate
            .wait(ticket, Some(Duration::from_secs(5)), 0.9)
            .await
            .unwrap_err();
        assert!(matches!(err, BtradsError::ValidationTimeout(_)));
        assert!(gate.pending(&case).is_none());
        assert!(gate.request(&case, "p1", proposal("worse", 0.8)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_frees_slot() {
        let gate = ValidationGate::new();
        let case = CaseId::new("c1");
        let ticket = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();

        // the caller gives up before any validator answers
        let waited = tokio::time::timeout(Duration::from_millis(200), gate.wait(ticket, None, 0.9)).await;
        assert!(waited.is_err());

        assert_eq!(gate.pending_count(), 0);
        assert!(gate.request(&case, "p1", proposal("worse", 0.8)).is_ok());
    }

    #[tokio::test]
    async fn finished_wait_leaves_new_request_alone() {
        let gate = ValidationGate::new();
        let case = CaseId::new("c1");
        let first = gate.request(&case, "p1", proposal("worse", 0.8)).unwrap();
        let token = first.token().clone();
        gate.abort(&case, &token).unwrap();
        let second = gate.request(&case, "p1", proposal("improved", 0.8)).unwrap();

        assert!(gate.wait(first, None, 0.9).await.is_err());
        assert_eq!(gate.pending(&case).unwrap().token, second.pending.token);
    }
}
