//! # Consumer Event Pipeline
//!
//! Wires one client's inbound path together: raw channel payload → parse →
//! duplicate suppression → throttle gate (order updates only) →
//! reconciliation store. The suppression and throttle steps are synchronous
//! and run atomically relative to a single event; there is no await between
//! check and mark.
//!
//! The reconciled state sits behind a mutex because the polling fallback
//! engine feeds the same store through its full-replace entry point.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;

use crate::configs::SyncConfig;
use crate::core::event::ChangeEvent;
use crate::core::reconcile::{ApplyOutcome, ReconcileError, ReconciledState};
use crate::core::suppression::SuppressionWindow;
use crate::core::throttle::ThrottleGate;

/// What happened to one inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The event reached the store; the outcome says what it did there.
    Applied(ApplyOutcome),
    /// Dropped by the duplicate-suppression filter. Not an error.
    DroppedDuplicate,
    /// Dropped by the throttle gate. Not an error.
    DroppedThrottled,
}

/// Custom error types for the inbound pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to parse event payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// One consumer's suppression window, throttle gate and store handle.
pub struct EventPipeline {
    suppression: SuppressionWindow,
    throttle: ThrottleGate,
    store: Arc<Mutex<ReconciledState>>,
}

impl EventPipeline {
    pub fn new(config: &SyncConfig, store: Arc<Mutex<ReconciledState>>) -> Self {
        Self {
            suppression: SuppressionWindow::new(config),
            throttle: ThrottleGate::new(config.throttle_min_interval()),
            store,
        }
    }

    /// Handles a raw payload as received from a channel subscription.
    ///
    /// A payload that fails to parse or validate is discarded whole; no
    /// partial state mutation is applied.
    pub fn handle_raw(&mut self, payload: &str) -> Result<Delivery, PipelineError> {
        let event: ChangeEvent = serde_json::from_str(payload)?;
        self.handle_event(&event)
    }

    /// Runs one already-parsed event through suppression, throttling and
    /// reconciliation.
    pub fn handle_event(&mut self, event: &ChangeEvent) -> Result<Delivery, PipelineError> {
        let now = Instant::now();

        // Suppression marks the event seen before the throttle verdict, so
        // an event the throttle drops stays dropped on redelivery. Both
        // gates discard; neither defers.
        if !self.suppression.should_process_at(event, now) {
            return Ok(Delivery::DroppedDuplicate);
        }

        if event.kind.is_throttled() && !self.throttle.allow(&event.entity_id, now) {
            return Ok(Delivery::DroppedThrottled);
        }

        let outcome = self
            .store
            .lock()
            .expect("Reconciled state lock poisoned")
            .apply_event(event)?;
        Ok(Delivery::Applied(outcome))
    }

    /// Shared handle to the reconciled state for readers and the fallback
    /// engine.
    pub fn store(&self) -> Arc<Mutex<ReconciledState>> {
        Arc::clone(&self.store)
    }
}
