//! # Polling Fallback Engine
//!
//! Substitutes for the push transport's delivery role while the connection
//! is down. Driven entirely by connection-state transitions: degraded state
//! activates polling, recovery (after a short grace delay, to avoid
//! flapping) deactivates it.
//!
//! While polling, the engine fetches the full current state for its data
//! type on a fixed interval and hands the result to the reconciliation
//! store as a full replace, not a diff. Correctness over efficiency; this
//! is the degraded-mode path. Fetch failures are logged and retried on the
//! next tick, never fatal.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::configs::SyncConfig;
use crate::core::reconcile::{DataType, ReconciledState};
use crate::core::transport::ConnectionState;
use crate::fallback::state_source::StateSource;

/// Observable engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPhase {
    Idle,
    Polling,
}

/// One fallback engine per data type per client session.
pub struct PollingFallback<S> {
    source: Arc<S>,
    store: Arc<Mutex<ReconciledState>>,
    data_type: DataType,
    poll_interval: Duration,
    recovery_grace: Duration,
    conn_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    phase_tx: watch::Sender<FallbackPhase>,
}

impl<S: StateSource> PollingFallback<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<Mutex<ReconciledState>>,
        data_type: DataType,
        config: &SyncConfig,
        conn_rx: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        let (phase_tx, _) = watch::channel(FallbackPhase::Idle);
        Self {
            source,
            store,
            data_type,
            poll_interval: config.poll_interval(),
            recovery_grace: config.recovery_grace(),
            conn_rx,
            cancel,
            phase_tx,
        }
    }

    /// A watch handle for observing phase transitions (connectivity
    /// indicator, tests).
    pub fn phase(&self) -> watch::Receiver<FallbackPhase> {
        self.phase_tx.subscribe()
    }

    /// The engine's main loop; runs until cancelled. Cancellation leaves no
    /// orphaned timers or in-flight loops behind.
    pub async fn run(mut self) {
        loop {
            if self.conn_rx.borrow().is_degraded() {
                tracing::info!(data_type = ?self.data_type, "transport degraded, fallback polling active");
                self.set_phase(FallbackPhase::Polling);
                if !self.poll_until_recovered().await {
                    return;
                }
                tracing::info!(data_type = ?self.data_type, "transport recovered, fallback polling stopped");
                self.set_phase(FallbackPhase::Idle);
            } else {
                self.set_phase(FallbackPhase::Idle);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    changed = self.conn_rx.changed() => {
                        if changed.is_err() {
                            // Transport dropped its state channel; nothing
                            // left to observe.
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Polls on the fixed interval until the transport reports connected
    /// and stays connected through the grace delay. Returns `false` when
    /// cancelled or when the state channel closed.
    async fn poll_until_recovered(&mut self) -> bool {
        let mut ticker = tokio::time::interval(self.poll_interval);
        // Ticks are scheduled on the interval; a slow fetch skips ticks
        // rather than queueing a burst behind it.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = ticker.tick() => {
                    self.poll_once(&mut consecutive_failures).await;
                }
                changed = self.conn_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if *self.conn_rx.borrow() != ConnectionState::Connected {
                        continue;
                    }
                    // Grace delay before declaring full recovery.
                    tokio::select! {
                        _ = self.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(self.recovery_grace) => {}
                    }
                    if *self.conn_rx.borrow() == ConnectionState::Connected {
                        return true;
                    }
                    // Flapped back down during the grace window; keep polling.
                }
            }
        }
    }

    async fn poll_once(&self, consecutive_failures: &mut u32) {
        match self.source.fetch_all(self.data_type).await {
            Ok(items) => {
                *consecutive_failures = 0;
                let count = items.len();
                self.store
                    .lock()
                    .expect("Reconciled state lock poisoned")
                    .apply_full_replace(self.data_type, items);
                tracing::debug!(data_type = ?self.data_type, count, "fallback poll reconciled");
            }
            Err(e) => {
                // Logged and retried on the next tick; the loop never stops
                // on a fetch failure.
                *consecutive_failures += 1;
                tracing::warn!(
                    data_type = ?self.data_type,
                    consecutive_failures = *consecutive_failures,
                    error = %e,
                    "fallback poll failed"
                );
            }
        }
    }

    fn set_phase(&self, phase: FallbackPhase) {
        self.phase_tx.send_if_modified(|current| {
            if *current != phase {
                *current = phase;
                true
            } else {
                false
            }
        });
    }
}
