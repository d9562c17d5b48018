//! # Pub/Sub Transport Seam
//!
//! Abstracts the delivery mechanism behind subscribe/publish/connection-state
//! primitives. The production implementation rides on Redis pub/sub (see
//! `connections::transport_redis`); the in-memory implementation here backs
//! tests and local development.
//!
//! Contract notes:
//! - Subscription handles remain valid across reconnects.
//! - Events missed during a disconnect window are NOT retroactively
//!   delivered; the polling fallback engine covers that gap.
//! - Connection-state transitions are the only source of truth for whether
//!   the fallback engine should be running.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Lifecycle of the connection to the transport provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Errored,
}

impl ConnectionState {
    /// True when push delivery cannot be relied on and the fallback engine
    /// should poll.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Errored)
    }
}

/// Custom error types for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to transport: {0}")]
    Connect(String),
    #[error("Publish on channel '{channel}' failed: {reason}")]
    Publish { channel: String, reason: String },
    #[error("Subscribe to channel '{channel}' failed: {reason}")]
    Subscribe { channel: String, reason: String },
}

/// A live subscription to one named channel.
///
/// The handle stays valid across transport reconnects; the implementation
/// keeps feeding it once the connection recovers.
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// Waits for the next raw payload. Returns `None` once the transport
    /// has been torn down for good.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Channel-based publish/subscribe with observable connection state.
pub trait PubSubTransport: Send + Sync + 'static {
    /// Publishes a raw payload on a named channel.
    fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Opens a subscription to a named channel.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl std::future::Future<Output = Result<Subscription, TransportError>> + Send;

    /// Current connection state, synchronously on demand.
    fn connection_state(&self) -> ConnectionState;

    /// A watch handle for observing connection-state transitions.
    fn watch_connection(&self) -> watch::Receiver<ConnectionState>;
}

/// In-process transport: every publish fans out to all local subscribers of
/// the channel. Connection state is scriptable so tests can simulate
/// disconnects and recoveries.
pub struct InMemoryTransport {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Self {
            subscribers: Mutex::new(HashMap::new()),
            state_tx,
        }
    }

    /// Simulates a provider-side state transition.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                tracing::info!(?current, ?state, "transport connection state changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }

    /// Number of live subscribers on a channel; diagnostic only.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .expect("Transport lock poisoned")
            .get(channel)
            .map_or(0, |senders| senders.len())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubTransport for InMemoryTransport {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        if self.connection_state().is_degraded() {
            return Err(TransportError::Publish {
                channel: channel.to_string(),
                reason: "transport is disconnected".to_string(),
            });
        }

        let mut subscribers = self.subscribers.lock().expect("Transport lock poisoned");
        if let Some(senders) = subscribers.get_mut(channel) {
            // Drop subscribers whose receiving half has gone away.
            senders.retain(|sender| sender.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("Transport lock poisoned")
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
