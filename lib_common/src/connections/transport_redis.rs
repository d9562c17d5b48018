//! # Redis Pub/Sub Transport Adapter
//!
//! Production implementation of the transport seam over Redis channels.
//!
//! Publishing rides on a `ConnectionManager`, which re-establishes its
//! connection transparently. Each subscription runs a dedicated reader task
//! with its own reconnect loop; the `Subscription` handle stays valid across
//! reconnects because the mpsc pair outlives the underlying connection.
//! Messages published while a reader is down are gone; the polling fallback
//! engine covers that window.

use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::core::transport::{ConnectionState, PubSubTransport, Subscription, TransportError};

/// Delay between reconnect attempts of a subscription reader.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Redis-backed transport. One instance per session, injected into
/// dependents by reference; teardown cancels all reader tasks.
pub struct RedisTransport {
    client: Client,
    manager: ConnectionManager,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl RedisTransport {
    /// Opens the client and the managed publish connection.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = Client::open(url).map_err(|e| TransportError::Connect(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        tracing::info!(%url, "redis transport connected");

        Ok(Self {
            client,
            manager,
            state_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Stops all subscription reader tasks. Called on session teardown;
    /// also triggered by dropping the transport.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl PubSubTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let mut manager = self.manager.clone();
        let result: redis::RedisResult<i64> = manager.publish(channel, payload).await;
        match result {
            Ok(receivers) => {
                set_state(&self.state_tx, ConnectionState::Connected);
                tracing::debug!(%channel, receivers, "published");
                Ok(())
            }
            Err(e) => {
                set_state(&self.state_tx, ConnectionState::Errored);
                Err(TransportError::Publish {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let state_tx = self.state_tx.clone();
        let cancel = self.cancel.clone();
        let channel_name = channel.to_string();
        tokio::spawn(async move {
            subscription_loop(client, channel_name, tx, state_tx, cancel).await;
        });

        Ok(Subscription::new(channel, rx))
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

/// Reader task for one channel: connect, subscribe, forward payloads, and
/// reconnect after failures until cancelled or the handle is dropped.
async fn subscription_loop(
    client: Client,
    channel: String,
    tx: mpsc::UnboundedSender<String>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.subscribe(&channel).await {
                Ok(()) => {
                    set_state(&state_tx, ConnectionState::Connected);
                    tracing::info!(%channel, "subscribed");

                    let mut stream = pubsub.on_message();
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            msg = stream.next() => match msg {
                                Some(msg) => match msg.get_payload::<String>() {
                                    Ok(payload) => {
                                        if tx.send(payload).is_err() {
                                            // Subscription handle dropped.
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!(%channel, error = %e, "undecodable message, skipping");
                                    }
                                },
                                None => {
                                    tracing::warn!(%channel, "pubsub stream ended");
                                    break;
                                }
                            }
                        }
                    }
                    set_state(&state_tx, ConnectionState::Disconnected);
                }
                Err(e) => {
                    tracing::error!(%channel, error = %e, "subscribe failed");
                    set_state(&state_tx, ConnectionState::Errored);
                }
            },
            Err(e) => {
                tracing::error!(%channel, error = %e, "pubsub connection failed");
                set_state(&state_tx, ConnectionState::Disconnected);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if *current != state {
            tracing::info!(from = ?current, to = ?state, "redis connection state changed");
            *current = state;
            true
        } else {
            false
        }
    });
}
