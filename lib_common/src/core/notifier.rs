//! # Change Notifier
//!
//! Producer-side entry point of the pipeline: given a persisted mutation,
//! builds the canonical event payload and publishes it on the right channel.
//!
//! Fails soft by contract. The mutation has already succeeded in storage by
//! the time `notify` runs, so a publish failure degrades real-time UX only;
//! it is logged and never surfaced to the caller of the mutation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::configs::SyncConfig;
use crate::core::event::{ChangeEvent, EventKind};
use crate::core::persistence::Persistence;
use crate::core::transport::PubSubTransport;

/// Publishes canonical change events for persisted mutations.
pub struct ChangeNotifier<P, T> {
    persistence: Arc<P>,
    transport: Arc<T>,
    notification_dedup_window: Duration,
}

impl<P: Persistence, T: PubSubTransport> ChangeNotifier<P, T> {
    pub fn new(persistence: Arc<P>, transport: Arc<T>, config: &SyncConfig) -> Self {
        Self {
            persistence,
            transport,
            notification_dedup_window: config.notification_dedup_window(),
        }
    }

    /// Builds and publishes an event; returns whether anything was
    /// published. Never returns an error.
    ///
    /// For `NotificationCreated`, a producer-side duplicate guard runs
    /// first: several code paths can independently decide to create "the
    /// same" notification for one logical action, so a recent identical
    /// notification (same order, same message, inside the window) skips the
    /// publish entirely. This guard is distinct from consumer-side
    /// suppression.
    pub async fn notify(&self, kind: EventKind, entity_id: &str, data: Value) -> bool {
        if kind == EventKind::NotificationCreated && self.is_duplicate_notification(entity_id, &data).await {
            return false;
        }

        let event = ChangeEvent::new(kind, entity_id, data);
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%entity_id, error = %e, "failed to serialize change event");
                return false;
            }
        };

        match self.transport.publish(event.kind.channel(), &payload).await {
            Ok(()) => {
                tracing::debug!(
                    kind = ?event.kind,
                    %entity_id,
                    event_id = %event.event_id,
                    "change event published"
                );
                true
            }
            Err(e) => {
                // The mutation already succeeded; delivery problems must not
                // bubble up to the caller.
                tracing::error!(kind = ?event.kind, %entity_id, error = %e, "publish failed, event dropped");
                false
            }
        }
    }

    async fn is_duplicate_notification(&self, entity_id: &str, data: &Value) -> bool {
        let order_id = data.get("orderId").and_then(Value::as_str).unwrap_or_default();
        let message = data.get("message").and_then(Value::as_str).unwrap_or_default();
        if order_id.is_empty() || message.is_empty() {
            return false;
        }

        match self
            .persistence
            .has_recent_notification(order_id, message, self.notification_dedup_window, entity_id)
            .await
        {
            Ok(true) => {
                tracing::debug!(%order_id, "recent identical notification found, skipping publish");
                true
            }
            Ok(false) => false,
            Err(e) => {
                // A failed guard query must not block the notification.
                tracing::warn!(%order_id, error = %e, "duplicate-notification check failed, publishing anyway");
                false
            }
        }
    }
}
