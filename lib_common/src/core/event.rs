//! # Change Event Model
//!
//! The canonical unit flowing through the live-update pipeline. A mutation on
//! the producer side becomes exactly one `ChangeEvent`, which then travels to
//! every consumer over one or more delivery paths (broadcast, direct
//! response, polling catch-up). Because paths race and re-deliver, every
//! event carries enough identity for consumers to deduplicate:
//!
//! - `event_id` catches re-delivery of the *same* envelope,
//! - the derived fingerprint catches the *same logical change* wrapped in
//!   different envelopes on different paths.
//!
//! The fingerprint is computed on demand by both producer and consumers and
//! is never persisted or put on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Channel carrying order and priority-list updates.
pub const ORDERS_CHANNEL: &str = "orders";
/// Channel carrying notification events.
pub const NOTIFICATIONS_CHANNEL: &str = "notifications";

/// Synthetic entity id used for priority-list events; the priority list is a
/// single logical document, not a row per order.
pub const PRIORITY_LIST_ID: &str = "priority-list";

/// How many bytes of the serialized payload participate in the fingerprint.
const FINGERPRINT_PAYLOAD_PREFIX: usize = 256;

/// Discriminator for the logical change an event describes.
///
/// The serialized strings must match exactly between publisher and
/// subscriber; there is no version negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// One or more fields of an order changed. `data` holds the changed
    /// fields (partial) or a full snapshot.
    OrderUpdated,
    /// A new notification was created. `data` holds the full notification
    /// document.
    NotificationCreated,
    /// The ordered priority id list was replaced. `data` holds
    /// `{"orderIds": [...]}`.
    PriorityListUpdated,
}

impl EventKind {
    /// The pub/sub channel this kind of event travels on.
    pub fn channel(&self) -> &'static str {
        match self {
            EventKind::OrderUpdated | EventKind::PriorityListUpdated => ORDERS_CHANNEL,
            EventKind::NotificationCreated => NOTIFICATIONS_CHANNEL,
        }
    }

    /// True for high-frequency kinds that pass through the throttle gate.
    /// Notifications and priority changes are user-intent-driven and are
    /// never throttled.
    pub fn is_throttled(&self) -> bool {
        matches!(self, EventKind::OrderUpdated)
    }
}

/// The canonical event payload published on a channel.
///
/// Wire shape (JSON): `{ eventId, kind, entityId, data, emittedAt }` with
/// `emittedAt` in ISO-8601.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Unique id of this envelope, assigned once at publish time.
    pub event_id: String,
    /// The logical change discriminator.
    pub kind: EventKind,
    /// Order id, notification id, or [`PRIORITY_LIST_ID`].
    pub entity_id: String,
    /// The new or changed state: partial fields or a full snapshot.
    pub data: Value,
    /// Set once at publish time; participates in fingerprinting and
    /// throttle comparisons.
    pub emitted_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Builds a new event stamped with a fresh id and the current time.
    pub fn new(kind: EventKind, entity_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            kind,
            entity_id: entity_id.into(),
            data,
            emitted_at: Utc::now(),
        }
    }

    /// Key identifying this envelope for id-based suppression.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.entity_id, self.event_id)
    }

    /// Derives the content fingerprint used for cross-path deduplication.
    ///
    /// Input is the entity id, a truncated canonical serialization of the
    /// payload, and the emit timestamp floored to `bucket_secs`. Two
    /// envelopes carrying the same logical change therefore collide even
    /// when their `event_id`s differ, while genuinely distinct updates to
    /// the same entity (different payload or different bucket) do not.
    ///
    /// `serde_json` sorts object keys by default, so the serialization is
    /// canonical for equal payloads.
    pub fn fingerprint(&self, bucket_secs: u64) -> String {
        let bucket = if bucket_secs == 0 {
            self.emitted_at.timestamp()
        } else {
            self.emitted_at.timestamp().div_euclid(bucket_secs as i64)
        };

        // The prefix is taken at a byte offset; hashing raw bytes keeps a
        // multi-byte character split at the boundary harmless.
        let payload = self.data.to_string();
        let prefix_len = payload.len().min(FINGERPRINT_PAYLOAD_PREFIX);
        let payload_prefix = &payload.as_bytes()[..prefix_len];

        let mut hasher = Sha256::new();
        hasher.update(self.entity_id.as_bytes());
        hasher.update(b"|");
        hasher.update(payload_prefix);
        hasher.update(b"|");
        hasher.update(bucket.to_string().as_bytes());
        let digest = hasher.finalize();

        hex::encode(digest)[..32].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_stable_across_envelopes() {
        let a = ChangeEvent::new(EventKind::OrderUpdated, "O1", json!({"material": "Pine"}));
        let mut b = a.clone();
        b.event_id = uuid::Uuid::new_v4().to_string();

        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.fingerprint(60), b.fingerprint(60));
    }

    #[test]
    fn fingerprint_differs_for_distinct_payloads() {
        let a = ChangeEvent::new(EventKind::OrderUpdated, "O1", json!({"material": "Pine"}));
        let mut b = a.clone();
        b.data = json!({"material": "Oak"});

        assert_ne!(a.fingerprint(60), b.fingerprint(60));
    }

    #[test]
    fn fingerprint_handles_multibyte_payloads() {
        // Long enough that the serialization crosses the prefix boundary
        // mid-character.
        let note = "ä".repeat(200);
        let a = ChangeEvent::new(EventKind::OrderUpdated, "O1", json!({"note": note}));
        let mut b = a.clone();
        b.event_id = uuid::Uuid::new_v4().to_string();

        assert_eq!(a.fingerprint(60), b.fingerprint(60));
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let event = ChangeEvent::new(EventKind::OrderUpdated, "O1", json!({"material": "Pine"}));
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["kind"], "orderUpdated");
        assert_eq!(wire["entityId"], "O1");
        assert!(wire["emittedAt"].is_string());
        assert!(wire.get("fingerprint").is_none());
    }
}
