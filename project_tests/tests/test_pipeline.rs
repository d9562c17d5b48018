//! # Consumer Pipeline Integration Tests
//!
//! Runs raw channel payloads through the full inbound path (parse →
//! suppression → throttle → reconciliation) and checks the delivery
//! verdicts and resulting store state.

use std::sync::{Arc, Mutex};

use serde_json::json;

use lib_common::SyncConfig;
use lib_common::core::event::{ChangeEvent, EventKind};
use lib_common::core::pipeline::{Delivery, EventPipeline, PipelineError};
use lib_common::core::reconcile::{ApplyOutcome, ReconciledState};

fn pipeline_with(config: SyncConfig) -> EventPipeline {
    EventPipeline::new(&config, Arc::new(Mutex::new(ReconciledState::new())))
}

#[test]
fn test_snapshot_applies_and_redelivery_is_dropped() {
    let mut pipeline = pipeline_with(SyncConfig::default());
    let event = ChangeEvent::new(
        EventKind::OrderUpdated,
        "O1",
        json!({"id": "O1", "status": "Cut"}),
    );
    let payload = serde_json::to_string(&event).expect("Failed to serialize event");

    let first = pipeline.handle_raw(&payload).expect("First delivery failed");
    assert_eq!(first, Delivery::Applied(ApplyOutcome::Inserted));

    let second = pipeline.handle_raw(&payload).expect("Second delivery failed");
    assert_eq!(second, Delivery::DroppedDuplicate);

    let store = pipeline.store();
    let snapshot = store.lock().expect("Store lock poisoned");
    assert_eq!(snapshot.orders_len(), 1, "Only one order must exist");
}

#[test]
fn test_rapid_order_updates_are_throttled() {
    let mut pipeline = pipeline_with(SyncConfig {
        throttle_min_interval_ms: 3000,
        ..SyncConfig::default()
    });

    let first = ChangeEvent::new(
        EventKind::OrderUpdated,
        "O1",
        json!({"id": "O1", "status": "Cut"}),
    );
    let second = ChangeEvent::new(EventKind::OrderUpdated, "O1", json!({"status": "Assembled"}));

    assert_eq!(
        pipeline.handle_event(&first).expect("First update failed"),
        Delivery::Applied(ApplyOutcome::Inserted)
    );
    assert_eq!(
        pipeline.handle_event(&second).expect("Second update failed"),
        Delivery::DroppedThrottled,
        "An update inside the minimum interval must be throttled"
    );
}

#[test]
fn test_throttled_event_stays_dropped_on_redelivery() {
    let mut pipeline = pipeline_with(SyncConfig {
        throttle_min_interval_ms: 3000,
        ..SyncConfig::default()
    });

    let first = ChangeEvent::new(
        EventKind::OrderUpdated,
        "O1",
        json!({"id": "O1", "status": "Cut"}),
    );
    let second = ChangeEvent::new(EventKind::OrderUpdated, "O1", json!({"status": "Assembled"}));

    pipeline.handle_event(&first).expect("First update failed");
    assert_eq!(
        pipeline.handle_event(&second).expect("Second update failed"),
        Delivery::DroppedThrottled
    );

    // The throttled event was marked seen on arrival; a redelivery is a
    // duplicate, not a second chance.
    assert_eq!(
        pipeline.handle_event(&second).expect("Redelivery failed"),
        Delivery::DroppedDuplicate
    );
}

#[test]
fn test_priority_and_notification_events_bypass_the_throttle() {
    let mut pipeline = pipeline_with(SyncConfig {
        throttle_min_interval_ms: 3000,
        ..SyncConfig::default()
    });

    // Two back-to-back priority replacements: both user-intent-driven, both
    // must land even though they share an entity id.
    let first = ChangeEvent::new(
        EventKind::PriorityListUpdated,
        "priority-list",
        json!({"orderIds": ["O1", "O2"]}),
    );
    let second = ChangeEvent::new(
        EventKind::PriorityListUpdated,
        "priority-list",
        json!({"orderIds": ["O2"]}),
    );

    assert_eq!(
        pipeline.handle_event(&first).expect("First replace failed"),
        Delivery::Applied(ApplyOutcome::PriorityReplaced)
    );
    assert_eq!(
        pipeline.handle_event(&second).expect("Second replace failed"),
        Delivery::Applied(ApplyOutcome::PriorityReplaced),
        "Priority updates must never be throttled"
    );
}

#[test]
fn test_unparseable_payload_is_rejected_whole() {
    let mut pipeline = pipeline_with(SyncConfig::default());

    let result = pipeline.handle_raw("this is not an event");
    assert!(matches!(result, Err(PipelineError::Parse(_))));

    let store = pipeline.store();
    let snapshot = store.lock().expect("Store lock poisoned");
    assert_eq!(snapshot.orders_len(), 0, "A rejected payload must not touch the store");
}

#[test]
fn test_invalid_event_leaves_store_untouched() {
    let mut pipeline = pipeline_with(SyncConfig::default());

    // Seed one valid order so there is state that could be corrupted.
    let seed = ChangeEvent::new(
        EventKind::OrderUpdated,
        "O1",
        json!({"id": "O1", "status": "Cut"}),
    );
    pipeline.handle_event(&seed).expect("Seed failed");

    // Structurally valid envelope, semantically broken payload.
    let broken = ChangeEvent::new(
        EventKind::PriorityListUpdated,
        "priority-list",
        json!({"orderIds": "not-an-array"}),
    );
    let result = pipeline.handle_event(&broken);
    assert!(matches!(result, Err(PipelineError::Reconcile(_))));

    let store = pipeline.store();
    let snapshot = store.lock().expect("Store lock poisoned");
    assert_eq!(snapshot.orders_len(), 1);
    assert!(
        snapshot.priority_ids().is_none(),
        "A failed event must apply nothing, not a partial mutation"
    );
}
