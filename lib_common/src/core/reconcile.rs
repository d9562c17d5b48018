//! # Client Reconciliation Store
//!
//! The authoritative client-side cache for orders, notifications and the
//! priority list, and the only place those collections are mutated. Incoming
//! change events merge into it; polling fallback results replace into it.
//! Both paths converge on the same state because the merge semantics are
//! idempotent and commutative for the fields they touch.
//!
//! Mutation rules:
//! - `OrderUpdated` shallow-merges the payload fields into the existing
//!   entity, preserving unmentioned fields.
//! - `NotificationCreated` prepends, after a defense-in-depth dedup by id
//!   and by content against the live collection.
//! - `PriorityListUpdated` replaces the ordered id list and re-resolves the
//!   full entities from the orders collection.
//!
//! Whenever an order carried by the priority list is updated through the
//! main collection, the materialized priority view is refreshed to the same
//! merged object so both views always agree field-for-field.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::core::event::{ChangeEvent, EventKind};

/// Collections a full-replace reconciliation can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Orders,
    Notifications,
    PriorityList,
}

/// Custom error types for reconciliation. A failed event leaves the store
/// untouched; reconciliation is all-or-nothing per event.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

/// What applying an event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Payload fields merged into an existing order.
    Merged,
    /// A full snapshot was inserted for a previously unknown order.
    Inserted,
    /// A notification was prepended.
    Prepended,
    /// The priority id list was replaced and re-resolved.
    PriorityReplaced,
    /// The event was valid but intentionally not applied (unknown partial
    /// entity, active filter, or an already-present notification).
    Ignored,
}

/// The reconciled in-memory collections for one client session.
pub struct ReconciledState {
    orders: HashMap<String, Value>,
    notifications: Vec<Value>,
    /// `None` until the first priority-list update or load; `Some(vec![])`
    /// is an explicit clear, a distinct state from "no update received yet".
    priority_ids: Option<Vec<String>>,
    /// Full entities resolved from `orders` in priority order.
    priority_view: Vec<Value>,
    /// When the UI has active filters, partial views must not grow from
    /// unknown-entity snapshots.
    filters_active: bool,
}

impl ReconciledState {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            notifications: Vec::new(),
            priority_ids: None,
            priority_view: Vec::new(),
            filters_active: false,
        }
    }

    /// Applies one incoming change event. On error no partial mutation has
    /// been made.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Result<ApplyOutcome, ReconcileError> {
        if event.entity_id.is_empty() {
            return Err(ReconcileError::MalformedEvent(
                "missing entityId".to_string(),
            ));
        }

        match event.kind {
            EventKind::OrderUpdated => self.apply_order_updated(event),
            EventKind::NotificationCreated => self.apply_notification_created(event),
            EventKind::PriorityListUpdated => self.apply_priority_updated(event),
        }
    }

    /// Replaces a whole collection with an authoritative snapshot; the
    /// degraded-mode path used by the polling fallback and the initial load.
    /// For `PriorityList` the snapshot is at most one document.
    pub fn apply_full_replace(&mut self, data_type: DataType, items: Vec<Value>) {
        match data_type {
            DataType::Orders => {
                let mut orders = HashMap::with_capacity(items.len());
                for item in items {
                    match item.get("id").and_then(Value::as_str) {
                        Some(id) => {
                            orders.insert(id.to_string(), item);
                        }
                        None => {
                            tracing::warn!("dropping order document without an id during full replace");
                        }
                    }
                }
                self.orders = orders;
                self.rebuild_priority_view();
            }
            DataType::Notifications => {
                self.notifications = items;
            }
            DataType::PriorityList => {
                // The read endpoint always serves a document; a missing or
                // empty id list is an explicit clear, not "never updated".
                let ids = items
                    .first()
                    .and_then(|doc| doc.get("orderIds"))
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                self.priority_ids = Some(ids);
                self.rebuild_priority_view();
            }
        }
    }

    fn apply_order_updated(&mut self, event: &ChangeEvent) -> Result<ApplyOutcome, ReconcileError> {
        let fields = event
            .data
            .as_object()
            .ok_or_else(|| ReconcileError::MalformedEvent("order payload is not an object".to_string()))?;

        if let Some(existing) = self.orders.get_mut(&event.entity_id) {
            if let Some(target) = existing.as_object_mut() {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            // Keep the priority view pointing at the freshly merged object,
            // never a stale copy.
            self.refresh_priority_entry(&event.entity_id);
            return Ok(ApplyOutcome::Merged);
        }

        // Unknown entity: insert only a full snapshot, and only when no
        // active filter could make the partial view inconsistent.
        let is_full_snapshot = fields.get("id").and_then(Value::as_str) == Some(event.entity_id.as_str());
        if is_full_snapshot && !self.filters_active {
            self.orders
                .insert(event.entity_id.clone(), event.data.clone());
            self.refresh_priority_entry(&event.entity_id);
            Ok(ApplyOutcome::Inserted)
        } else {
            tracing::debug!(entity_id = %event.entity_id, "ignoring update for unknown order");
            Ok(ApplyOutcome::Ignored)
        }
    }

    fn apply_notification_created(
        &mut self,
        event: &ChangeEvent,
    ) -> Result<ApplyOutcome, ReconcileError> {
        let incoming = event
            .data
            .as_object()
            .ok_or_else(|| ReconcileError::MalformedEvent("notification payload is not an object".to_string()))?;

        // Defense in depth: the suppression filter already ran, but the
        // initial fetch can race live delivery, so the collection itself is
        // checked by id and by content before prepending.
        let incoming_id = incoming.get("id").and_then(Value::as_str);
        let incoming_order = incoming.get("orderId").and_then(Value::as_str);
        let incoming_message = incoming.get("message").and_then(Value::as_str);

        let already_present = self.notifications.iter().any(|existing| {
            let same_id = incoming_id.is_some()
                && existing.get("id").and_then(Value::as_str) == incoming_id;
            let same_content = incoming_message.is_some()
                && existing.get("orderId").and_then(Value::as_str) == incoming_order
                && existing.get("message").and_then(Value::as_str) == incoming_message;
            same_id || same_content
        });

        if already_present {
            tracing::debug!(entity_id = %event.entity_id, "notification already present, skipping");
            return Ok(ApplyOutcome::Ignored);
        }

        self.notifications.insert(0, event.data.clone());
        Ok(ApplyOutcome::Prepended)
    }

    fn apply_priority_updated(&mut self, event: &ChangeEvent) -> Result<ApplyOutcome, ReconcileError> {
        let ids = event
            .data
            .get("orderIds")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ReconcileError::MalformedEvent("priority payload missing orderIds array".to_string())
            })?;

        let mut resolved_ids = Vec::with_capacity(ids.len());
        for id in ids {
            match id.as_str() {
                Some(id) => resolved_ids.push(id.to_string()),
                None => {
                    return Err(ReconcileError::MalformedEvent(
                        "orderIds entries must be strings".to_string(),
                    ))
                }
            }
        }

        // An empty list is a legitimate explicit clear.
        self.priority_ids = Some(resolved_ids);
        self.rebuild_priority_view();
        Ok(ApplyOutcome::PriorityReplaced)
    }

    /// Re-resolves the whole materialized priority view from the orders
    /// collection, dropping ids that no longer resolve.
    fn rebuild_priority_view(&mut self) {
        self.priority_view = match &self.priority_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.orders.get(id).cloned())
                .collect(),
            None => Vec::new(),
        };
    }

    /// Re-resolves the priority view after an order in the list changed in
    /// the main collection. A full rebuild also covers the case where a
    /// listed id only now became resolvable (snapshot insert).
    fn refresh_priority_entry(&mut self, order_id: &str) {
        let in_list = self
            .priority_ids
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|id| id == order_id));
        if in_list {
            self.rebuild_priority_view();
        }
    }

    // --- Read-only accessors for the UI render collaborator ---

    pub fn order(&self, id: &str) -> Option<&Value> {
        self.orders.get(id)
    }

    pub fn orders_len(&self) -> usize {
        self.orders.len()
    }

    pub fn notifications(&self) -> &[Value] {
        &self.notifications
    }

    /// The materialized priority entities, in priority order.
    pub fn priority_view(&self) -> &[Value] {
        &self.priority_view
    }

    /// `None` means no priority update has been received since load.
    pub fn priority_ids(&self) -> Option<&[String]> {
        self.priority_ids.as_deref()
    }

    pub fn set_filters_active(&mut self, active: bool) {
        self.filters_active = active;
    }
}

impl Default for ReconciledState {
    fn default() -> Self {
        Self::new()
    }
}
