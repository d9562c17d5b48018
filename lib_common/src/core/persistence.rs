//! # Persistence Seam
//!
//! The narrow interface the core uses to talk to the relational store. The
//! core never assumes a particular storage engine: the production backend is
//! Postgres (see `connections::db_postgres`); the in-memory store here backs
//! tests and local development.
//!
//! Only two core components touch this seam: the change notifier (recent
//! duplicate-notification check) and whoever serves the authoritative read
//! endpoints the polling fallback fetches from.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// The entity families the store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Order,
    Notification,
    PriorityList,
}

/// Custom error types for persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to acquire a database connection: {0}")]
    Pool(String),
    #[error("Query execution failed: {0}")]
    Query(String),
    #[error("{kind:?} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("Invalid document for {kind:?}: {reason}")]
    InvalidDocument { kind: EntityKind, reason: String },
}

/// Persist-and-read contract consumed by the core.
pub trait Persistence: Send + Sync + 'static {
    /// Reads one entity by id; `Ok(None)` when absent.
    fn read_entity(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, PersistenceError>> + Send;

    /// Reads the full current collection for an entity family. For
    /// `PriorityList` this returns at most one document.
    fn read_many(
        &self,
        kind: EntityKind,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, PersistenceError>> + Send;

    /// Persists a mutation and returns the new state. Orders are upserted
    /// with a shallow field merge; notifications are inserted whole; the
    /// priority list document is replaced.
    fn write_entity(
        &self,
        kind: EntityKind,
        id: &str,
        patch: &Value,
    ) -> impl std::future::Future<Output = Result<Value, PersistenceError>> + Send;

    /// Producer-side duplicate guard: does a notification for the same order
    /// with the same message exist within `window`, other than
    /// `exclude_id`? The exclusion keeps a just-inserted row from matching
    /// itself.
    fn has_recent_notification(
        &self,
        order_id: &str,
        message: &str,
        window: Duration,
        exclude_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, PersistenceError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryTables {
    orders: HashMap<String, Value>,
    notifications: Vec<Value>,
    priority: Option<Value>,
}

/// In-memory implementation of the persistence seam.
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(MemoryTables::default()),
        }
    }

    /// Seeds an order document; test and demo helper.
    pub fn seed_order(&self, id: &str, document: Value) {
        let mut tables = self.tables.lock().expect("Store lock poisoned");
        tables.orders.insert(id.to_string(), document);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Persistence for MemoryStore {
    async fn read_entity(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<Value>, PersistenceError> {
        let tables = self.tables.lock().expect("Store lock poisoned");
        let found = match kind {
            EntityKind::Order => tables.orders.get(id).cloned(),
            EntityKind::Notification => tables
                .notifications
                .iter()
                .find(|n| n.get("id").and_then(Value::as_str) == Some(id))
                .cloned(),
            EntityKind::PriorityList => tables.priority.clone(),
        };
        Ok(found)
    }

    async fn read_many(&self, kind: EntityKind) -> Result<Vec<Value>, PersistenceError> {
        let tables = self.tables.lock().expect("Store lock poisoned");
        let all = match kind {
            EntityKind::Order => tables.orders.values().cloned().collect(),
            EntityKind::Notification => tables.notifications.clone(),
            EntityKind::PriorityList => tables.priority.iter().cloned().collect(),
        };
        Ok(all)
    }

    async fn write_entity(
        &self,
        kind: EntityKind,
        id: &str,
        patch: &Value,
    ) -> Result<Value, PersistenceError> {
        let fields = patch
            .as_object()
            .ok_or_else(|| PersistenceError::InvalidDocument {
                kind,
                reason: "expected a JSON object".to_string(),
            })?;

        let mut tables = self.tables.lock().expect("Store lock poisoned");
        match kind {
            EntityKind::Order => {
                let entry = tables
                    .orders
                    .entry(id.to_string())
                    .or_insert_with(|| serde_json::json!({ "id": id }));
                if let Some(existing) = entry.as_object_mut() {
                    for (key, value) in fields {
                        existing.insert(key.clone(), value.clone());
                    }
                }
                Ok(entry.clone())
            }
            EntityKind::Notification => {
                tables.notifications.insert(0, patch.clone());
                Ok(patch.clone())
            }
            EntityKind::PriorityList => {
                tables.priority = Some(patch.clone());
                Ok(patch.clone())
            }
        }
    }

    async fn has_recent_notification(
        &self,
        order_id: &str,
        message: &str,
        window: Duration,
        exclude_id: &str,
    ) -> Result<bool, PersistenceError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let tables = self.tables.lock().expect("Store lock poisoned");

        let exists = tables.notifications.iter().any(|n| {
            if n.get("id").and_then(Value::as_str) == Some(exclude_id) {
                return false;
            }
            let same_order = n.get("orderId").and_then(Value::as_str) == Some(order_id);
            let same_message = n.get("message").and_then(Value::as_str) == Some(message);
            let recent = n
                .get("createdAt")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
                .is_some_and(|created| created > cutoff);
            same_order && same_message && recent
        });
        Ok(exists)
    }
}
