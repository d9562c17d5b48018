//! # PostgreSQL Persistence Backend
//!
//! Implements the persistence seam over a pooled Postgres connection.
//! Order documents live as JSONB so the dashboard's column set can evolve
//! without migrations; order writes are shallow JSONB merges, mirroring the
//! client-side reconciliation semantics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::Value;
use tokio_postgres::NoTls;

use crate::core::persistence::{EntityKind, Persistence, PersistenceError};

/// How many notifications a collection read returns, newest first.
const NOTIFICATION_READ_LIMIT: i64 = 200;

/// A wrapper around the Postgres connection pool.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Creates a connection pool for the specified database URL.
    pub fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let mut config = PoolConfig::new();
        config.url = Some(database_url.to_string());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| PersistenceError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Checks the health of the database connection by running a simple query.
    pub async fn ping(&self) -> Result<(), PersistenceError> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    /// Creates the tables this store needs if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        let client = self.client().await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS orders (
                    id   TEXT PRIMARY KEY,
                    data JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS notifications (
                    id         TEXT PRIMARY KEY,
                    order_id   TEXT NOT NULL,
                    message    TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    data       JSONB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS notifications_recent_idx
                    ON notifications (order_id, message, created_at);
                CREATE TABLE IF NOT EXISTS priority_list (
                    id   TEXT PRIMARY KEY,
                    data JSONB NOT NULL
                );",
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, PersistenceError> {
        self.pool
            .get()
            .await
            .map_err(|e| PersistenceError::Pool(e.to_string()))
    }
}

impl Persistence for PgStore {
    async fn read_entity(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<Value>, PersistenceError> {
        let client = self.client().await?;
        let statement = match kind {
            EntityKind::Order => "SELECT data FROM orders WHERE id = $1",
            EntityKind::Notification => "SELECT data FROM notifications WHERE id = $1",
            EntityKind::PriorityList => "SELECT data FROM priority_list WHERE id = $1",
        };

        let row = client
            .query_opt(statement, &[&id])
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(row.map(|row| row.get::<_, Value>(0)))
    }

    async fn read_many(&self, kind: EntityKind) -> Result<Vec<Value>, PersistenceError> {
        let client = self.client().await?;
        let rows = match kind {
            EntityKind::Order => client
                .query("SELECT data FROM orders ORDER BY id", &[])
                .await,
            EntityKind::Notification => {
                client
                    .query(
                        "SELECT data FROM notifications ORDER BY created_at DESC LIMIT $1",
                        &[&NOTIFICATION_READ_LIMIT],
                    )
                    .await
            }
            EntityKind::PriorityList => client.query("SELECT data FROM priority_list", &[]).await,
        }
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        Ok(rows.iter().map(|row| row.get::<_, Value>(0)).collect())
    }

    async fn write_entity(
        &self,
        kind: EntityKind,
        id: &str,
        patch: &Value,
    ) -> Result<Value, PersistenceError> {
        if !patch.is_object() {
            return Err(PersistenceError::InvalidDocument {
                kind,
                reason: "expected a JSON object".to_string(),
            });
        }

        let client = self.client().await?;
        match kind {
            EntityKind::Order => {
                // Upsert with a shallow field merge; the stored document
                // always carries its own id.
                let row = client
                    .query_one(
                        "INSERT INTO orders (id, data)
                         VALUES ($1, jsonb_build_object('id', $1::text) || $2)
                         ON CONFLICT (id) DO UPDATE SET data = orders.data || $2
                         RETURNING data",
                        &[&id, patch],
                    )
                    .await
                    .map_err(|e| PersistenceError::Query(e.to_string()))?;
                Ok(row.get::<_, Value>(0))
            }
            EntityKind::Notification => {
                let order_id = patch
                    .get("orderId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PersistenceError::InvalidDocument {
                        kind,
                        reason: "missing orderId".to_string(),
                    })?;
                let message = patch
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PersistenceError::InvalidDocument {
                        kind,
                        reason: "missing message".to_string(),
                    })?;
                let created_at = patch
                    .get("createdAt")
                    .and_then(Value::as_str)
                    .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
                    .unwrap_or_else(Utc::now);

                let row = client
                    .query_one(
                        "INSERT INTO notifications (id, order_id, message, created_at, data)
                         VALUES ($1, $2, $3, $4, $5)
                         RETURNING data",
                        &[&id, &order_id, &message, &created_at, patch],
                    )
                    .await
                    .map_err(|e| PersistenceError::Query(e.to_string()))?;
                Ok(row.get::<_, Value>(0))
            }
            EntityKind::PriorityList => {
                let row = client
                    .query_one(
                        "INSERT INTO priority_list (id, data)
                         VALUES ($1, $2)
                         ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
                         RETURNING data",
                        &[&id, patch],
                    )
                    .await
                    .map_err(|e| PersistenceError::Query(e.to_string()))?;
                Ok(row.get::<_, Value>(0))
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
        let client = self.client().await?;

        let row = client
            .query_one(
                "SELECT EXISTS(
                    SELECT 1 FROM notifications
                    WHERE order_id = $1 AND message = $2 AND id <> $3 AND created_at > $4
                 )",
                &[&order_id, &message, &exclude_id, &cutoff],
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(row.get::<_, bool>(0))
    }
}
