//! # Sync Tuning Configuration
//!
//! Central knobs for the live-update pipeline: suppression TTLs, the
//! fingerprint bucket width, the per-entity throttle interval and the
//! polling fallback cadence.
//!
//! Values resolve in three layers, later layers winning:
//! 1. Compiled-in defaults.
//! 2. An optional JSON file named by the `SYNC_CONFIG_FILE` environment
//!    variable.
//! 3. Per-field environment variable overrides (`SYNC_DEDUP_TTL_SECS`,
//!    `SYNC_POLL_INTERVAL_MS`, ...).

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Custom error types for configuration loading.
#[derive(Debug, Error)]
pub enum SyncConfigError {
    #[error("I/O error reading config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Tuning parameters for the live-update distribution pipeline.
///
/// The fingerprint bucket width is deliberately a parameter rather than a
/// constant: a wider bucket suppresses more aggressively across delivery
/// paths at the cost of dropping legitimate rapid updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// TTL for entries in the duplicate-suppression window, in seconds.
    /// Must exceed realistic end-to-end delivery latency across all paths.
    pub dedup_ttl_secs: u64,
    /// Width of the fingerprint timestamp bucket, in seconds.
    pub fingerprint_bucket_secs: u64,
    /// Minimum interval between accepted updates for one entity, in milliseconds.
    pub throttle_min_interval_ms: u64,
    /// Window within which identical notifications are treated as duplicates
    /// on the producer side, in seconds.
    pub notification_dedup_window_secs: u64,
    /// Cadence of the polling fallback while the transport is down, in milliseconds.
    pub poll_interval_ms: u64,
    /// Grace delay before declaring the transport fully recovered, in
    /// milliseconds. Avoids flapping between polling and live mode.
    pub recovery_grace_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: 60,
            fingerprint_bucket_secs: 60,
            throttle_min_interval_ms: 3000,
            notification_dedup_window_secs: 60,
            poll_interval_ms: 10_000,
            recovery_grace_ms: 2000,
        }
    }
}

impl SyncConfig {
    /// Loads the configuration from the layered sources described in the
    /// module docs.
    pub fn load() -> Result<Self, SyncConfigError> {
        let mut config = match env::var("SYNC_CONFIG_FILE") {
            Ok(path) if !path.is_empty() => {
                let raw = std::fs::read_to_string(&path).map_err(|source| SyncConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str::<SyncConfig>(&raw)
                    .map_err(|source| SyncConfigError::Parse { path, source })?
            }
            _ => SyncConfig::default(),
        };

        config.dedup_ttl_secs = env_override("SYNC_DEDUP_TTL_SECS", config.dedup_ttl_secs)?;
        config.fingerprint_bucket_secs =
            env_override("SYNC_FINGERPRINT_BUCKET_SECS", config.fingerprint_bucket_secs)?;
        config.throttle_min_interval_ms =
            env_override("SYNC_THROTTLE_MIN_INTERVAL_MS", config.throttle_min_interval_ms)?;
        config.notification_dedup_window_secs = env_override(
            "SYNC_NOTIFICATION_DEDUP_WINDOW_SECS",
            config.notification_dedup_window_secs,
        )?;
        config.poll_interval_ms = env_override("SYNC_POLL_INTERVAL_MS", config.poll_interval_ms)?;
        config.recovery_grace_ms =
            env_override("SYNC_RECOVERY_GRACE_MS", config.recovery_grace_ms)?;

        if config.dedup_ttl_secs == 0 {
            return Err(SyncConfigError::InvalidValue {
                field: "dedupTtlSecs",
                value: "0".to_string(),
            });
        }
        if config.poll_interval_ms == 0 {
            return Err(SyncConfigError::InvalidValue {
                field: "pollIntervalMs",
                value: "0".to_string(),
            });
        }

        tracing::debug!(?config, "sync configuration resolved");
        Ok(config)
    }

    /// TTL for suppression-window entries.
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    /// Minimum interval enforced by the throttle gate.
    pub fn throttle_min_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_min_interval_ms)
    }

    /// Producer-side notification dedup window.
    pub fn notification_dedup_window(&self) -> Duration {
        Duration::from_secs(self.notification_dedup_window_secs)
    }

    /// Polling fallback tick interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Grace delay applied before leaving degraded mode.
    pub fn recovery_grace(&self) -> Duration {
        Duration::from_millis(self.recovery_grace_ms)
    }
}

/// Reads an optional `u64` override from the environment.
fn env_override(var: &'static str, current: u64) -> Result<u64, SyncConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse::<u64>().map_err(|_| SyncConfigError::InvalidValue {
            field: var,
            value: raw,
        }),
        Err(_) => Ok(current),
    }
}
