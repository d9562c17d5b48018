// Folder-based feature gating: each top-level module is compiled only when
// its feature is enabled, so binaries pull in exactly the stack they need.

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "fallback")]
pub mod fallback;

// Re-export the most commonly used types at the crate root.
#[cfg(feature = "configs")]
pub use configs::config_sync::{SyncConfig, SyncConfigError};

#[cfg(feature = "core")]
pub use core::event::{ChangeEvent, EventKind, NOTIFICATIONS_CHANNEL, ORDERS_CHANNEL};
