pub mod event;
pub mod notifier;
pub mod persistence;
pub mod pipeline;
pub mod reconcile;
pub mod suppression;
pub mod throttle;
pub mod transport;
