pub mod poll_fallback;
pub mod state_source;

pub use poll_fallback::{FallbackPhase, PollingFallback};
pub use state_source::{HttpStateSource, StateSource, StateSourceError};
