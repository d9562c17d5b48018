//! # Per-Entity Throttle Gate
//!
//! A minimum-interval gate that drops updates arriving too soon after the
//! last accepted update for the same entity, protecting the UI from update
//! storms. Applied only to high-frequency kinds (order field edits); see
//! [`crate::core::event::EventKind::is_throttled`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Tracks the last accepted update per entity and enforces a fixed minimum
/// interval between acceptances.
pub struct ThrottleGate {
    last_accepted: HashMap<String, Instant>,
    insertion_order: VecDeque<(Instant, String)>,
    min_interval: Duration,
}

impl ThrottleGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_accepted: HashMap::new(),
            insertion_order: VecDeque::new(),
            min_interval,
        }
    }

    /// Returns `true` and records the acceptance if at least the minimum
    /// interval has passed since the last accepted update for `entity_id`.
    /// Rejections do not reset the interval.
    pub fn allow(&mut self, entity_id: &str, now: Instant) -> bool {
        self.prune(now);

        if let Some(last) = self.last_accepted.get(entity_id) {
            if now.duration_since(*last) < self.min_interval {
                tracing::debug!(%entity_id, "update throttled");
                return false;
            }
        }

        self.last_accepted.insert(entity_id.to_string(), now);
        self.insertion_order.push_back((now, entity_id.to_string()));
        true
    }

    /// Drops bookkeeping for entities whose interval has long passed; they
    /// behave identically to never-seen entities.
    fn prune(&mut self, now: Instant) {
        while let Some((accepted_at, entity_id)) = self.insertion_order.front() {
            if now.duration_since(*accepted_at) < self.min_interval {
                break;
            }
            if self.last_accepted.get(entity_id) == Some(accepted_at) {
                self.last_accepted.remove(entity_id);
            }
            self.insertion_order.pop_front();
        }
    }

    /// Number of entities currently tracked; diagnostic only.
    pub fn tracked_entities(&self) -> usize {
        self.last_accepted.len()
    }
}
