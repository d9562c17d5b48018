//! # Duplicate-Suppression Window
//!
//! Rolling sets of seen event ids and content fingerprints with timed
//! eviction. One window lives on each producer or consumer instance for the
//! life of the session and is never shared across the process boundary.
//!
//! Eviction is a time-ordered queue swept lazily on every call rather than a
//! timer handle per entry: the TTL is fixed, so insertion order is expiry
//! order and a sweep only inspects the queue front.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::configs::SyncConfig;
use crate::core::event::ChangeEvent;

/// A set of string keys where each entry expires a fixed TTL after insertion.
#[derive(Debug)]
struct ExpiringSet {
    entries: HashMap<String, Instant>,
    expiry_queue: VecDeque<(Instant, String)>,
    ttl: Duration,
}

impl ExpiringSet {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            expiry_queue: VecDeque::new(),
            ttl,
        }
    }

    /// Removes every entry whose deadline has passed. The queue is ordered
    /// by deadline, so this stops at the first live entry.
    fn sweep(&mut self, now: Instant) {
        while let Some((deadline, key)) = self.expiry_queue.front() {
            if *deadline > now {
                break;
            }
            // Only remove the map entry if it still belongs to this queue
            // slot; a re-insert after expiry owns a newer deadline.
            if self.entries.get(key) == Some(deadline) {
                self.entries.remove(key);
            }
            self.expiry_queue.pop_front();
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn insert(&mut self, key: String, now: Instant) {
        let deadline = now + self.ttl;
        self.entries.insert(key.clone(), deadline);
        self.expiry_queue.push_back((deadline, key));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-instance filter that rejects events already seen by id or by content
/// fingerprint within the TTL window.
pub struct SuppressionWindow {
    seen_ids: ExpiringSet,
    seen_fingerprints: ExpiringSet,
    fingerprint_bucket_secs: u64,
}

impl SuppressionWindow {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            seen_ids: ExpiringSet::new(config.dedup_ttl()),
            seen_fingerprints: ExpiringSet::new(config.dedup_ttl()),
            fingerprint_bucket_secs: config.fingerprint_bucket_secs,
        }
    }

    /// Decides whether `event` should be processed, marking it as seen on
    /// acceptance.
    ///
    /// The check and the mark are one synchronous step with no await point
    /// in between, so two near-simultaneous deliveries of the same event
    /// cannot both pass.
    ///
    /// Two events for the same entity that differ in payload but land in
    /// the same fingerprint bucket collide and the second is dropped. That
    /// is an accepted tradeoff against update storms; the throttle gate is
    /// the coarser second line of defense.
    pub fn should_process(&mut self, event: &ChangeEvent) -> bool {
        self.should_process_at(event, Instant::now())
    }

    /// Clock-injected variant of [`Self::should_process`].
    pub fn should_process_at(&mut self, event: &ChangeEvent, now: Instant) -> bool {
        self.seen_ids.sweep(now);
        self.seen_fingerprints.sweep(now);

        let dedup_key = event.dedup_key();
        if self.seen_ids.contains(&dedup_key) {
            tracing::debug!(entity_id = %event.entity_id, event_id = %event.event_id, "duplicate event id, dropping");
            return false;
        }

        let fingerprint = event.fingerprint(self.fingerprint_bucket_secs);
        if self.seen_fingerprints.contains(&fingerprint) {
            tracing::debug!(entity_id = %event.entity_id, %fingerprint, "duplicate fingerprint, dropping");
            return false;
        }

        self.seen_ids.insert(dedup_key, now);
        self.seen_fingerprints.insert(fingerprint, now);
        true
    }

    /// Number of live id entries; diagnostic only.
    pub fn tracked_ids(&self) -> usize {
        self.seen_ids.len()
    }

    /// Number of live fingerprint entries; diagnostic only.
    pub fn tracked_fingerprints(&self) -> usize {
        self.seen_fingerprints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::EventKind;
    use serde_json::json;

    fn config_with_ttl(secs: u64) -> SyncConfig {
        SyncConfig {
            dedup_ttl_secs: secs,
            ..SyncConfig::default()
        }
    }

    #[test]
    fn expired_entries_are_accepted_again() {
        let mut window = SuppressionWindow::new(&config_with_ttl(30));
        let event = ChangeEvent::new(EventKind::OrderUpdated, "O1", json!({"qty": 4}));

        let start = Instant::now();
        assert!(window.should_process_at(&event, start));
        assert!(!window.should_process_at(&event, start + Duration::from_secs(10)));
        assert!(window.should_process_at(&event, start + Duration::from_secs(31)));
    }

    #[test]
    fn sweep_bounds_memory() {
        let mut window = SuppressionWindow::new(&config_with_ttl(5));
        let start = Instant::now();
        for i in 0..100 {
            let event = ChangeEvent::new(EventKind::OrderUpdated, format!("O{i}"), json!({"i": i}));
            assert!(window.should_process_at(&event, start));
        }
        assert_eq!(window.tracked_ids(), 100);

        let late = ChangeEvent::new(EventKind::OrderUpdated, "late", json!({}));
        assert!(window.should_process_at(&late, start + Duration::from_secs(6)));
        assert_eq!(window.tracked_ids(), 1);
        assert_eq!(window.tracked_fingerprints(), 1);
    }
}
