//! Bounded memory of context keys already described to the collector.
//!
//! Once a context has been sent in full, later events reference it by key
//! only. The cache is cleared wholesale on a fixed cadence so full details are
//! re-sent periodically, and evicts its oldest key when full.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use tally_core::Clock;

/// Set of recently seen context keys with FIFO eviction and periodic reset.
#[derive(Debug)]
pub struct ContextKeyCache {
    seen: HashMap<String, u64>,
    order: VecDeque<String>,
    capacity: usize,
    flush_interval: Duration,
    last_reset: Instant,
    clock: Arc<dyn Clock>,
}

impl ContextKeyCache {
    /// Creates an empty cache holding at most `capacity` keys and clearing
    /// itself every `flush_interval`.
    pub fn new(capacity: usize, flush_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            flush_interval,
            last_reset: clock.now(),
            clock,
        }
    }

    /// Returns `true` the first time `key` is seen within the current cache
    /// window, recording it; `false` if it was already recorded.
    pub fn should_inline(&mut self, key: &str) -> bool {
        self.reset_if_due();

        let now = self.clock.unix_millis();
        if let Some(last_seen) = self.seen.get_mut(key) {
            *last_seen = now;
            return false;
        }

        self.insert(key, now);
        true
    }

    /// Records `key` as described without asking. Used for events that always
    /// carry the full context.
    pub fn notice(&mut self, key: &str) {
        self.reset_if_due();

        let now = self.clock.unix_millis();
        match self.seen.get_mut(key) {
            Some(last_seen) => *last_seen = now,
            None => self.insert(key, now),
        }
    }

    /// Forgets every key and restarts the reset window.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.order.clear();
        self.last_reset = self.clock.now();
    }

    /// Number of keys currently remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` when no keys are remembered.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Timestamp (ms since epoch) at which `key` was last seen.
    pub fn last_seen(&self, key: &str) -> Option<u64> {
        self.seen.get(key).copied()
    }

    fn reset_if_due(&mut self) {
        if self.clock.now().duration_since(self.last_reset) >= self.flush_interval {
            self.reset();
        }
    }

    fn insert(&mut self, key: &str, now: u64) {
        if self.seen.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.to_string(), now);
        self.order.push_back(key.to_string());
    }
}
