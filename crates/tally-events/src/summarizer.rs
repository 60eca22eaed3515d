//! Aggregation of flag evaluations into per-flag counters.
//!
//! Every evaluation is counted here whether or not a full event is recorded
//! for it. The counters are drained together with the buffer and emitted as a
//! single `summary` event.

use std::collections::BTreeMap;

use serde_json::Value;
use tally_core::FeatureRequestEvent;

/// Identifies one counter: a flag, the variation served and the flag version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterKey {
    /// Flag key.
    pub flag_key: String,
    /// Served variation, if any.
    pub variation: Option<usize>,
    /// Flag version, absent for unknown flags.
    pub version: Option<u64>,
}

/// Number of times one (flag, variation, version) combination was served.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterValue {
    /// Value served.
    pub value: Value,
    /// Default supplied by the caller.
    pub default: Value,
    /// Evaluations counted.
    pub count: u64,
}

/// Counters accumulated since the last drain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventSummary {
    /// Earliest creation date counted.
    pub start_date: u64,
    /// Latest creation date counted.
    pub end_date: u64,
    /// Counters ordered by flag key, then variation and version.
    pub counters: BTreeMap<CounterKey, CounterValue>,
}

impl EventSummary {
    /// Returns `true` when no evaluation has been counted.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Total evaluations counted across all counters.
    pub fn total(&self) -> u64 {
        self.counters.values().map(|counter| counter.count).sum()
    }
}

/// Accumulates [`EventSummary`] counters between flushes.
#[derive(Debug, Default)]
pub struct EventSummarizer {
    current: EventSummary,
}

impl EventSummarizer {
    /// Creates an empty summarizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one flag evaluation.
    pub fn summarize(&mut self, event: &FeatureRequestEvent) {
        let key = CounterKey {
            flag_key: event.key.clone(),
            variation: event.variation,
            version: event.version,
        };

        self.current
            .counters
            .entry(key)
            .and_modify(|counter| counter.count += 1)
            .or_insert_with(|| CounterValue {
                value: event.value.clone(),
                default: event.default.clone(),
                count: 1,
            });

        let summary = &mut self.current;
        if summary.start_date == 0 || event.creation_date < summary.start_date {
            summary.start_date = event.creation_date;
        }
        if event.creation_date > summary.end_date {
            summary.end_date = event.creation_date;
        }
    }

    /// Returns the accumulated counters and starts a new window.
    pub fn snapshot_and_reset(&mut self) -> EventSummary {
        std::mem::take(&mut self.current)
    }

    /// Returns `true` when nothing has been counted since the last drain.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}
