//! Property-based tests for the in-memory pipeline components.
//!
//! Exercises the buffer, context key cache and summarizer with generated
//! inputs; no collector is involved.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use proptest::prelude::*;
use tally_core::TestClock;
use tally_events::{ContextKeyCache, EventBuffer, EventSummarizer, QueuedEvent};
use tally_testing::fixtures::{self, FeatureEventBuilder};

fn context_key_strategy() -> impl Strategy<Value = String> {
    "user-[0-9]{1,2}"
}

proptest! {
    #[test]
    fn buffer_never_exceeds_capacity(capacity in 1usize..50, sent in 0usize..200) {
        let mut buffer = EventBuffer::new(capacity);

        for n in 0..sent {
            buffer.enqueue(QueuedEvent::inline(fixtures::identify(&format!("user-{n}"))));
        }

        prop_assert!(buffer.len() <= capacity);
        prop_assert_eq!(buffer.len(), sent.min(capacity));
        prop_assert_eq!(buffer.dropped_count(), sent.saturating_sub(capacity) as u64);
    }

    #[test]
    fn drained_events_keep_arrival_order(
        keys in prop::collection::vec(context_key_strategy(), 0..40)
    ) {
        let mut buffer = EventBuffer::new(100);
        for key in &keys {
            buffer.enqueue(QueuedEvent::inline(fixtures::identify(key)));
        }

        let drained: Vec<String> = buffer
            .drain_all()
            .iter()
            .map(|queued| queued.event.context().unwrap().key().to_string())
            .collect();

        prop_assert_eq!(drained, keys);
        prop_assert!(buffer.is_empty());
    }

    #[test]
    fn cache_bounded_and_inlines_each_key_once(
        capacity in 1usize..20,
        keys in prop::collection::vec(context_key_strategy(), 1..100)
    ) {
        let clock = TestClock::at_unix_millis(0);
        let mut cache = ContextKeyCache::new(capacity, Duration::from_secs(300), Arc::new(clock));
        let mut remembered: Vec<String> = Vec::new();

        for key in &keys {
            let inlined = cache.should_inline(key);
            prop_assert_eq!(inlined, !remembered.contains(key));
            if inlined {
                remembered.push(key.clone());
                if remembered.len() > capacity {
                    remembered.remove(0);
                }
            }
            prop_assert!(cache.len() <= capacity);
        }
    }

    #[test]
    fn cache_reset_forgets_every_key(
        keys in prop::collection::hash_set(context_key_strategy(), 1..30)
    ) {
        let clock = TestClock::at_unix_millis(0);
        let mut cache =
            ContextKeyCache::new(100, Duration::from_secs(300), Arc::new(clock.clone()));

        for key in &keys {
            prop_assert!(cache.should_inline(key));
            prop_assert!(!cache.should_inline(key));
        }

        clock.advance(Duration::from_secs(300));
        for key in &keys {
            prop_assert!(cache.should_inline(key));
        }
        prop_assert_eq!(cache.len(), keys.len());
    }

    #[test]
    fn summary_counts_every_evaluation(
        evaluations in prop::collection::vec((0usize..3, 0usize..2), 1..60)
    ) {
        let mut summarizer = EventSummarizer::new();
        for (n, (flag, variation)) in evaluations.iter().enumerate() {
            let event = FeatureEventBuilder::new(&format!("flag-{flag}"), "user-1")
                .value(serde_json::json!(variation), *variation)
                .at(1_000 + n as u64)
                .build_feature();
            summarizer.summarize(&event);
        }

        let summary = summarizer.snapshot_and_reset();

        prop_assert_eq!(summary.total(), evaluations.len() as u64);
        prop_assert_eq!(summary.start_date, 1_000);
        prop_assert_eq!(summary.end_date, 1_000 + evaluations.len() as u64 - 1);
        let distinct: HashSet<_> = evaluations.iter().collect();
        prop_assert_eq!(summary.counters.len(), distinct.len());
        prop_assert!(summarizer.is_empty());
    }
}
