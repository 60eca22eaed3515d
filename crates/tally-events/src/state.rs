//! Mutable pipeline state shared by producers and the flush scheduler.
//!
//! Everything here sits behind a single mutex that is held only for local,
//! non-I/O work: deciding how an incoming event is queued, and draining the
//! queue for a flush.

use std::sync::Arc;

use tally_core::{Clock, Event, FeatureRequestEvent, IndexEvent};

use crate::{
    buffer::{EventBuffer, QueuedEvent},
    config::EventsConfig,
    context_cache::ContextKeyCache,
    diagnostics::DiagnosticsManager,
    summarizer::{EventSummarizer, EventSummary},
};

/// Buffered events plus everything needed to decide how new events are
/// queued.
#[derive(Debug)]
pub struct PipelineState {
    /// Events awaiting the next flush.
    pub buffer: EventBuffer,
    /// Evaluation counters awaiting the next flush.
    pub summarizer: EventSummarizer,
    /// Context keys already described to the collector.
    pub cache: ContextKeyCache,
    /// Diagnostic id and counters.
    pub diagnostics: DiagnosticsManager,
    /// Collector clock reported by the most recent successful delivery.
    pub last_known_server_time: Option<u64>,
}

impl PipelineState {
    /// Creates empty state sized from `config`.
    pub fn new(config: &EventsConfig, clock: Arc<dyn Clock>) -> Self {
        let start_date = clock.unix_millis();
        Self {
            buffer: EventBuffer::new(config.capacity),
            summarizer: EventSummarizer::new(),
            cache: ContextKeyCache::new(
                config.context_keys_capacity,
                config.context_keys_flush_interval(),
                clock,
            ),
            diagnostics: DiagnosticsManager::new(&config.sdk_key, start_date),
            last_known_server_time: None,
        }
    }

    /// Records one incoming event.
    ///
    /// Flag evaluations are always counted in the summary; a full event is
    /// queued only when the flag tracks events, and a debug copy while its
    /// debug window is open. The first event seen for a context carries the
    /// full context (or triggers an index event when nothing else is
    /// queued); later ones reference it by key.
    pub fn ingest(&mut self, event: Event, now: u64) {
        match event {
            Event::FeatureRequest(feature) => self.ingest_feature(feature, now),
            Event::Custom(custom) => {
                let inline = self.should_inline(custom.context.key());
                let queued = Event::Custom(custom);
                self.buffer.enqueue(if inline {
                    QueuedEvent::inline(queued)
                } else {
                    QueuedEvent::by_key(queued)
                });
            },
            Event::Identify(identify) => {
                self.cache.notice(identify.context.key());
                self.buffer.enqueue(QueuedEvent::inline(Event::Identify(identify)));
            },
            Event::Index(index) => {
                self.cache.notice(index.context.key());
                self.buffer.enqueue(QueuedEvent::inline(Event::Index(index)));
            },
            Event::Alias(alias) => {
                self.buffer.enqueue(QueuedEvent::inline(Event::Alias(alias)));
            },
        }
    }

    fn ingest_feature(&mut self, feature: FeatureRequestEvent, now: u64) {
        self.summarizer.summarize(&feature);

        let inline = self.should_inline(feature.context.key());
        let debug = self.debug_window_open(&feature, now);

        if feature.track_events {
            let debug_copy = debug.then(|| feature.clone());
            let queued = Event::FeatureRequest(feature);
            self.buffer.enqueue(if inline {
                QueuedEvent::inline(queued)
            } else {
                QueuedEvent::by_key(queued)
            });
            if let Some(copy) = debug_copy {
                self.buffer.enqueue(QueuedEvent::debug(copy));
            }
            return;
        }

        if inline {
            let index = IndexEvent {
                creation_date: feature.creation_date,
                context: feature.context.clone(),
            };
            self.buffer.enqueue(QueuedEvent::inline(Event::Index(index)));
        }
        if debug {
            self.buffer.enqueue(QueuedEvent::debug(feature));
        }
    }

    fn should_inline(&mut self, key: &str) -> bool {
        let inline = self.cache.should_inline(key);
        if !inline {
            self.diagnostics.record_deduplicated_context();
        }
        inline
    }

    /// Debug events are recorded while the deadline is later than both the
    /// local clock and the last collector clock seen.
    fn debug_window_open(&self, feature: &FeatureRequestEvent, now: u64) -> bool {
        let Some(until) = feature.debug_events_until_date else {
            return false;
        };
        until > now && self.last_known_server_time.map_or(true, |server| until > server)
    }

    /// Removes every queued event and the accumulated summary.
    pub fn drain(&mut self) -> (Vec<QueuedEvent>, EventSummary) {
        (self.buffer.drain_all(), self.summarizer.snapshot_and_reset())
    }

    /// Whether nothing is waiting to be flushed.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.summarizer.is_empty()
    }
}
