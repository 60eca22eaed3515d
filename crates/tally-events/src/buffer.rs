//! Bounded FIFO of events waiting for the next flush.

use std::collections::VecDeque;

use tally_core::{Event, FeatureRequestEvent};
use tracing::warn;

/// An event accepted into the buffer together with how it must be
/// serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    /// The original, unmodified event.
    pub event: Event,
    /// Serialize the full (redacted) context instead of its key.
    pub inline_context: bool,
    /// Emit as a `debug` event. Only meaningful for flag evaluations.
    pub debug: bool,
}

impl QueuedEvent {
    /// Queues an event carrying its full context.
    pub fn inline(event: Event) -> Self {
        Self { event, inline_context: true, debug: false }
    }

    /// Queues an event that references its context by key only.
    pub fn by_key(event: Event) -> Self {
        Self { event, inline_context: false, debug: false }
    }

    /// Queues a debug copy of a flag evaluation. Debug events always carry
    /// the full context.
    pub fn debug(event: FeatureRequestEvent) -> Self {
        Self { event: Event::FeatureRequest(event), inline_context: true, debug: true }
    }

    /// Wire kind this entry serializes as.
    pub fn kind(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            self.event.kind()
        }
    }
}

/// Capacity-limited ordered buffer.
///
/// Once full, new events are discarded and counted; retained events keep
/// their arrival order.
#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<QueuedEvent>,
    capacity: usize,
    dropped: u64,
    overflow_reported: bool,
}

impl EventBuffer {
    /// Creates an empty buffer that holds at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
            overflow_reported: false,
        }
    }

    /// Appends an event unless the buffer is full.
    ///
    /// Returns `false` if the event was dropped. The first drop after each
    /// drain is logged; later ones are only counted.
    pub fn enqueue(&mut self, event: QueuedEvent) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            if !self.overflow_reported {
                self.overflow_reported = true;
                warn!(
                    capacity = self.capacity,
                    "exceeded event buffer capacity, dropping events until next flush"
                );
            }
            return false;
        }

        self.events.push_back(event);
        true
    }

    /// Removes and returns every buffered event in arrival order.
    pub fn drain_all(&mut self) -> Vec<QueuedEvent> {
        self.overflow_reported = false;
        self.events.drain(..).collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of buffered events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events dropped since creation. Never decreases.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
