//! Builders for events and contexts with test-friendly defaults.

use serde_json::{json, Value};
use tally_core::{
    AliasEvent, Context, CustomEvent, Event, EvaluationReason, FeatureRequestEvent, IdentifyEvent,
    IndexEvent,
};

/// Creation date used by every fixture unless overridden.
pub const FIXTURE_DATE: u64 = 1_700_000_000_000;

/// Context with only a key.
pub fn context(key: &str) -> Context {
    Context::new(key)
}

/// Anonymous context.
pub fn anonymous_context(key: &str) -> Context {
    Context::builder(key).anonymous(true).build()
}

/// Identify event for `key`.
pub fn identify(key: &str) -> Event {
    Event::Identify(IdentifyEvent { creation_date: FIXTURE_DATE, context: context(key) })
}

/// Index event for `key`.
pub fn index(key: &str) -> Event {
    Event::Index(IndexEvent { creation_date: FIXTURE_DATE, context: context(key) })
}

/// Custom event `event_key` attributed to `context_key`.
pub fn custom(context_key: &str, event_key: &str) -> Event {
    Event::Custom(CustomEvent {
        creation_date: FIXTURE_DATE,
        context: context(context_key),
        key: event_key.to_string(),
        data: None,
        metric_value: None,
    })
}

/// Alias event linking `previous` to `current`.
pub fn alias(current: &Context, previous: &Context) -> Event {
    Event::Alias(AliasEvent::between(FIXTURE_DATE, current, previous))
}

/// Builder for flag evaluation events.
#[derive(Debug, Clone)]
pub struct FeatureEventBuilder {
    event: FeatureRequestEvent,
}

impl FeatureEventBuilder {
    /// Evaluation of `flag_key` for `context_key` serving `true` (default
    /// `false`), variation 0, version 1.
    pub fn new(flag_key: &str, context_key: &str) -> Self {
        let mut event = FeatureRequestEvent::new(
            FIXTURE_DATE,
            context(context_key),
            flag_key,
            json!(true),
            json!(false),
        );
        event.variation = Some(0);
        event.version = Some(1);
        Self { event }
    }

    /// Sets the context.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.event.context = context;
        self
    }

    /// Sets the served value and variation.
    #[must_use]
    pub fn value(mut self, value: Value, variation: usize) -> Self {
        self.event.value = value;
        self.event.variation = Some(variation);
        self
    }

    /// Records a full event for this evaluation.
    #[must_use]
    pub fn tracked(mut self) -> Self {
        self.event.track_events = true;
        self
    }

    /// Records debug events until `until`.
    #[must_use]
    pub fn debug_until(mut self, until: u64) -> Self {
        self.event.debug_events_until_date = Some(until);
        self
    }

    /// Marks the flag unknown.
    #[must_use]
    pub fn unknown(mut self) -> Self {
        self.event.version = None;
        self.event.variation = None;
        self
    }

    /// Attaches a reason.
    #[must_use]
    pub fn reason(mut self, reason: EvaluationReason) -> Self {
        self.event.reason = Some(reason);
        self
    }

    /// Sets the creation date.
    #[must_use]
    pub fn at(mut self, creation_date: u64) -> Self {
        self.event.creation_date = creation_date;
        self
    }

    /// Returns the bare evaluation event.
    pub fn build_feature(self) -> FeatureRequestEvent {
        self.event
    }

    /// Returns the evaluation wrapped as an [`Event`].
    pub fn build(self) -> Event {
        Event::FeatureRequest(self.event)
    }
}
