//! Conversion of drained events into wire payloads.
//!
//! Analytics payloads are JSON arrays in event schema 3; diagnostic payloads
//! are single JSON objects. Serialization is pure: no I/O, no shared state
//! other than the sequence counter.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tally_core::{Context, Event, FeatureRequestEvent};
use tracing::{debug, error, warn};

use crate::{
    buffer::QueuedEvent,
    config::EventsConfig,
    error::{ErrorCategory, EventsError, Result},
    summarizer::EventSummary,
};

/// Which endpoint a payload is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Batch of analytics events.
    Analytics,
    /// One diagnostic event.
    Diagnostic,
}

impl PayloadKind {
    /// Label used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Diagnostic => "diagnostic",
        }
    }
}

/// Serialized body ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Destination kind.
    pub kind: PayloadKind,
    /// JSON body.
    pub body: Bytes,
    /// Process-wide sequence number, increasing with every payload built.
    pub sequence_number: u64,
    /// Number of events in the body.
    pub event_count: usize,
}

/// Builds [`Payload`]s from drained batches and diagnostic snapshots.
#[derive(Debug)]
pub struct PayloadSerializer {
    all_attributes_private: bool,
    private_attributes: HashSet<String>,
    sampling_interval: u32,
    sequence: AtomicU64,
}

impl PayloadSerializer {
    /// Creates a serializer using the privacy and sampling settings of
    /// `config`.
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            all_attributes_private: config.all_attributes_private,
            private_attributes: config.private_attribute_set(),
            sampling_interval: config.sampling_interval,
            sequence: AtomicU64::new(0),
        }
    }

    /// Serializes a drained batch plus its summary into one analytics
    /// payload.
    ///
    /// Events may be sampled out; summaries never are. Events that cannot be
    /// serialized are logged and skipped. Returns `None` when nothing is left
    /// to send.
    pub fn serialize_analytics(
        &self,
        events: &[QueuedEvent],
        summary: &EventSummary,
    ) -> Option<Payload> {
        let mut output = Vec::with_capacity(events.len() + 1);

        for queued in events {
            if !self.sampled_in() {
                continue;
            }
            match self.event_json(queued) {
                Ok(value) => output.push(value),
                Err(e) => {
                    warn!(
                        kind = queued.kind(),
                        category = %ErrorCategory::from(&e),
                        error = %e,
                        "skipping event that could not be serialized"
                    );
                },
            }
        }

        if !summary.is_empty() {
            output.push(summary_json(summary));
        }

        if output.is_empty() {
            debug!(drained = events.len(), "no events left to send after sampling");
            return None;
        }

        let event_count = output.len();
        self.finish(PayloadKind::Analytics, &Value::Array(output), event_count)
    }

    /// Serializes one diagnostic event.
    pub fn serialize_diagnostic<T: Serialize>(&self, event: &T) -> Option<Payload> {
        self.finish(PayloadKind::Diagnostic, event, 1)
    }

    /// Serializes a single queued event to its wire shape.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::Serialization` if a field cannot be represented
    /// in JSON.
    pub fn event_json(&self, queued: &QueuedEvent) -> Result<Value> {
        let kind = queued.kind();
        let mut out = Map::new();
        out.insert("kind".to_string(), json!(kind));
        out.insert("creationDate".to_string(), json!(queued.event.creation_date()));

        match &queued.event {
            Event::FeatureRequest(e) => self.feature_fields(&mut out, e, queued.inline_context)?,
            Event::Identify(e) => {
                out.insert("key".to_string(), json!(e.context.key()));
                out.insert("user".to_string(), self.redact(&e.context));
            },
            Event::Custom(e) => {
                out.insert("key".to_string(), json!(e.key));
                if let Some(data) = &e.data {
                    out.insert("data".to_string(), data.clone());
                }
                if let Some(metric) = e.metric_value {
                    let number = serde_json::Number::from_f64(metric).ok_or_else(|| {
                        EventsError::serialization(kind, format!("metric {metric} is not finite"))
                    })?;
                    out.insert("metricValue".to_string(), Value::Number(number));
                }
                self.context_fields(&mut out, &e.context, queued.inline_context);
            },
            Event::Index(e) => {
                out.insert("user".to_string(), self.redact(&e.context));
            },
            Event::Alias(e) => {
                out.insert("key".to_string(), json!(e.key));
                out.insert("contextKind".to_string(), json!(e.context_kind.as_str()));
                out.insert("previousKey".to_string(), json!(e.previous_key));
                out.insert(
                    "previousContextKind".to_string(),
                    json!(e.previous_context_kind.as_str()),
                );
            },
        }

        Ok(Value::Object(out))
    }

    fn feature_fields(
        &self,
        out: &mut Map<String, Value>,
        event: &FeatureRequestEvent,
        inline: bool,
    ) -> Result<()> {
        out.insert("key".to_string(), json!(event.key));
        if let Some(version) = event.version {
            out.insert("version".to_string(), json!(version));
        }
        if let Some(variation) = event.variation {
            out.insert("variation".to_string(), json!(variation));
        }
        out.insert("value".to_string(), event.value.clone());
        out.insert("default".to_string(), event.default.clone());
        if let Some(reason) = &event.reason {
            let reason = serde_json::to_value(reason)
                .map_err(|e| EventsError::serialization("feature", e.to_string()))?;
            out.insert("reason".to_string(), reason);
        }
        if let Some(prereq_of) = &event.prereq_of {
            out.insert("prereqOf".to_string(), json!(prereq_of));
        }
        self.context_fields(out, &event.context, inline);
        Ok(())
    }

    fn context_fields(&self, out: &mut Map<String, Value>, context: &Context, inline: bool) {
        if inline {
            out.insert("user".to_string(), self.redact(context));
        } else {
            out.insert("userKey".to_string(), json!(context.key()));
        }
        if context.is_anonymous() {
            out.insert("contextKind".to_string(), json!(context.kind().as_str()));
        }
    }

    fn redact(&self, context: &Context) -> Value {
        context.redact(self.all_attributes_private, &self.private_attributes)
    }

    fn sampled_in(&self) -> bool {
        self.sampling_interval <= 1 || rand::rng().random_range(0..self.sampling_interval) == 0
    }

    fn finish<T: Serialize + ?Sized>(
        &self,
        kind: PayloadKind,
        value: &T,
        event_count: usize,
    ) -> Option<Payload> {
        match serde_json::to_vec(value) {
            Ok(body) => Some(Payload {
                kind,
                body: Bytes::from(body),
                sequence_number: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
                event_count,
            }),
            Err(e) => {
                error!(payload = kind.as_str(), error = %e, "failed to serialize payload");
                None
            },
        }
    }
}

fn summary_json(summary: &EventSummary) -> Value {
    let mut features: Map<String, Value> = Map::new();

    for (key, counter) in &summary.counters {
        let flag = features
            .entry(key.flag_key.clone())
            .or_insert_with(|| json!({ "default": counter.default, "counters": [] }));

        let mut entry = Map::new();
        entry.insert("value".to_string(), counter.value.clone());
        if let Some(variation) = key.variation {
            entry.insert("variation".to_string(), json!(variation));
        }
        match key.version {
            Some(version) => {
                entry.insert("version".to_string(), json!(version));
            },
            None => {
                entry.insert("unknown".to_string(), json!(true));
            },
        }
        entry.insert("count".to_string(), json!(counter.count));

        if let Some(counters) = flag.get_mut("counters").and_then(Value::as_array_mut) {
            counters.push(Value::Object(entry));
        }
    }

    json!({
        "kind": "summary",
        "startDate": summary.start_date,
        "endDate": summary.end_date,
        "features": features,
    })
}
