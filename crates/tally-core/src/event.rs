//! Analytics events produced by the client library.
//!
//! Events are created by evaluation, identify and track call sites and are
//! never mutated afterwards. Timestamps are milliseconds since the Unix epoch.

use serde_json::Value;

use crate::{
    context::{Context, ContextKind},
    reason::EvaluationReason,
};

/// A single analytics record.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A flag was evaluated.
    FeatureRequest(FeatureRequestEvent),
    /// A context was explicitly identified.
    Identify(IdentifyEvent),
    /// Application-defined tracking event.
    Custom(CustomEvent),
    /// Full description of a context referenced elsewhere by key.
    Index(IndexEvent),
    /// Associates two context keys.
    Alias(AliasEvent),
}

impl Event {
    /// Returns the creation timestamp in milliseconds since the epoch.
    pub fn creation_date(&self) -> u64 {
        match self {
            Self::FeatureRequest(e) => e.creation_date,
            Self::Identify(e) => e.creation_date,
            Self::Custom(e) => e.creation_date,
            Self::Index(e) => e.creation_date,
            Self::Alias(e) => e.creation_date,
        }
    }

    /// Returns the context the event refers to, if it carries one.
    pub fn context(&self) -> Option<&Context> {
        match self {
            Self::FeatureRequest(e) => Some(&e.context),
            Self::Identify(e) => Some(&e.context),
            Self::Custom(e) => Some(&e.context),
            Self::Index(e) => Some(&e.context),
            Self::Alias(_) => None,
        }
    }

    /// Returns the wire `kind` of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FeatureRequest(_) => "feature",
            Self::Identify(_) => "identify",
            Self::Custom(_) => "custom",
            Self::Index(_) => "index",
            Self::Alias(_) => "alias",
        }
    }
}

/// Result of evaluating one flag for one context.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequestEvent {
    /// When the evaluation happened.
    pub creation_date: u64,
    /// Context the flag was evaluated for.
    pub context: Context,
    /// Flag key.
    pub key: String,
    /// Index of the served variation, absent when the default was served.
    pub variation: Option<usize>,
    /// Value returned to the caller.
    pub value: Value,
    /// Default value the caller supplied.
    pub default: Value,
    /// Flag version, absent for unknown flags.
    pub version: Option<u64>,
    /// Why this value was served, when reasons were requested.
    pub reason: Option<EvaluationReason>,
    /// Key of the flag this was evaluated as a prerequisite of.
    pub prereq_of: Option<String>,
    /// Whether a full event should be recorded rather than only a summary
    /// count.
    pub track_events: bool,
    /// Debug events are recorded until this timestamp.
    pub debug_events_until_date: Option<u64>,
}

impl FeatureRequestEvent {
    /// Creates an untracked evaluation event with no optional metadata.
    pub fn new(
        creation_date: u64,
        context: Context,
        key: impl Into<String>,
        value: Value,
        default: Value,
    ) -> Self {
        Self {
            creation_date,
            context,
            key: key.into(),
            variation: None,
            value,
            default,
            version: None,
            reason: None,
            prereq_of: None,
            track_events: false,
            debug_events_until_date: None,
        }
    }
}

/// Explicit identify call.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyEvent {
    /// When the call happened.
    pub creation_date: u64,
    /// Identified context.
    pub context: Context,
}

/// Application-defined event.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    /// When the call happened.
    pub creation_date: u64,
    /// Context the event is attributed to.
    pub context: Context,
    /// Event key.
    pub key: String,
    /// Arbitrary payload.
    pub data: Option<Value>,
    /// Numeric value for metric events.
    pub metric_value: Option<f64>,
}

/// Full context description.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEvent {
    /// When the context was first seen.
    pub creation_date: u64,
    /// Context being described.
    pub context: Context,
}

/// Links a previous context key to a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEvent {
    /// When the call happened.
    pub creation_date: u64,
    /// Current key.
    pub key: String,
    /// Kind of the current key.
    pub context_kind: ContextKind,
    /// Key being aliased.
    pub previous_key: String,
    /// Kind of the key being aliased.
    pub previous_context_kind: ContextKind,
}

impl AliasEvent {
    /// Builds an alias event from two contexts.
    pub fn between(creation_date: u64, current: &Context, previous: &Context) -> Self {
        Self {
            creation_date,
            key: current.key().to_string(),
            context_kind: current.kind(),
            previous_key: previous.key().to_string(),
            previous_context_kind: previous.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accessors_cover_every_variant() {
        let context = Context::new("k");
        let events = vec![
            Event::FeatureRequest(FeatureRequestEvent::new(
                1,
                context.clone(),
                "f",
                json!(1),
                json!(0),
            )),
            Event::Identify(IdentifyEvent { creation_date: 2, context: context.clone() }),
            Event::Custom(CustomEvent {
                creation_date: 3,
                context: context.clone(),
                key: "clicked".to_string(),
                data: None,
                metric_value: None,
            }),
            Event::Index(IndexEvent { creation_date: 4, context: context.clone() }),
            Event::Alias(AliasEvent::between(5, &context, &Context::new("old"))),
        ];

        let dates: Vec<u64> = events.iter().map(Event::creation_date).collect();
        let kinds: Vec<&str> = events.iter().map(Event::kind).collect();

        assert_eq!(dates, vec![1, 2, 3, 4, 5]);
        assert_eq!(kinds, vec!["feature", "identify", "custom", "index", "alias"]);
        assert!(events[4].context().is_none());
        assert_eq!(events[0].context().map(Context::key), Some("k"));
    }

    #[test]
    fn alias_records_both_kinds() {
        let anonymous = Context::builder("anon-1").anonymous(true).build();
        let known = Context::new("user-1");

        let alias = AliasEvent::between(10, &known, &anonymous);

        assert_eq!(alias.key, "user-1");
        assert_eq!(alias.context_kind, ContextKind::User);
        assert_eq!(alias.previous_key, "anon-1");
        assert_eq!(alias.previous_context_kind, ContextKind::AnonymousUser);
    }
}
