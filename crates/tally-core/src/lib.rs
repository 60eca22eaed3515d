//! Core event model for the Tally analytics pipeline.
//!
//! Provides the immutable analytics events produced by flag evaluations,
//! identify and track calls, the evaluation contexts they reference together
//! with attribute redaction, the evaluation reason union, and the clock
//! abstraction every time-dependent component is built on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod event;
pub mod reason;
pub mod time;

pub use context::{Context, ContextBuilder, ContextKind};
pub use event::{AliasEvent, CustomEvent, Event, FeatureRequestEvent, IdentifyEvent, IndexEvent};
pub use reason::{ErrorKind, EvaluationReason};
pub use time::{Clock, RealClock, TestClock};
