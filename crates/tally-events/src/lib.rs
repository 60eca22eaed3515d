//! Batching, scheduling and delivery of analytics events.
//!
//! Events handed to [`EventProcessor::send_event`] are buffered in memory up
//! to a fixed capacity, deduplicated by context key, and periodically
//! serialized and posted to the collector. Delivery is best-effort: a failed
//! payload is retried once, credential rejections disable delivery for good,
//! and nothing is persisted across restarts.
//!
//! The pipeline is assembled from small components, each usable on its own:
//! [`EventBuffer`], [`ContextKeyCache`], [`EventSummarizer`],
//! [`PayloadSerializer`], [`EventSender`] and [`FlushScheduler`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod config;
pub mod context_cache;
pub mod diagnostics;
pub mod error;
pub mod payload;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod state;
pub mod summarizer;
pub mod transport;

pub use buffer::{EventBuffer, QueuedEvent};
pub use config::EventsConfig;
pub use context_cache::ContextKeyCache;
pub use diagnostics::{DiagnosticEvent, DiagnosticId, DiagnosticInitEvent, DiagnosticsManager};
pub use error::{ErrorCategory, EventsError, Result};
pub use payload::{Payload, PayloadKind, PayloadSerializer};
pub use processor::EventProcessor;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{FlushScheduler, SchedulerState};
pub use sender::{DeliveryResult, DeliveryStatus, EventSender};
pub use state::PipelineState;
pub use summarizer::{EventSummarizer, EventSummary};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

/// Default maximum number of buffered events.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// SDK name reported in the user agent and diagnostics.
pub const SDK_NAME: &str = "TallyRustClient";

/// SDK version reported in the user agent and diagnostics.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
