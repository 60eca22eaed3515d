//! Test tooling for the Tally workspace.
//!
//! Provides a wiremock-backed mock collector, event and context fixtures, and
//! tracing setup shared by integration tests.

#![forbid(unsafe_code)]

pub mod fixtures;
pub mod http;

pub use fixtures::FeatureEventBuilder;
pub use self::http::{MockCollector, RecordedRequest, ANALYTICS_PATH, DIAGNOSTICS_PATH};
use tracing_subscriber::EnvFilter;

/// Installs a test-writer fmt subscriber once per process.
///
/// The filter comes from `RUST_LOG`, defaulting to `error`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_test_writer()
        .try_init();
}
