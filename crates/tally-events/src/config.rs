//! Configuration for the event pipeline.

use std::{collections::HashSet, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{EventsError, Result};

const CONFIG_FILE: &str = "tally.toml";
const ENV_PREFIX: &str = "TALLY_";

/// Diagnostic events are never sent more often than this.
pub const MIN_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(60);

/// Event pipeline configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `TALLY_` (e.g. `TALLY_CAPACITY`)
/// 2. Configuration file (`tally.toml`)
/// 3. Built-in defaults
///
/// # Example
///
/// ```no_run
/// use tally_events::EventsConfig;
///
/// let config = EventsConfig::load().expect("failed to load configuration");
/// println!("flushing every {:?}", config.flush_interval());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Key sent in the `Authorization` header.
    pub sdk_key: String,

    // Buffering
    /// Maximum number of events held between flushes.
    pub capacity: usize,
    /// Time between automatic flushes in milliseconds.
    pub flush_interval_ms: u64,
    /// Include one event in every N. 0 and 1 both mean every event.
    pub sampling_interval: u32,

    // Context deduplication
    /// Number of context keys remembered between cache resets.
    pub context_keys_capacity: usize,
    /// Time between context key cache resets in seconds.
    pub context_keys_flush_interval_secs: u64,

    // Privacy
    /// Redact every context attribute except the key.
    pub all_attributes_private: bool,
    /// Attribute names redacted for every context.
    pub private_attributes: Vec<String>,

    // Transport
    /// Collector base URI.
    pub events_base_uri: String,
    /// Path analytics payloads are posted to.
    pub analytics_path: String,
    /// Path diagnostic payloads are posted to.
    pub diagnostics_path: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Pause before the single retry of a recoverable failure, in
    /// milliseconds.
    pub retry_delay_ms: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Name of a wrapper library, reported in `X-LaunchDarkly-Wrapper`.
    pub wrapper_name: Option<String>,
    /// Version of the wrapper library.
    pub wrapper_version: Option<String>,

    // Diagnostics
    /// Disable diagnostic events entirely.
    pub diagnostic_opt_out: bool,
    /// Time between periodic diagnostic events in seconds.
    pub diagnostic_recording_interval_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            sdk_key: String::new(),
            capacity: crate::DEFAULT_CAPACITY,
            flush_interval_ms: 5_000,
            sampling_interval: 1,
            context_keys_capacity: 1_000,
            context_keys_flush_interval_secs: 300,
            all_attributes_private: false,
            private_attributes: Vec::new(),
            events_base_uri: "https://events.launchdarkly.com".to_string(),
            analytics_path: "/bulk".to_string(),
            diagnostics_path: "/diagnostic".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            retry_delay_ms: 1_000,
            user_agent: format!("{}/{}", crate::SDK_NAME, crate::SDK_VERSION),
            wrapper_name: None,
            wrapper_version: None,
            diagnostic_opt_out: false,
            diagnostic_recording_interval_secs: 900,
        }
    }
}

impl EventsConfig {
    /// Creates a default configuration for the given SDK key.
    pub fn new(sdk_key: impl Into<String>) -> Self {
        Self { sdk_key: sdk_key.into(), ..Self::default() }
    }

    /// Builds the layered provider: defaults, then `tally.toml`, then
    /// `TALLY_` environment variables.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Loads and validates configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::ConfigurationError` if a source cannot be parsed
    /// or a value is out of range.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Extracts and validates configuration from a caller-assembled provider.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::ConfigurationError` if extraction or validation
    /// fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| {
            EventsError::configuration(format!("failed to load configuration: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::ConfigurationError` naming the first invalid
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.sdk_key.trim().is_empty() {
            return Err(EventsError::configuration("sdk_key must not be empty"));
        }
        if self.capacity == 0 {
            return Err(EventsError::configuration("capacity must be greater than 0"));
        }
        if self.flush_interval_ms == 0 {
            return Err(EventsError::configuration("flush_interval_ms must be greater than 0"));
        }
        if self.context_keys_capacity == 0 {
            return Err(EventsError::configuration(
                "context_keys_capacity must be greater than 0",
            ));
        }
        if self.context_keys_flush_interval_secs == 0 {
            return Err(EventsError::configuration(
                "context_keys_flush_interval_secs must be greater than 0",
            ));
        }
        if !self.events_base_uri.starts_with("http://")
            && !self.events_base_uri.starts_with("https://")
        {
            return Err(EventsError::configuration(format!(
                "events_base_uri must be an http(s) URI, got {:?}",
                self.events_base_uri
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(EventsError::configuration("request_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Time between automatic flushes.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Time between context key cache resets.
    pub fn context_keys_flush_interval(&self) -> Duration {
        Duration::from_secs(self.context_keys_flush_interval_secs)
    }

    /// Time between periodic diagnostic events, never below
    /// [`MIN_DIAGNOSTIC_RECORDING_INTERVAL`].
    pub fn diagnostic_recording_interval(&self) -> Duration {
        Duration::from_secs(self.diagnostic_recording_interval_secs)
            .max(MIN_DIAGNOSTIC_RECORDING_INTERVAL)
    }

    /// Connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whole-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Pause before the single retry.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Full URI for analytics payloads.
    pub fn analytics_uri(&self) -> String {
        join_uri(&self.events_base_uri, &self.analytics_path)
    }

    /// Full URI for diagnostic payloads.
    pub fn diagnostics_uri(&self) -> String {
        join_uri(&self.events_base_uri, &self.diagnostics_path)
    }

    /// Private attribute names as a set.
    pub fn private_attribute_set(&self) -> HashSet<String> {
        self.private_attributes.iter().cloned().collect()
    }

    /// `X-LaunchDarkly-Wrapper` header value, when a wrapper is configured.
    pub fn wrapper_header(&self) -> Option<String> {
        let name = self.wrapper_name.as_deref().filter(|n| !n.is_empty())?;
        Some(match self.wrapper_version.as_deref().filter(|v| !v.is_empty()) {
            Some(version) => format!("{name}/{version}"),
            None => name.to_string(),
        })
    }
}

fn join_uri(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_once_key_is_set() {
        let config = EventsConfig::new("sdk-123");

        assert!(config.validate().is_ok());
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.analytics_uri(), "https://events.launchdarkly.com/bulk");
        assert_eq!(config.diagnostics_uri(), "https://events.launchdarkly.com/diagnostic");
    }

    #[test]
    fn empty_key_rejected() {
        let err = EventsConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("sdk_key"));
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = EventsConfig { capacity: 0, ..EventsConfig::new("k") };
        assert!(config.validate().unwrap_err().to_string().contains("capacity"));
    }

    #[test]
    fn non_http_base_uri_rejected() {
        let config =
            EventsConfig { events_base_uri: "ftp://x".to_string(), ..EventsConfig::new("k") };
        assert!(config.validate().is_err());
    }

    #[test]
    fn diagnostic_interval_has_floor() {
        let config =
            EventsConfig { diagnostic_recording_interval_secs: 5, ..EventsConfig::new("k") };
        assert_eq!(config.diagnostic_recording_interval(), MIN_DIAGNOSTIC_RECORDING_INTERVAL);
    }

    #[test]
    fn uri_join_handles_slashes() {
        let config = EventsConfig {
            events_base_uri: "http://localhost:8080/".to_string(),
            analytics_path: "bulk".to_string(),
            ..EventsConfig::new("k")
        };
        assert_eq!(config.analytics_uri(), "http://localhost:8080/bulk");
    }

    #[test]
    fn wrapper_header_formats() {
        let mut config = EventsConfig::new("k");
        assert_eq!(config.wrapper_header(), None);

        config.wrapper_name = Some("react".to_string());
        assert_eq!(config.wrapper_header().as_deref(), Some("react"));

        config.wrapper_version = Some("2.1.0".to_string());
        assert_eq!(config.wrapper_header().as_deref(), Some("react/2.1.0"));
    }

    #[test]
    fn figment_layers_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "sdk_key = \"from-file\"\ncapacity = 50")?;
            jail.set_env("TALLY_CAPACITY", "75");

            let config = EventsConfig::load().map_err(|e| e.to_string())?;

            assert_eq!(config.sdk_key, "from-file");
            assert_eq!(config.capacity, 75);
            assert_eq!(config.flush_interval_ms, 5_000);
            Ok(())
        });
    }
}
