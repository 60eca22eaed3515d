//! Diagnostic events describing the pipeline itself.
//!
//! One `diagnostic-init` event is sent when the processor starts, then a
//! periodic `diagnostic` event reports counters accumulated since the previous
//! one.

use serde::Serialize;
use uuid::Uuid;

use crate::config::EventsConfig;

/// Identifies this processor instance across diagnostic events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticId {
    /// Random per-instance id.
    pub diagnostic_id: Uuid,
    /// Last six characters of the SDK key.
    pub sdk_key_suffix: String,
}

impl DiagnosticId {
    /// Generates a fresh id for the given SDK key.
    pub fn new(sdk_key: &str) -> Self {
        let chars: Vec<char> = sdk_key.chars().collect();
        let suffix: String = chars[chars.len().saturating_sub(6)..].iter().collect();
        Self { diagnostic_id: Uuid::new_v4(), sdk_key_suffix: suffix }
    }
}

/// SDK identification reported at start-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSdk {
    /// SDK name.
    pub name: String,
    /// SDK version.
    pub version: String,
    /// Wrapper library name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper_name: Option<String>,
    /// Wrapper library version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper_version: Option<String>,
}

/// Summary of the effective configuration, with nothing sensitive in it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticConfiguration {
    /// Whether the events base URI differs from the default.
    #[serde(rename = "customEventsURI")]
    pub custom_events_uri: bool,
    /// Buffer capacity.
    pub events_capacity: usize,
    /// Flush interval.
    pub events_flush_interval_millis: u64,
    /// Context key cache capacity.
    pub user_keys_capacity: usize,
    /// Context key cache reset interval.
    pub user_keys_flush_interval_millis: u64,
    /// 1-in-N sampling interval.
    pub sampling_interval: u32,
    /// Whether every attribute is private.
    pub all_attributes_private: bool,
    /// Periodic diagnostic interval.
    pub diagnostic_recording_interval_millis: u64,
    /// Connect timeout.
    pub connect_timeout_millis: u64,
    /// Request timeout.
    pub socket_timeout_millis: u64,
}

impl DiagnosticConfiguration {
    fn from_config(config: &EventsConfig) -> Self {
        let defaults = EventsConfig::default();
        Self {
            custom_events_uri: config.events_base_uri != defaults.events_base_uri,
            events_capacity: config.capacity,
            events_flush_interval_millis: config.flush_interval_ms,
            user_keys_capacity: config.context_keys_capacity,
            user_keys_flush_interval_millis: millis(config.context_keys_flush_interval()),
            sampling_interval: config.sampling_interval,
            all_attributes_private: config.all_attributes_private,
            diagnostic_recording_interval_millis: millis(config.diagnostic_recording_interval()),
            connect_timeout_millis: config.connect_timeout_ms,
            socket_timeout_millis: config.request_timeout_ms,
        }
    }
}

/// Host platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticPlatform {
    /// Runtime name.
    pub name: String,
    /// Operating system.
    pub os_name: String,
    /// CPU architecture.
    pub os_arch: String,
}

impl DiagnosticPlatform {
    fn current() -> Self {
        Self {
            name: "rust".to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Event sent once when the processor starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInitEvent {
    /// Always `diagnostic-init`.
    pub kind: &'static str,
    /// Instance id.
    pub id: DiagnosticId,
    /// When the processor started.
    pub creation_date: u64,
    /// SDK identification.
    pub sdk: DiagnosticSdk,
    /// Effective configuration.
    pub configuration: DiagnosticConfiguration,
    /// Host platform.
    pub platform: DiagnosticPlatform,
}

/// Periodic statistics event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    /// Always `diagnostic`.
    pub kind: &'static str,
    /// Instance id.
    pub id: DiagnosticId,
    /// When the snapshot was taken.
    pub creation_date: u64,
    /// Start of the period these counters cover.
    pub data_since_date: u64,
    /// Events dropped by the buffer during the period.
    pub dropped_events: u64,
    /// Events whose context was sent by key because it had been seen before.
    pub deduplicated_users: u64,
    /// Events in the most recent analytics payload.
    pub events_in_last_batch: u64,
    /// Events waiting in the buffer when the snapshot was taken.
    pub events_in_queue: u64,
}

/// Owns the diagnostic id and the counters reported by periodic events.
#[derive(Debug)]
pub struct DiagnosticsManager {
    id: DiagnosticId,
    start_date: u64,
    data_since: u64,
    dropped_at_last_snapshot: u64,
    deduplicated_users: u64,
    events_in_last_batch: u64,
}

impl DiagnosticsManager {
    /// Creates a manager whose first period starts at `start_date`.
    pub fn new(sdk_key: &str, start_date: u64) -> Self {
        Self {
            id: DiagnosticId::new(sdk_key),
            start_date,
            data_since: start_date,
            dropped_at_last_snapshot: 0,
            deduplicated_users: 0,
            events_in_last_batch: 0,
        }
    }

    /// Instance id.
    pub fn id(&self) -> &DiagnosticId {
        &self.id
    }

    /// Counts one event that referenced its context by key.
    pub fn record_deduplicated_context(&mut self) {
        self.deduplicated_users += 1;
    }

    /// Records the size of the analytics payload just built.
    pub fn record_events_in_batch(&mut self, count: usize) {
        self.events_in_last_batch = count as u64;
    }

    /// Builds the start-up event.
    pub fn init_event(&self, config: &EventsConfig) -> DiagnosticInitEvent {
        DiagnosticInitEvent {
            kind: "diagnostic-init",
            id: self.id.clone(),
            creation_date: self.start_date,
            sdk: DiagnosticSdk {
                name: crate::SDK_NAME.to_string(),
                version: crate::SDK_VERSION.to_string(),
                wrapper_name: config.wrapper_name.clone(),
                wrapper_version: config.wrapper_version.clone(),
            },
            configuration: DiagnosticConfiguration::from_config(config),
            platform: DiagnosticPlatform::current(),
        }
    }

    /// Builds a periodic event and starts a new period.
    ///
    /// `total_dropped` is the buffer's lifetime drop count; the event reports
    /// only the increase since the previous snapshot. `queued` is the current
    /// buffer length and is reported as is.
    pub fn snapshot_and_reset(
        &mut self,
        now: u64,
        total_dropped: u64,
        queued: usize,
    ) -> DiagnosticEvent {
        let event = DiagnosticEvent {
            kind: "diagnostic",
            id: self.id.clone(),
            creation_date: now,
            data_since_date: self.data_since,
            dropped_events: total_dropped.saturating_sub(self.dropped_at_last_snapshot),
            deduplicated_users: self.deduplicated_users,
            events_in_last_batch: self.events_in_last_batch,
            events_in_queue: queued as u64,
        };

        self.data_since = now;
        self.dropped_at_last_snapshot = total_dropped;
        self.deduplicated_users = 0;
        self.events_in_last_batch = 0;
        event
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
