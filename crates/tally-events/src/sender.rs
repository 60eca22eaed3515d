//! Delivery of one serialized payload to the collector.
//!
//! Each call posts a payload, retries a recoverable failure exactly once with
//! the same body and payload id, and reports the outcome as a
//! [`DeliveryResult`]. Errors never escape; they are classified and logged.

use std::sync::Arc;

use chrono::DateTime;
use tally_core::Clock;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    config::EventsConfig,
    error::{ErrorCategory, EventsError},
    payload::{Payload, PayloadKind},
    retry::{RetryDecision, RetryPolicy},
    transport::{Transport, TransportRequest},
};

/// Event schema version sent with analytics payloads.
pub const EVENT_SCHEMA_VERSION: &str = "3";

/// Header carrying the per-payload id.
pub const PAYLOAD_ID_HEADER: &str = "X-LaunchDarkly-Payload-ID";
/// Header carrying the event schema version.
pub const EVENT_SCHEMA_HEADER: &str = "X-LaunchDarkly-Event-Schema";
/// Header identifying a wrapper library.
pub const WRAPPER_HEADER: &str = "X-LaunchDarkly-Wrapper";

/// Final classification of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The collector accepted the payload.
    Succeeded,
    /// The payload was lost; later payloads may still be sent.
    Failed,
    /// The collector rejected the credentials; nothing more may be sent.
    FailedAndMustShutDown,
}

/// Outcome of [`EventSender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Final classification.
    pub status: DeliveryStatus,
    /// Collector clock from the `Date` header of a successful response, in
    /// milliseconds since the epoch.
    pub time_from_server: Option<u64>,
}

impl DeliveryResult {
    fn succeeded(time_from_server: Option<u64>) -> Self {
        Self { status: DeliveryStatus::Succeeded, time_from_server }
    }

    fn failed() -> Self {
        Self { status: DeliveryStatus::Failed, time_from_server: None }
    }

    fn must_shut_down() -> Self {
        Self { status: DeliveryStatus::FailedAndMustShutDown, time_from_server: None }
    }

    /// Whether the payload was accepted.
    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Succeeded
    }
}

/// Posts payloads to the analytics and diagnostic endpoints.
///
/// Holds no state between calls apart from its configuration.
#[derive(Debug, Clone)]
pub struct EventSender {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    analytics_uri: String,
    diagnostics_uri: String,
    sdk_key: String,
    user_agent: String,
    wrapper: Option<String>,
}

impl EventSender {
    /// Creates a sender for the endpoints and credentials in `config`.
    pub fn new(
        config: &EventsConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            clock,
            policy: RetryPolicy::with_delay(config.retry_delay()),
            analytics_uri: config.analytics_uri(),
            diagnostics_uri: config.diagnostics_uri(),
            sdk_key: config.sdk_key.clone(),
            user_agent: config.user_agent.clone(),
            wrapper: config.wrapper_header(),
        }
    }

    /// Delivers `payload`, retrying once on a recoverable failure.
    pub async fn send(&self, payload: &Payload) -> DeliveryResult {
        let payload_id = match payload.kind {
            PayloadKind::Analytics => Some(Uuid::new_v4()),
            PayloadKind::Diagnostic => None,
        };
        let request = self.build_request(payload, payload_id);

        let span = info_span!(
            "send_payload",
            kind = payload.kind.as_str(),
            sequence = payload.sequence_number,
            events = payload.event_count,
            payload_id = payload_id.map(|id| id.to_string()).unwrap_or_default(),
        );

        async move {
            let mut attempt_number = 0;
            loop {
                attempt_number += 1;

                let error = match self.transport.post(request.clone()).await {
                    Ok(response) if response.is_success() => {
                        debug!(
                            attempt = attempt_number,
                            status = response.status_code,
                            "payload delivered"
                        );
                        let server_time = parse_server_time(response.header("date"));
                        return DeliveryResult::succeeded(server_time);
                    },
                    Ok(response) => EventsError::http_status(response.status_code),
                    Err(e) => e,
                };

                match self.policy.decide(attempt_number, &error) {
                    RetryDecision::Retry { after } => {
                        warn!(
                            attempt = attempt_number,
                            category = %ErrorCategory::from(&error),
                            error = %error,
                            retry_in_ms = after.as_millis(),
                            "delivery failed, retrying"
                        );
                        self.clock.sleep(after).await;
                    },
                    RetryDecision::GiveUp { reason } => {
                        warn!(
                            attempt = attempt_number,
                            category = %ErrorCategory::from(&error),
                            reason = %reason,
                            "delivery failed, payload dropped"
                        );
                        return DeliveryResult::failed();
                    },
                    RetryDecision::StandDown { reason } => {
                        error!(
                            attempt = attempt_number,
                            category = %ErrorCategory::from(&error),
                            reason = %reason,
                            "delivery rejected, no further events will be sent"
                        );
                        return DeliveryResult::must_shut_down();
                    },
                }
            }
        }
        .instrument(span)
        .await
    }

    fn build_request(&self, payload: &Payload, payload_id: Option<Uuid>) -> TransportRequest {
        let url = match payload.kind {
            PayloadKind::Analytics => self.analytics_uri.clone(),
            PayloadKind::Diagnostic => self.diagnostics_uri.clone(),
        };

        let mut headers = vec![
            ("Authorization".to_string(), self.sdk_key.clone()),
            ("User-Agent".to_string(), self.user_agent.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(wrapper) = &self.wrapper {
            headers.push((WRAPPER_HEADER.to_string(), wrapper.clone()));
        }
        if let Some(id) = payload_id {
            headers.push((PAYLOAD_ID_HEADER.to_string(), id.to_string()));
            headers.push((EVENT_SCHEMA_HEADER.to_string(), EVENT_SCHEMA_VERSION.to_string()));
        }

        TransportRequest { url, headers, body: payload.body.clone() }
    }
}

/// Parses an RFC 2822 `Date` header into milliseconds since the epoch.
fn parse_server_time(date: Option<&str>) -> Option<u64> {
    let parsed = DateTime::parse_from_rfc2822(date?.trim()).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tally_core::TestClock;
    use wiremock::{
        matchers::{header, header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::transport::ReqwestTransport;

    fn sender(server: &MockServer, clock: &TestClock) -> EventSender {
        let config = EventsConfig {
            events_base_uri: server.uri(),
            wrapper_name: Some("react".to_string()),
            wrapper_version: Some("1.0".to_string()),
            ..EventsConfig::new("sdk-key")
        };
        let transport = Arc::new(ReqwestTransport::new(&config).unwrap());
        EventSender::new(&config, transport, Arc::new(clock.clone()))
    }

    fn payload(kind: PayloadKind) -> Payload {
        Payload { kind, body: Bytes::from_static(b"[]"), sequence_number: 1, event_count: 0 }
    }

    #[test]
    fn server_time_parsed_from_date_header() {
        assert_eq!(parse_server_time(Some("Thu, 01 Jan 1970 00:00:10 GMT")), Some(10_000));
        assert_eq!(parse_server_time(Some("not a date")), None);
        assert_eq!(parse_server_time(None), None);
    }

    #[tokio::test]
    async fn analytics_request_carries_all_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bulk"))
            .and(header("authorization", "sdk-key"))
            .and(header("content-type", "application/json"))
            .and(header("x-launchdarkly-event-schema", "3"))
            .and(header("x-launchdarkly-wrapper", "react/1.0"))
            .and(header_exists("x-launchdarkly-payload-id"))
            .and(header_exists("user-agent"))
            .respond_with(
                ResponseTemplate::new(202).insert_header("Date", "Thu, 01 Jan 1970 00:01:00 GMT"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let clock = TestClock::at_unix_millis(0);

        let result = sender(&server, &clock).send(&payload(PayloadKind::Analytics)).await;

        assert!(result.is_success());
        assert_eq!(result.time_from_server, Some(60_000));
    }

    #[tokio::test]
    async fn retry_waits_through_clock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;
        let clock = TestClock::at_unix_millis(0);

        let result = sender(&server, &clock).send(&payload(PayloadKind::Diagnostic)).await;

        assert_eq!(result.status, DeliveryStatus::Failed);
        assert_eq!(clock.sleep_count(), 1);
        assert_eq!(clock.elapsed(), std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unrecoverable_status_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let clock = TestClock::at_unix_millis(0);

        let result = sender(&server, &clock).send(&payload(PayloadKind::Analytics)).await;

        assert_eq!(result.status, DeliveryStatus::Failed);
        assert_eq!(clock.sleep_count(), 0);
    }
}
