//! Integration tests for payload delivery.
//!
//! Covers the single-retry policy, credential stand-down, and the headers
//! that distinguish analytics from diagnostic payloads.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use tally_core::TestClock;
use tally_events::{
    DeliveryStatus, EventSender, EventsConfig, Payload, PayloadKind, ReqwestTransport,
};
use tally_testing::{init_tracing, MockCollector, ANALYTICS_PATH, DIAGNOSTICS_PATH};

const PAYLOAD_ID: &str = "x-launchdarkly-payload-id";
const EVENT_SCHEMA: &str = "x-launchdarkly-event-schema";

fn sender_for(base_uri: String, clock: &TestClock) -> Result<EventSender> {
    let config = EventsConfig { events_base_uri: base_uri, ..EventsConfig::new("sdk-key") };
    let transport = Arc::new(ReqwestTransport::new(&config)?);
    Ok(EventSender::new(&config, transport, Arc::new(clock.clone())))
}

fn sender(collector: &MockCollector, clock: &TestClock) -> Result<EventSender> {
    sender_for(collector.uri(), clock)
}

fn payload(kind: PayloadKind, body: &'static str) -> Payload {
    Payload { kind, body: Bytes::from_static(body.as_bytes()), sequence_number: 1, event_count: 1 }
}

#[tokio::test]
async fn rate_limited_then_accepted_retries_with_same_id_and_body() -> Result<()> {
    init_tracing();
    let collector = MockCollector::start().await;
    collector.sequence(ANALYTICS_PATH).then(429).then(202).mount().await;
    let clock = TestClock::at_unix_millis(0);

    let result = sender(&collector, &clock)?
        .send(&payload(PayloadKind::Analytics, r#"[{"kind":"index"}]"#))
        .await;

    assert_eq!(result.status, DeliveryStatus::Succeeded);
    let requests = collector.requests_to(ANALYTICS_PATH).await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header(PAYLOAD_ID), requests[1].header(PAYLOAD_ID));
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(clock.elapsed(), Duration::from_secs(1));

    Ok(())
}

#[tokio::test]
async fn two_recoverable_failures_give_up() -> Result<()> {
    init_tracing();
    let collector = MockCollector::start().await;
    collector.sequence(ANALYTICS_PATH).then(503).then(500).then(202).mount().await;
    let clock = TestClock::at_unix_millis(0);

    let result = sender(&collector, &clock)?.send(&payload(PayloadKind::Analytics, "[]")).await;

    assert_eq!(result.status, DeliveryStatus::Failed);
    collector.assert_request_count(2).await;

    Ok(())
}

#[tokio::test]
async fn recoverable_client_errors_are_retried() -> Result<()> {
    init_tracing();
    for status in [400, 408] {
        let collector = MockCollector::start().await;
        collector.sequence(ANALYTICS_PATH).then(status).then(202).mount().await;
        let clock = TestClock::at_unix_millis(0);

        let result =
            sender(&collector, &clock)?.send(&payload(PayloadKind::Analytics, "[]")).await;

        assert!(result.is_success(), "{status}");
        collector.assert_request_count(2).await;
    }

    Ok(())
}

#[tokio::test]
async fn credential_rejection_is_not_retried() -> Result<()> {
    init_tracing();
    for status in [401, 403] {
        let collector = MockCollector::start().await;
        collector.respond(ANALYTICS_PATH, status).await;
        let clock = TestClock::at_unix_millis(0);

        let result =
            sender(&collector, &clock)?.send(&payload(PayloadKind::Analytics, "[]")).await;

        assert_eq!(result.status, DeliveryStatus::FailedAndMustShutDown, "{status}");
        collector.assert_request_count(1).await;
        assert_eq!(clock.sleep_count(), 0);
    }

    Ok(())
}

#[tokio::test]
async fn redirect_is_unrecoverable() -> Result<()> {
    init_tracing();
    let collector = MockCollector::start().await;
    collector.respond(ANALYTICS_PATH, 302).await;
    let clock = TestClock::at_unix_millis(0);

    let result = sender(&collector, &clock)?.send(&payload(PayloadKind::Analytics, "[]")).await;

    assert_eq!(result.status, DeliveryStatus::Failed);
    collector.assert_request_count(1).await;

    Ok(())
}

#[tokio::test]
async fn unreachable_collector_retried_once_then_fails() -> Result<()> {
    init_tracing();
    let clock = TestClock::at_unix_millis(0);
    let sender = sender_for("http://127.0.0.1:1".to_string(), &clock)?;

    let result = sender.send(&payload(PayloadKind::Analytics, "[]")).await;

    assert_eq!(result.status, DeliveryStatus::Failed);
    assert_eq!(clock.sleep_count(), 1);

    Ok(())
}

#[tokio::test]
async fn diagnostic_payloads_omit_analytics_headers() -> Result<()> {
    init_tracing();
    let collector = MockCollector::start().await;
    collector.respond(ANALYTICS_PATH, 202).await;
    collector.respond(DIAGNOSTICS_PATH, 202).await;
    let clock = TestClock::at_unix_millis(0);
    let sender = sender(&collector, &clock)?;

    sender.send(&payload(PayloadKind::Diagnostic, r#"{"kind":"diagnostic"}"#)).await;
    sender.send(&payload(PayloadKind::Analytics, "[]")).await;

    let diagnostic = &collector.requests_to(DIAGNOSTICS_PATH).await[0];
    assert_eq!(diagnostic.header(PAYLOAD_ID), None);
    assert_eq!(diagnostic.header(EVENT_SCHEMA), None);
    assert_eq!(diagnostic.header("authorization"), Some("sdk-key"));
    assert_eq!(diagnostic.json()?["kind"], "diagnostic");

    let analytics = &collector.requests_to(ANALYTICS_PATH).await[0];
    assert!(analytics.header(PAYLOAD_ID).is_some());
    assert_eq!(analytics.header(EVENT_SCHEMA), Some("3"));

    Ok(())
}

#[tokio::test]
async fn distinct_payloads_get_distinct_ids() -> Result<()> {
    init_tracing();
    let collector = MockCollector::start().await;
    collector.respond(ANALYTICS_PATH, 202).await;
    let clock = TestClock::at_unix_millis(0);
    let sender = sender(&collector, &clock)?;

    sender.send(&payload(PayloadKind::Analytics, "[1]")).await;
    sender.send(&payload(PayloadKind::Analytics, "[2]")).await;

    let requests = collector.requests_to(ANALYTICS_PATH).await;
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].header(PAYLOAD_ID), requests[1].header(PAYLOAD_ID));

    Ok(())
}

#[tokio::test]
async fn server_date_reported_on_success() -> Result<()> {
    init_tracing();
    let collector = MockCollector::start().await;
    collector.respond_with_date(ANALYTICS_PATH, 202, "Mon, 02 Jan 2006 15:04:05 GMT").await;
    let clock = TestClock::at_unix_millis(0);

    let result = sender(&collector, &clock)?.send(&payload(PayloadKind::Analytics, "[]")).await;

    assert_eq!(result.time_from_server, Some(1_136_214_245_000));

    Ok(())
}
