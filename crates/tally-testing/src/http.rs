//! Mock event collector for delivery tests.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Analytics endpoint path used by default configurations.
pub const ANALYTICS_PATH: &str = "/bulk";
/// Diagnostic endpoint path used by default configurations.
pub const DIAGNOSTICS_PATH: &str = "/diagnostic";

/// HTTP server standing in for the event collector.
///
/// Unmatched requests get a 404 from wiremock, so tests mount a response
/// for every endpoint they expect to be hit.
pub struct MockCollector {
    server: MockServer,
}

impl MockCollector {
    /// Starts a collector on a random local port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URI to use as the events base URI.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Answers every POST to `endpoint` with `status`.
    pub async fn respond(&self, endpoint: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answers every POST to `endpoint` with `status` after `delay`.
    pub async fn respond_slowly(&self, endpoint: &str, status: u16, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Answers every POST to `endpoint` with `status` and a `Date` header.
    pub async fn respond_with_date(&self, endpoint: &str, status: u16, date: &str) {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status).insert_header("Date", date))
            .mount(&self.server)
            .await;
    }

    /// Starts a sequence of one-shot responses for `endpoint`.
    pub fn sequence<'a>(&'a self, endpoint: &'a str) -> ResponseSequence<'a> {
        ResponseSequence { server: &self.server, endpoint, statuses: Vec::new() }
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                path: request.url.path().to_string(),
                headers: request.headers.clone(),
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Requests received on `endpoint`.
    pub async fn requests_to(&self, endpoint: &str) -> Vec<RecordedRequest> {
        self.requests().await.into_iter().filter(|request| request.path == endpoint).collect()
    }

    /// Asserts the total number of requests received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// Builder mounting one response per status, consumed in order.
pub struct ResponseSequence<'a> {
    server: &'a MockServer,
    endpoint: &'a str,
    statuses: Vec<u16>,
}

impl ResponseSequence<'_> {
    /// Appends a response.
    #[must_use]
    pub fn then(mut self, status: u16) -> Self {
        self.statuses.push(status);
        self
    }

    /// Mounts the sequence. Each response is served once; mocks are matched
    /// in mount order.
    pub async fn mount(self) {
        for status in self.statuses {
            Mock::given(method("POST"))
                .and(path(self.endpoint))
                .respond_with(ResponseTemplate::new(status))
                .up_to_n_times(1)
                .mount(self.server)
                .await;
        }
    }
}

/// A request captured by the collector.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Body parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).context("request body is not valid JSON")
    }

    /// Events in an analytics body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a JSON array.
    pub fn events(&self) -> Result<Vec<Value>> {
        match self.json()? {
            Value::Array(events) => Ok(events),
            other => anyhow::bail!("expected a JSON array, got {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn post(uri: &str, body: &'static str) -> u16 {
        reqwest::Client::new()
            .post(uri)
            .header("X-Test", "yes")
            .body(body)
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    }

    #[tokio::test]
    async fn sequence_serves_responses_in_order() {
        let collector = MockCollector::start().await;
        collector.sequence(ANALYTICS_PATH).then(429).then(202).mount().await;

        let uri = format!("{}{ANALYTICS_PATH}", collector.uri());
        assert_eq!(post(&uri, "[]").await, 429);
        assert_eq!(post(&uri, "[]").await, 202);
        assert_eq!(post(&uri, "[]").await, 404);
    }

    #[tokio::test]
    async fn records_requests_with_headers_and_body() {
        let collector = MockCollector::start().await;
        collector.respond(DIAGNOSTICS_PATH, 202).await;

        post(&format!("{}{DIAGNOSTICS_PATH}", collector.uri()), "{\"kind\":\"x\"}").await;

        let requests = collector.requests_to(DIAGNOSTICS_PATH).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("x-test"), Some("yes"));
        assert_eq!(requests[0].json().unwrap()["kind"], "x");
        assert!(requests[0].events().is_err());
        collector.assert_request_count(1).await;
    }
}
