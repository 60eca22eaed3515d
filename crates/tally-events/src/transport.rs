//! HTTP transport used by the event sender.
//!
//! The sender builds requests and interprets responses; the transport only
//! moves bytes. [`ReqwestTransport`] is the production implementation.

use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    config::EventsConfig,
    error::{EventsError, Result},
};

/// One POST request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Absolute destination URI.
    pub url: String,
    /// Header names and values.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

/// Status and headers returned by the collector.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Total duration of the request.
    pub duration: Duration,
}

impl TransportResponse {
    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Sends a POST and reports the response, or why none was received.
///
/// Any status code, including errors, is a successful transport call; only
/// connection failures and timeouts are `Err`.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Performs the request.
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Pooled reqwest client that never follows redirects.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ReqwestTransport {
    /// Builds a client with the timeouts and user agent from `config`.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::ConfigurationError` if the HTTP client cannot be
    /// built.
    pub fn new(config: &EventsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                EventsError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, request_timeout: config.request_timeout() })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse> {
        let span = info_span!("events_post", url = %request.url, bytes = request.body.len());

        async move {
            let start_time = Instant::now();

            let mut http_request = self.client.post(&request.url).body(request.body);
            for (name, value) in &request.headers {
                http_request = http_request.header(name, value);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    warn!(duration_ms = duration.as_millis(), error = %e, "request failed");

                    if e.is_timeout() {
                        let timeout_ms =
                            u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX);
                        return Err(EventsError::timeout(timeout_ms));
                    }
                    if e.is_connect() {
                        return Err(EventsError::network(format!("connection failed: {e}")));
                    }
                    return Err(EventsError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let status_code = response.status().as_u16();
            debug!(status = status_code, duration_ms = duration.as_millis(), "received response");

            let headers = extract_headers(response.headers());
            Ok(TransportResponse { status_code, headers, duration })
        }
        .instrument(span)
        .await
    }
}

/// Copies readable headers into a map keyed by lowercase name.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for (key, value) in header_map {
        if let Ok(value_str) = value.to_str() {
            headers.insert(key.as_str().to_ascii_lowercase(), value_str.to_string());
        }
    }

    headers
}
