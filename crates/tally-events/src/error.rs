//! Error types for event delivery.
//!
//! None of these ever reach callers of `send_event`; they are produced by the
//! transport, classified by the sender and absorbed into delivery results,
//! counters and log records.

use std::fmt;

use thiserror::Error;

/// Result type alias for event pipeline operations.
pub type Result<T> = std::result::Result<T, EventsError>;

/// Failures that can occur while building, serializing or delivering
/// payloads.
#[derive(Debug, Clone, Error)]
pub enum EventsError {
    /// Connection could not be established or was dropped.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The transport gave up waiting for a response.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// The collector answered with a non-success status.
    #[error("collector responded with HTTP {status_code}")]
    HttpStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// An event could not be converted to JSON.
    #[error("failed to serialize {kind} event: {message}")]
    Serialization {
        /// Wire kind of the offending event
        kind: String,
        /// Serializer message
        message: String,
    },

    /// Invalid configuration values.
    #[error("invalid events configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Unexpected internal error.
    #[error("internal events error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl EventsError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates an HTTP status error.
    pub fn http_status(status_code: u16) -> Self {
        Self::HttpStatus { status_code }
    }

    /// Creates a serialization error for an event of the given kind.
    pub fn serialization(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization { kind: kind.into(), message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code } => Some(*status_code),
            _ => None,
        }
    }

    /// Determines whether a failed delivery attempt is worth one more try.
    ///
    /// Failures without any HTTP status (connection errors, timeouts) are
    /// recoverable, as are 400, 408, 429 and every 5xx. All other statuses,
    /// and anything that is not a delivery failure, are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status_code } => is_http_error_recoverable(*status_code),
            Self::Serialization { .. }
            | Self::ConfigurationError { .. }
            | Self::InternalError { .. } => false,
        }
    }

    /// Returns `true` when the collector rejected the credentials, after which
    /// nothing more may be sent.
    pub fn must_shut_down(&self) -> bool {
        matches!(self, Self::HttpStatus { status_code: 401 | 403 })
    }
}

/// Classifies an HTTP error status as recoverable.
pub fn is_http_error_recoverable(status_code: u16) -> bool {
    matches!(status_code, 400 | 408 | 429) || status_code >= 500
}

/// Category of events error for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity problems and timeouts.
    Network,
    /// HTTP errors worth retrying.
    Recoverable,
    /// Credentials rejected.
    Credential,
    /// HTTP errors not worth retrying.
    Unrecoverable,
    /// Event data that could not be encoded.
    Serialization,
    /// Configuration problems.
    Configuration,
    /// Failures inside the pipeline itself.
    Internal,
}

impl From<&EventsError> for ErrorCategory {
    fn from(error: &EventsError) -> Self {
        match error {
            EventsError::NetworkError { .. } | EventsError::Timeout { .. } => Self::Network,
            EventsError::HttpStatus { .. } if error.must_shut_down() => Self::Credential,
            EventsError::HttpStatus { .. } if error.is_recoverable() => Self::Recoverable,
            EventsError::HttpStatus { .. } => Self::Unrecoverable,
            EventsError::Serialization { .. } => Self::Serialization,
            EventsError::ConfigurationError { .. } => Self::Configuration,
            EventsError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::Credential => write!(f, "credential"),
            Self::Unrecoverable => write!(f, "unrecoverable"),
            Self::Serialization => write!(f, "serialization"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
