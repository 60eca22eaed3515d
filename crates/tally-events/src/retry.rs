//! Retry policy for payload delivery.
//!
//! A failed delivery is retried at most once, after a fixed pause, and only
//! when the failure is recoverable. Credential rejections stop delivery for
//! good.

use std::time::Duration;

use crate::error::EventsError;

/// Total attempts per payload, including the first.
pub const MAX_ATTEMPTS: u32 = 2;

/// How failed attempts are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,
    /// Pause before the next attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: MAX_ATTEMPTS, delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Creates the single-retry policy with a custom pause.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    /// Decides what to do after attempt `attempt_number` (1-based) failed
    /// with `error`.
    pub fn decide(&self, attempt_number: u32, error: &EventsError) -> RetryDecision {
        if error.must_shut_down() {
            return RetryDecision::StandDown {
                reason: format!("credentials rejected: {error}"),
            };
        }

        if !error.is_recoverable() {
            return RetryDecision::GiveUp { reason: format!("unrecoverable error: {error}") };
        }

        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        RetryDecision::Retry { after: self.delay }
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the pause.
    Retry {
        /// Pause before the next attempt
        after: Duration,
    },
    /// Stop; this payload is lost.
    GiveUp {
        /// Reason why the payload will not be retried
        reason: String,
    },
    /// Stop and never send anything again.
    StandDown {
        /// Reason delivery must stop
        reason: String,
    },
}
