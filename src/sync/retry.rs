//! Retry policy for table segments.
//!
//! One segment attempt (a whole pull or push of a table) is the unit of
//! retry; individual records are never retried. Errors are classified from
//! their message: network, timeout and server-side hiccups are transient,
//! while authentication, permission, quota and validation failures are
//! permanent and returned on the first occurrence.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::types::DEFAULT_MAX_RETRIES;

/// Base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Ceiling for a single backoff sleep.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

const PERMANENT_MARKERS: &[&str] = &[
    "permission",
    "not authenticated",
    "unauthenticated",
    "unauthorized",
    "forbidden",
    "quota",
    "invalid",
    "validation",
    "401",
    "403",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "network",
    "connection",
    "timeout",
    "timed out",
    "unavailable",
    "reset by peer",
    "broken pipe",
    "dns",
    "database is locked",
    "busy",
    "too many requests",
    "rate limit",
    "429",
    "500",
    "502",
    "503",
    "504",
    "server error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Classifies an error message. Permanent markers win over transient ones,
/// so "permission denied (connection 4)" is never retried.
pub fn classify(message: &str) -> ErrorClass {
    let message = message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorClass::Permanent;
    }
    if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Permanent
}

pub fn is_retryable(message: &str) -> bool {
    classify(message) == ErrorClass::Transient
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Same delays, different retry budget.
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    /// Exponential delay before retry number `attempt` (0-based), capped at
    /// `max_delay`, before jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay with equal jitter: between half and all of the capped delay.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        let half = capped / 2;
        let spread = (capped - half).as_millis() as u64;
        if spread == 0 {
            return capped;
        }
        let jitter = rand::rng().random_range(0..=spread);
        half + Duration::from_millis(jitter)
    }

    /// Runs `f` until it succeeds, fails permanently, or the retry budget is
    /// spent. The last error is returned as-is.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let message = err.to_string();
                    if attempt >= self.max_retries || !is_retryable(&message) {
                        if attempt > 0 {
                            tracing::warn!(operation, attempt, error = %message, "Giving up after retries");
                        }
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
