//! Bounded retry with exponential backoff
//!
//! Only errors that report themselves as transient are retried. Everything
//! else surfaces on the first attempt.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Errors that can tell whether retrying may help
pub trait Retryable {
    /// True for transient network conditions
    fn is_transient(&self) -> bool;
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds)
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay (milliseconds)
    pub max_backoff_ms: u64,
    /// Multiplier applied per attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// With maximum attempts
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after `attempt` (1-based) has failed
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = (self.initial_backoff_ms as f64 * exp) as u64;
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// The closure receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(8), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, ApiError> = retry(&RetryPolicy::default(), "lookup", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ApiError::Transport("reset".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ApiError> =
            retry(&RetryPolicy::default().with_max_attempts(2), "lookup", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::Timeout("read".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ApiError> = retry(&RetryPolicy::default(), "lookup", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Unauthorized("nope".into())) }
        })
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
