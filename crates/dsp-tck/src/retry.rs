//! Bounded exponential backoff for transport-level failures.
//!
//! Protocol rejections are never retried: a 4xx from the SUT is a fact about
//! the exchange, not a transient condition.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::duration_ms;
use crate::error::{DriverError, DriverResult};

/// Retry decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after a delay.
    RetryAfter(Duration),
    /// Do not retry.
    DoNotRetry,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: usize,
    /// Base delay for exponential backoff.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Maximum delay between retries.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Maximum jitter to add to delays.
    #[serde(rename = "max_jitter_ms", with = "duration_ms")]
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_jitter: Duration::from_millis(150),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Same policy without jitter, for deterministic tests.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Check the policy bounds.
    ///
    /// # Errors
    /// Returns a description of the first violated bound.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1".into());
        }
        if self.base_delay > self.max_delay {
            return Err("base_delay_ms must not exceed max_delay_ms".into());
        }
        Ok(())
    }

    /// Decide whether to retry based on the error and the attempt just made
    /// (1-based).
    #[must_use]
    pub fn decide(&self, error: &DriverError, attempt: usize) -> RetryDecision {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return RetryDecision::DoNotRetry;
        }

        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let exp =
            2_u64.saturating_pow(u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(exp).min(max_ms);
        let jitter_ms = if self.max_jitter.is_zero() {
            0
        } else {
            let jitter_max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
            rand::thread_rng().gen_range(0..=jitter_max)
        };
        RetryDecision::RetryAfter(Duration::from_millis(delay_ms.saturating_add(jitter_ms)))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    /// Returns the last error produced by `op`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.decide(&err, attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            operation = what,
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "retrying after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn unavailable() -> DriverError {
        DriverError::ProtocolHttp {
            status: 503,
            error: None,
            body: String::new(),
        }
    }

    fn rejected() -> DriverError {
        DriverError::ProtocolHttp {
            status: 400,
            error: None,
            body: String::new(),
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(
            policy.decide(&unavailable(), 1),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(&unavailable(), 2),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            policy.decide(&unavailable(), 3),
            RetryDecision::RetryAfter(Duration::from_millis(350))
        );
    }

    #[test]
    fn protocol_rejections_are_not_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&rejected(), 1), RetryDecision::DoNotRetry);
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&unavailable(), policy.max_attempts),
            RetryDecision::DoNotRetry
        );
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            max_jitter: Duration::from_millis(5),
        };
        for _ in 0..50 {
            let RetryDecision::RetryAfter(delay) = policy.decide(&unavailable(), 1) else {
                panic!("expected retry");
            };
            assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(15));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_transient_failures_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default().without_jitter();
        let result = policy
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(unavailable())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_surfaces_permanent_failure_immediately() {
        let calls = AtomicUsize::new(0);
        let result: DriverResult<()> = RetryPolicy::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(rejected()) }
            })
            .await;
        assert_eq!(result.unwrap_err().status(), Some(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
