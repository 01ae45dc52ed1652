//! Bounded retry with exponential backoff

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Classification of errors that are worth another attempt
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How often, and how patiently, a failing operation is retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(8)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based retry count)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// The last error after every attempt was used up
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempts are used up
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    description: &str,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", description, attempt);
                }
                return Ok(value);
            }
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "{} failed ({}), retrying in {:?} (attempt {}/{})",
                    description,
                    error,
                    delay,
                    attempt + 1,
                    max_attempts
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryExhausted {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use crate::transfer::BlobError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_then_succeeds() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::default(), &clock, "upload", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BlobError::Transient("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let clock = ManualClock::new();
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), &clock, "upload", || async {
            Err(BlobError::Transient("reset".into()))
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), &clock, "upload", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BlobError::PermissionDenied("no".into()))
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
