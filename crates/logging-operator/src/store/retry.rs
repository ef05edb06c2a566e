//! Retry-on-conflict with exponential backoff for store writes.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, warn};

use super::StoreError;

/// Per-operation retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for a single delay.
    pub max_delay: Duration,

    /// Backoff multiplier.
    pub backoff_multiplier: f32,

    /// Jitter factor (0.0 to 1.0).
    pub jitter_factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 5.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// A policy that retries immediately, used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Exponential backoff state for one operation.
pub struct ExponentialBackoff {
    config: RetryConfig,
    attempt: u32,
    start_time: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            start_time: Instant::now(),
        }
    }

    /// Only conflicts are retried, and only while attempts remain.
    pub fn should_retry(&self, error: &StoreError) -> bool {
        self.attempt + 1 < self.config.max_attempts && error.is_conflict()
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base_delay = Duration::from_millis(
            (self.config.initial_delay.as_millis() as f32
                * self.config.backoff_multiplier.powi(self.attempt as i32 - 1)) as u64,
        );
        let capped_delay = base_delay.min(self.config.max_delay);

        let jitter = if self.config.jitter_factor > 0.0 {
            let jitter_ms = (capped_delay.as_millis() as f32 * self.config.jitter_factor) as u64;
            Duration::from_millis(fastrand::u64(0..=jitter_ms))
        } else {
            Duration::ZERO
        };

        capped_delay + jitter
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or the
/// policy's attempts are used up.
///
/// Each attempt must be idempotent: it re-reads whatever it writes.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = ExponentialBackoff::new(config.clone());

    loop {
        match operation().await {
            Ok(result) => {
                if backoff.attempt() > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = backoff.attempt() + 1,
                        elapsed = ?backoff.elapsed(),
                        "Operation succeeded after conflict retries"
                    );
                }
                return Ok(result);
            }
            Err(error) if error.is_conflict() && !backoff.should_retry(&error) => {
                return Err(StoreError::RetryExhausted {
                    operation: operation_name.to_string(),
                    attempts: backoff.attempt() + 1,
                    last_error: error.to_string(),
                });
            }
            Err(error) if backoff.should_retry(&error) => {
                let delay = backoff.next_delay();
                warn!(
                    operation = operation_name,
                    attempt = backoff.attempt(),
                    max_attempts = config.max_attempts,
                    "Conflict: {error}. Retrying in {delay:?}"
                );
                sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> StoreError {
        StoreError::Conflict {
            kind: "ConfigMap".into(),
            name: "fluentd".into(),
            message: "the object has been modified".into(),
        }
    }

    #[test]
    fn test_backoff_delays_grow_and_cap() {
        let mut backoff = ExponentialBackoff::new(RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(80));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_on_conflict(&RetryConfig::immediate(5), "update", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> =
            retry_on_conflict(&RetryConfig::immediate(3), "update", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(StoreError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_conflict_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> =
            retry_on_conflict(&RetryConfig::immediate(5), "update", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Invalid("bad".into()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
