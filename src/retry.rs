//! Generic retry-with-backoff helper shared by every remote backend.
//!
//! Grounded on the same shape as a circuit-breaker-free `RetryPolicy`: a
//! maximum attempt count, a backoff strategy, and an optional "on exception"
//! hook invoked before each retry (used by FTP/SFTP to reconnect).

use std::future::Future;
use std::time::Duration;

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    ExponentialWithJitter { factor: f64 },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: BackoffStrategy,
    pub growth: f64,
}

impl Default for RetryPolicy {
    /// Matches the path-level utility default: 3 attempts, no backoff growth.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_secs(0),
            backoff: BackoffStrategy::Fixed,
            growth: 1.0,
        }
    }
}

impl RetryPolicy {
    /// FTP's connection-retry policy: up to 10 attempts, no delay (the
    /// original relies on reconnecting, not backing off).
    pub fn ftp() -> Self {
        Self {
            max_attempts: 10,
            ..Self::default()
        }
    }

    /// S3's policy: effectively-unbounded retries on transient errors,
    /// exponential backoff from 0.5s growing by 1.5x, capped at 10s.
    pub fn s3() -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff: BackoffStrategy::Exponential,
            growth: 1.5,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay * attempt.max(1),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter { .. } => {
                Duration::from_secs_f64(
                    self.initial_delay.as_secs_f64() * self.growth.powi(attempt as i32),
                )
            }
        };
        base.min(self.max_delay)
    }
}

/// Run `op`, retrying on errors for which `is_retriable` returns true. `on_retry`
/// is invoked (e.g. to reconnect) before each retry. After `policy.max_attempts`
/// failed attempts, returns `StorageError::ExceededRetries` wrapping the last
/// cause; that wrapper is never itself retried.
pub async fn retry_with<F, Fut, R, OnRetry, OnRetryFut>(
    policy: &RetryPolicy,
    is_retriable: impl Fn(&StorageError) -> bool,
    mut on_retry: OnRetry,
    mut op: F,
) -> Result<R, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, StorageError>>,
    OnRetry: FnMut(&StorageError) -> OnRetryFut,
    OnRetryFut: Future<Output = ()>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(StorageError::ExceededRetries { .. }) => unreachable!(
                "ExceededRetries must never be produced by the wrapped operation itself"
            ),
            Err(err) if is_retriable(&err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(StorageError::ExceededRetries {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                tracing::warn!(attempt, error = %err, "retrying after transient failure");
                on_retry(&err).await;
                if policy.initial_delay > Duration::ZERO || policy.max_delay > Duration::ZERO {
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::default();
        let result: Result<u32, StorageError> =
            retry_with(&policy, |_| true, |_| async {}, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, StorageError> = retry_with(
            &policy,
            |_| true,
            |_| async {},
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err(StorageError::ConnectionFailed {
                            backend: "ftp".into(),
                            message: "down".into(),
                        })
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn exhausts_retries_and_wraps_cause() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let result: Result<u32, StorageError> = retry_with(
            &policy,
            |_| true,
            |_| async {},
            || async {
                Err(StorageError::ConnectionFailed {
                    backend: "ftp".into(),
                    message: "down".into(),
                })
            },
        )
        .await;
        match result {
            Err(StorageError::ExceededRetries { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected ExceededRetries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retriable_error_propagates_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, StorageError> = retry_with(
            &policy,
            |e| e.is_retriable(),
            |_| async {},
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::not_found("/a", "disk")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
