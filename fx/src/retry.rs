//! Bounded retry for retryable downstream errors.

use std::future::Future;
use std::time::Duration;

use fxstream_common::Result;
use tracing::debug;

/// Retry policy with linear backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; grows linearly.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts are exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff * attempt;
                    debug!(op = name, attempt, error = %e, ?delay, "Retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxstream_common::FxStreamError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("find", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FxStreamError::DownstreamUnavailable("db".into()))
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
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(2)
            .run("find", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FxStreamError::DownstreamUnavailable("db".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(5)
            .run("find", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FxStreamError::RateNotFound("EURUSD".into()))
            })
            .await;

        assert!(matches!(result, Err(FxStreamError::RateNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
