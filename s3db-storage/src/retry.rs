//! Exponential backoff with full jitter, shared by every backend's
//! transient-failure retries (`spec.md` §4.1: "defaults: 5 attempts, base
//! 100 ms, cap 5 s").

use std::future::Future;
use std::time::Duration;

/// Retry shape: bounded attempts, exponential backoff, full jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base backoff duration.
    pub base: Duration,
    /// Backoff cap.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base: Duration::from_millis(100), cap: Duration::from_secs(5) }
    }
}

impl RetryPolicy {
    /// Build a policy with custom parameters.
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self { max_attempts, base, cap }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped = exp.min(self.cap.as_millis());
        let jittered = {
            use rand::Rng;
            rand::rng().random_range(0..=capped.max(1))
        };
        Duration::from_millis(u64::try_from(jittered).unwrap_or(u64::MAX))
    }

    /// Run `f` until it succeeds, `should_retry` says no, or attempts are
    /// exhausted. Returns the last error on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, should_retry: impl Fn(&E) -> bool, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.max_attempts || !should_retry(&err) => return Err(err),
                Err(_) => {
                    tokio::time::sleep(self.backoff_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_should_succeed_without_retry_when_first_attempt_ok() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(|_| true, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_retry_until_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(
                |_| true,
                || async {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err("transient") } else { Ok(7) }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_should_exhaust_attempts_and_return_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(
                |_| true,
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                },
            )
            .await;
        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_should_not_retry_when_should_retry_returns_false() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(
                |_| false,
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("permanent")
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
