// src/retry.rs

//! Exponential-backoff retry for transient transport failures.
//!
//! Only the bucket iterator retries internally; stream readers and writers
//! surface transport errors to the caller and leave retry policy to the
//! injected clients.

use std::future::Future;
use std::time::Duration;

/// Backoff schedule for retried operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// The bucket-download schedule: base 1 s, factor 2, cap 32 s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Outcome of one attempt of a retryable operation.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Succeeded.
    Ok(T),
    /// Failed, worth retrying.
    Transient(E),
    /// Failed, retrying will not help.
    Fatal(E),
}

/// Runs `operation` until it succeeds, fails fatally, or the policy is
/// exhausted. Sleeps the scheduled delay between attempts.
pub async fn run_with_retries<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Attempt::Ok(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Transient(err) => {
                if !policy.should_retry(attempt) {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(32));
        // Capped thereafter.
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(32));
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy::with_retries(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 1.0,
        };
        let calls = AtomicU32::new(0);
        let result = run_with_retries(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Attempt::Transient("again")
                } else {
                    Attempt::Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let policy = RetryPolicy::with_retries(5);
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), _> = run_with_retries(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Fatal("nope") }
        })
        .await;
        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
        };
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), _> = run_with_retries(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Transient("still failing") }
        })
        .await;
        assert_eq!(result, Err("still failing"));
        // Initial attempt + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
