//! Sink Retry Policy
//!
//! Linear backoff for sink flushes: three attempts with 1 s and 2 s sleeps
//! between them. Each sink is retried independently; when every attempt
//! fails the batch is abandoned and the pipeline moves on.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::infrastructure::metrics::{ErrorKind, record_error};

/// Retry policy for a sink flush.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay; attempt `n` sleeps `n * base_delay` before attempt `n+1`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Run a sink operation under the retry policy.
///
/// Every failed attempt is logged and counted against `kind`. Sleeps occur
/// only between attempts; the final failure returns immediately.
///
/// # Errors
///
/// Returns the last attempt's error once the policy is exhausted.
pub async fn retry<E, F, Fut>(policy: &RetryPolicy, kind: ErrorKind, mut op: F) -> Result<(), E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                record_error(kind);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    kind = kind.as_str(),
                    error = %e,
                    "sink flush attempt failed"
                );

                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(policy.delay_after(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_sleeping_on_first_attempt() {
        let start = tokio::time::Instant::now();
        let result: Result<(), &str> =
            retry(&RetryPolicy::default(), ErrorKind::StoreInsert, || async {
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_linear_backoff_then_succeeds() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), &str> =
            retry(&RetryPolicy::default(), ErrorKind::StoreInsert, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("down") } else { Ok(()) } }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1 s after the first failure, 2 s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error_without_trailing_sleep() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), &str> =
            retry(&RetryPolicy::default(), ErrorKind::CacheInsert, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still down") }
            })
            .await;

        assert_eq!(result.unwrap_err(), "still down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
