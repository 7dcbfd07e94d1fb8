//! Bounded, fixed-delay retries for calls to flaky remote systems.
//!
//! Every operator of a stage shares the same envelope: one attempt, then up to `max_retries`
//! further attempts, each preceded by a wait of exactly `retry_period`. There is no
//! exponential growth and no jitter. The wait is abandoned as soon as the owning stage is asked
//! to close, in which case the last error is returned as a permanent failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::shared::parse_duration;
use crate::stats::Counter;

/// How often and how patiently a failing operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_period: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_period: Duration) -> Self {
        Self {
            max_retries,
            retry_period,
        }
    }

    /// Builds a policy from its configuration form, e.g. `(3, "500ms")`.
    pub fn from_config(max_retries: u32, retry_period: &str) -> Result<Self, String> {
        let retry_period = parse_duration(retry_period)
            .map_err(|e| format!("failed to parse retry period string: {e}"))?;
        Ok(Self::new(max_retries, retry_period))
    }

    /// Upper bound on the number of times an operation is invoked.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs operations under a [`RetryPolicy`], counting every retry.
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    retries: Counter,
    close: CancellationToken,
}

impl Retrier {
    /// `close` is the owning stage's close signal; once cancelled, pending waits end early and
    /// no further attempts are made.
    pub fn new(policy: RetryPolicy, retries: Counter, close: CancellationToken) -> Self {
        Self {
            policy,
            retries,
            close,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Whether the owning stage has been asked to close.
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Invokes `attempt` until it succeeds or `max_retries + 1` attempts have been made.
    ///
    /// On exhaustion the error of the last attempt is returned unchanged. The wait between
    /// attempts suspends only the calling task.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut attempt: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut result = attempt().await;
        let mut attempts: u32 = 1;

        while let Err(e) = &result {
            if attempts >= self.policy.max_attempts() {
                break;
            }
            error!(operation, attempt = attempts, error = %e, "Operation failed");

            tokio::select! {
                biased;
                _ = self.close.cancelled() => {
                    warn!(operation, "Close requested, abandoning retries");
                    break;
                }
                _ = tokio::time::sleep(self.policy.retry_period) => {}
            }

            self.retries.incr(1);
            result = attempt().await;
            attempts += 1;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::stats::Stats;

    fn retrier(max_retries: u32, period_ms: u64) -> (Retrier, Stats, CancellationToken) {
        let stats = Stats::new();
        let token = CancellationToken::new();
        let retrier = Retrier::new(
            RetryPolicy::new(max_retries, Duration::from_millis(period_ms)),
            stats.counter("retry"),
            token.clone(),
        );
        (retrier, stats, token)
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(3, "500ms").unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_period, Duration::from_millis(500));
        assert_eq!(policy.max_attempts(), 4);

        assert_eq!(
            RetryPolicy::from_config(0, "").unwrap().retry_period,
            Duration::ZERO
        );
        let err = RetryPolicy::from_config(3, "soon").unwrap_err();
        assert!(err.starts_with("failed to parse retry period string"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_operation() {
        let (retrier, stats, _token) = retrier(3, 500);
        let attempts = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), String> = retrier
            .run("scard", || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("attempt {n} failed"))
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // the last error is returned unchanged
        assert_eq!(result, Err("attempt 4 failed".to_string()));
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert_eq!(stats.get("retry"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let (retrier, stats, _token) = retrier(3, 500);
        let attempts = &AtomicU32::new(0);

        let result = retrier
            .run("sadd", || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("unavailable")
                } else {
                    Ok(b"1".to_vec())
                }
            })
            .await;

        assert_eq!(result, Ok(b"1".to_vec()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(stats.get("retry"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_makes_no_retries() {
        let (retrier, stats, _token) = retrier(3, 500);
        let attempts = &AtomicU32::new(0);
        let start = Instant::now();

        let result = retrier
            .run("scard", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(4)
            })
            .await;

        assert_eq!(result, Ok(4));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(stats.get("retry"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries() {
        let (retrier, stats, _token) = retrier(0, 500);
        let attempts = &AtomicU32::new(0);

        let result: Result<(), &str> = retrier
            .run("scard", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("down")
            })
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(stats.get("retry"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_interrupts_retry_wait() {
        let (retrier, stats, token) = retrier(3, 500);
        let attempts = &AtomicU32::new(0);
        let start = Instant::now();

        tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            }
        });

        let result: Result<(), &str> = retrier
            .run("scard", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("down")
            })
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(stats.get("retry"), Some(0));
        assert!(retrier.is_closing());
    }
}
