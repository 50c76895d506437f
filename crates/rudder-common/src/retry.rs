//! Bounded retry with exponential backoff and jitter.
//!
//! Used for startup and discovery calls only. Lifecycle operations against a
//! cluster are never retried here; callers above the release module own that.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff settings for a retried call
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// Returns the last error once `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(config, operation_name, operation, |_| true).await
}

/// Like [`retry_with_backoff`], but stops early on errors `should_retry` rejects.
pub async fn retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= max_attempts || !should_retry(&e) {
            error!(
                operation = %operation_name,
                attempt,
                error = %e,
                "operation failed, giving up"
            );
            return Err(e);
        }

        // 0.5x to 1.5x jitter
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let sleep_for = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = sleep_for.as_millis(),
            "operation failed, retrying"
        );
        tokio::time::sleep(sleep_for).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<&str, &str> = retry_with_backoff(&fast(5), "load-credentials", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("connection refused")
                } else {
                    Ok("loaded")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("loaded"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), &str> = retry_with_backoff(&fast(3), "discovery", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("still down")
            }
        })
        .await;

        assert_eq!(result, Err("still down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_budget_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let _: Result<(), &str> = retry_with_backoff(&fast(0), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_errors_stop_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), crate::Error> = retry_if(
            &fast(5),
            "load-credentials",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(crate::Error::configuration("unknown credentials type"))
                }
            },
            crate::Error::is_retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
