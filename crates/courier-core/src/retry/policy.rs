//! `with_retry`: bounded immediate retries around a single async operation.

use std::error::Error;
use std::future::Future;
use std::time::Duration;

use super::{RetryConfig, compute_delay};

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success {
        value: T,
        /// Executions of the operation, including the successful one.
        attempts: u32,
    },
    Failure {
        /// The last error seen.
        error: E,
        attempts: u32,
        /// Time spent sleeping between attempts.
        total_delay: Duration,
    },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. } | RetryResult::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Failure { error, .. } => Err(error),
        }
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or the
/// retry budget is spent.
///
/// At most `1 + config.max_retries` executions. Before retry `n` the task
/// sleeps for `compute_delay(n, config)`; the sleep belongs to this call
/// alone and does not hold anything shared.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let mut attempts = 0u32;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => return RetryResult::Success { value, attempts },
            Err(error) => error,
        };

        if !config.should_retry(&error) {
            tracing::debug!(attempts, error = %error, "error is not retryable");
            return RetryResult::Failure {
                error,
                attempts,
                total_delay,
            };
        }

        if attempts > config.max_retries {
            tracing::debug!(attempts, error = %error, "retry budget exhausted");
            return RetryResult::Failure {
                error,
                attempts,
                total_delay,
            };
        }

        let delay = compute_delay(attempts, config);
        tracing::debug!(attempt = attempts, ?delay, error = %error, "retrying after backoff");
        tokio::time::sleep(delay).await;
        total_delay += delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CourierError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(max_retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::ZERO)
            .with_jitter_factor(0.0)
    }

    #[tokio::test]
    async fn success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, CourierError>(42) }
        })
        .await;

        assert!(matches!(result, RetryResult::Success { value: 42, attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_fails_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::default().with_max_retries(0), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CourierError::executor("offline")) }
        })
        .await;

        match result {
            RetryResult::Failure {
                attempts,
                total_delay,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(total_delay, Duration::ZERO);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_at_once() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::aggressive().transient_only();
        let result = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CourierError::rejected("HTTP 401")) }
        })
        .await;

        assert_eq!(result.attempts(), 1);
        assert!(matches!(
            result,
            RetryResult::Failure { total_delay, .. } if total_delay == Duration::ZERO
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_allows_one_plus_max_retries_executions() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&instant(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CourierError::executor("HTTP 503")) }
        })
        .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&instant(5), || {
            let calls = Arc::clone(&calls);
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(CourierError::executor("timeout")),
                    _ => Ok("delivered"),
                }
            }
        })
        .await;

        assert_eq!(result.attempts(), 3);
        assert_eq!(result.into_result().unwrap(), "delivered");
    }

    #[tokio::test]
    async fn accumulates_sleep_time() {
        let config = RetryConfig::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(5))
            .with_multiplier(2.0)
            .with_jitter_factor(0.0);
        let result = with_retry(&config, || async {
            Err::<(), _>(CourierError::executor("down"))
        })
        .await;

        match result {
            RetryResult::Failure {
                attempts,
                total_delay,
                ..
            } => {
                assert_eq!(attempts, 3);
                // 5ms + 10ms
                let ms = total_delay.as_secs_f64() * 1000.0;
                assert!((ms - 15.0).abs() < 0.01, "total_delay = {total_delay:?}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_do_not_serialize() {
        let config = RetryConfig::default()
            .with_max_retries(1)
            .with_initial_delay(Duration::from_millis(200))
            .with_jitter_factor(0.0);

        let started = tokio::time::Instant::now();
        let runs = (0..8).map(|_| {
            let config = config.clone();
            tokio::spawn(async move {
                with_retry(&config, || async {
                    Err::<(), _>(CourierError::executor("down"))
                })
                .await
                .attempts()
            })
        });
        for run in runs.collect::<Vec<_>>() {
            assert_eq!(run.await.unwrap(), 2);
        }

        // eight sequential sleeps would take 1.6s of virtual time
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    }
}
