//! Retry with exponential backoff.
//!
//! Thin policy layer over `backon`: the policy owns the numbers, `backon`
//! owns the loop and the sleeping.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::providers::ProviderError;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    #[serde(with = "crate::config::duration_serde")]
    pub initial_delay: Duration,

    #[serde(with = "crate::config::duration_serde")]
    pub max_delay: Duration,

    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = (self.config.backoff_multiplier as f64).powi(attempt as i32 - 1);
        let delay = self.config.initial_delay.as_secs_f64() * factor;
        let capped = delay.min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.config.initial_delay)
            .with_max_delay(self.config.max_delay)
            .with_factor(self.config.backoff_multiplier)
            .with_max_times(self.config.max_retries as usize)
    }

    /// Retry every error.
    pub async fn execute<T, E, F, Fut>(&self, action: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(action, |_| true, |_, _, _| {}).await
    }

    /// Retry errors accepted by `should_retry`, reporting each retry as
    /// `(attempt, error, delay)` before sleeping.
    pub async fn execute_with<T, E, F, Fut, R, N>(
        &self,
        action: F,
        mut should_retry: R,
        mut on_retry: N,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        N: FnMut(u32, &E, Duration),
    {
        let mut attempt = 0u32;
        action
            .retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(|e| should_retry(e))
            .notify(|e, delay| {
                attempt += 1;
                on_retry(attempt, e, delay);
            })
            .await
    }

    /// Retry a provider call until it succeeds, fails permanently, runs out
    /// of attempts or `cancel` fires.
    ///
    /// Cancellation is checked before every attempt and ends any backoff
    /// sleep early.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        provider: &str,
        mut action: F,
        cancel: &CancellationToken,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let sleeper_token = cancel.clone();
        let attempt_fn = || {
            let fut = (!cancel.is_cancelled()).then(&mut action);
            async move {
                match fut {
                    Some(fut) => fut.await,
                    None => Err(ProviderError::Cancelled),
                }
            }
        };

        let mut attempt = 0u32;
        attempt_fn
            .retry(self.backoff())
            .sleep(move |delay| {
                let token = sleeper_token.clone();
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {}
                    }
                }
            })
            .when(|e: &ProviderError| e.is_retryable())
            .notify(|e: &ProviderError, delay| {
                attempt += 1;
                debug!(provider, attempt, ?delay, error = %e, "Retrying provider call");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        })
    }

    #[test]
    fn test_delay_schedule() {
        let p = policy(5);
        assert_eq!(p.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        // capped
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(p.delay_for_attempt(10), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = policy(3)
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy(2)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down")
            })
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_stops_retrying() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy(5)
            .execute_with(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal")
                },
                |e| *e != "fatal",
                |_, _, _| {},
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_sees_growing_delays() {
        let seen = Mutex::new(Vec::new());
        let _: Result<(), &str> = policy(3)
            .execute_with(
                || async { Err("down") },
                |_| true,
                |attempt, _, delay| seen.lock().unwrap().push((attempt, delay)),
            )
            .await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.iter().map(|(a, _)| *a).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(seen[0].1 < seen[1].1);
        assert!(seen[2].1 <= Duration::from_millis(351));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_provider_error_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> = policy(3)
            .execute_cancellable(
                "p1",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::AuthError)
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(ProviderError::AuthError)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retry_loop() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> = policy(5)
            .execute_cancellable(
                "p1",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        cancel.cancel();
                    }
                    async { Err(ProviderError::Timeout(Duration::from_secs(1))) }
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
