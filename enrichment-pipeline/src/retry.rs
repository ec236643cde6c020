use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::warn;

use crate::provider::ProviderError;

/// Backoff policy for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delays(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) doubles per attempt; the factor scales it to the
        // configured base, giving base, 2*base, 4*base, ...
        ExponentialBackoff::from_millis(2)
            .factor(self.base_delay.as_millis().max(2) as u64 / 2)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Runs an operation with exponential backoff on transient errors.
///
/// Terminal errors (4xx other than 429, decode failures) return
/// immediately; a 429 carrying `Retry-After` waits at least that long.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut run: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delays = policy.delays();
    let mut attempt = 1usize;
    loop {
        match run().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                let Some(mut delay) = delays.next() else {
                    return Err(err);
                };
                if let ProviderError::RateLimited {
                    retry_after: Some(after),
                } = &err
                {
                    delay = delay.max(*after);
                }
                warn!(
                    operation,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "transient provider failure; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_up_to_the_cap() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), ProviderError> =
            with_retry(&counting_policy(), "test", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Network("connection reset".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_do_not_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), ProviderError> =
            with_retry(&counting_policy(), "test", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Http { status: 404 })
                }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Http { status: 404 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry(&counting_policy(), "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Http { status: 502 })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_floor_is_respected() {
        let started = tokio::time::Instant::now();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _result: Result<(), ProviderError> =
            with_retry(&counting_policy(), "test", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProviderError::RateLimited {
                            retry_after: Some(Duration::from_secs(30)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
