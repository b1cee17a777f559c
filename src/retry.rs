use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff with jitter, shared by the album fetch and the
/// per-asset downloads so both back off from the same CDN consistently.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts. Used by tests.
    #[cfg(test)]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-indexed):
    /// `min(base * 2^retry, max) + jitter(0..base)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
        } else {
            Duration::ZERO
        };
        capped + jitter
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// `classifier` decides whether an error is worth another attempt. Returns
/// the first `Ok`, the first non-retryable error, or the last error once
/// `max_retries` retries are used up, together with the attempt count.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, Exhausted<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        if classifier(&err) == RetryAction::Abort {
            return Err(Exhausted {
                error: err,
                attempts: attempt,
                retryable: false,
            });
        }
        if attempt >= total_attempts {
            return Err(Exhausted {
                error: err,
                attempts: attempt,
                retryable: true,
            });
        }
        let delay = config.delay_for_retry(attempt - 1);
        tracing::warn!(
            "Retryable error (attempt {}/{}), retrying in {}ms: {}",
            attempt,
            total_attempts,
            delay.as_millis(),
            err
        );
        tokio::time::sleep(delay).await;
    }
}

/// Final error of a retried operation.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
    /// False when the classifier aborted early.
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        };
        let d = config.delay_for_retry(0);
        assert!(d >= Duration::from_secs(2) && d < Duration::from_secs(4));
        let d = config.delay_for_retry(2);
        assert!(d >= Duration::from_secs(8) && d < Duration::from_secs(10));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig {
            max_retries: 40,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        };
        let d = config.delay_for_retry(40);
        assert!(d >= Duration::from_secs(30) && d < Duration::from_secs(35));
    }

    #[test]
    fn test_delay_zero_base() {
        let config = RetryConfig::immediate(3);
        assert_eq!(config.delay_for_retry(0), Duration::ZERO);
    }

    fn counting_op(
        calls: Arc<AtomicU32>,
        succeed_on: u32,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, String>> + Send>> {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(n)
                } else {
                    Err(format!("failure {n}"))
                }
            })
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(
            &RetryConfig::immediate(3),
            |_| RetryAction::Retry,
            counting_op(calls.clone(), 3),
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_abort_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = retry_with_backoff(
            &RetryConfig::immediate(3),
            |_| RetryAction::Abort,
            counting_op(calls.clone(), 10),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error, "failure 1");
        assert_eq!(err.attempts, 1);
        assert!(!err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = retry_with_backoff(
            &RetryConfig::immediate(2),
            |_| RetryAction::Retry,
            counting_op(calls.clone(), 10),
        )
        .await
        .unwrap_err();
        // 1 initial + 2 retries
        assert_eq!(err.attempts, 3);
        assert!(err.retryable);
        assert_eq!(err.error, "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
