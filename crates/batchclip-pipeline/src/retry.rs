//! Retry utilities.
//!
//! Segment execution retries immediately by default: transcode failures
//! are usually deterministic malformed-input failures, so backing off
//! buys nothing. The delay stays configurable for callers that want one.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry attempts after the initial attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::ZERO,
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the fixed delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed after all retries exhausted.
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    /// Convert to a plain `Result`, carrying the attempt count on failure.
    pub fn into_result(self) -> Result<T, (E, u32)> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::Failed { error, attempts } => Err((error, attempts)),
        }
    }
}

/// Execute an async operation, retrying on failure.
///
/// The closure receives the attempt number (1-based) so callers can vary
/// per-attempt state such as output paths.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if attempt <= config.max_retries => {
                debug!(
                    "{} attempt {} failed, retrying: {}",
                    config.operation_name, attempt, e
                );
                attempt += 1;
                if !config.delay.is_zero() {
                    tokio::time::sleep(config.delay).await;
                }
            }
            Err(error) => return RetryResult::Failed { error, attempts: attempt },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_immediate_success() {
        let config = RetryConfig::new("test");
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(result.into_result().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let config = RetryConfig::new("test").with_max_retries(2);
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let config = RetryConfig::new("test").with_max_retries(2);

        let result: RetryResult<(), _> =
            retry_async(&config, |_| async { Err::<(), _>("always") }).await;

        let (error, attempts) = result.into_result().unwrap_err();
        assert_eq!(error, "always");
        // Initial attempt plus two retries
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_passed() {
        let config = RetryConfig::new("test").with_max_retries(3);
        let seen = std::sync::Mutex::new(Vec::new());

        let _ = retry_async(&config, |attempt| {
            seen.lock().unwrap().push(attempt);
            async { Err::<(), _>("nope") }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }
}
