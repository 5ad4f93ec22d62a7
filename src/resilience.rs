//! Retry and timeout behavior for cloud API calls.
//!
//! One uniform policy applies everywhere: 3 attempts, exponential backoff
//! with base 2 s and up to 25% jitter, and a 60 s upper bound per call.
//! Only errors classified transient are retried; exhausting the budget
//! promotes the last error to a cluster error.

use crate::constants::ELB_CLOUD_API_TIMEOUT_SECS;
use crate::error::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Calculates the delay for a given retry attempt with exponential backoff
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base_delay = config.initial_delay_ms as f64;
    let attempt_i32 = attempt.min(30) as i32; // Cap attempt to prevent overflow
    let delay_ms =
        (base_delay * config.backoff_multiplier.powi(attempt_i32)).min(config.max_delay_ms as f64);

    let final_delay_ms = if config.jitter {
        // Add up to 25% jitter to prevent thundering herd
        let jitter_factor = fastrand::f64().mul_add(0.25, 1.0);
        delay_ms * jitter_factor
    } else {
        delay_ms
    } as u64;

    Duration::from_millis(final_delay_ms)
}

/// Executes an operation with retry logic based on the configuration.
///
/// Non-transient errors abort immediately; a transient error on the last
/// attempt is promoted to a cluster error.
///
/// # Errors
/// Returns the operation's error after the final attempt.
pub async fn execute_with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) if error.is_transient() && attempt + 1 < config.max_attempts => {
                let delay = calculate_retry_delay(config, attempt);
                warn!(
                    "{operation_name} failed (attempt {}/{}), retrying in {:?}: {error}",
                    attempt + 1,
                    config.max_attempts,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error.promote(config.max_attempts)),
        }
    }
}

/// Bounds a cloud API call to the configured timeout; exceeding it raises
/// a transient error so the retry loop can take over.
///
/// # Errors
/// Returns the future's error, or a transient timeout error.
pub async fn with_timeout<T, Fut>(operation_name: &str, future: Fut) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(Duration::from_secs(ELB_CLOUD_API_TIMEOUT_SECS), future).await {
        Ok(result) => result,
        Err(_) => Err(Error::transient(format!(
            "{operation_name} did not complete within {ELB_CLOUD_API_TIMEOUT_SECS} s"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_calculate_retry_delay() {
        let config = no_jitter();
        assert_eq!(calculate_retry_delay(&config, 0).as_millis(), 10);
        assert_eq!(calculate_retry_delay(&config, 1).as_millis(), 20);
        assert_eq!(calculate_retry_delay(&config, 2).as_millis(), 40);
        // Max delay cap
        assert_eq!(calculate_retry_delay(&config, 10).as_millis(), 100);
    }

    #[test]
    fn test_calculate_retry_delay_with_jitter_stays_in_range() {
        let config = RetryConfig {
            jitter: true,
            ..no_jitter()
        };
        let delay = calculate_retry_delay(&config, 0);
        assert!(delay.as_millis() >= 10 && delay.as_millis() <= 13);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&no_jitter(), "test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::transient("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_promotes_exhausted_transient() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = execute_with_retry(&no_jitter(), "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::transient("still down")) }
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cluster);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_aborts_on_non_transient() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = execute_with_retry(&no_jitter(), "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::permission("denied")) }
        })
        .await;
        assert_eq!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::Permission
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_timeout_passes_fast_calls() {
        let result = with_timeout("quick", async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
