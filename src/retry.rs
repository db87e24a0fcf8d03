//! Retry logic with exponential backoff
//!
//! Transient transfer failures are retried with exponential backoff and
//! optional jitter to prevent thundering herd. Non-retryable classes
//! propagate immediately without consuming retry budget.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network resets, timeouts, corrupted payloads) should
/// return `true`. Permanent failures (missing resources, denied access,
/// unwritable destinations) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Transport-level failures and timeouts are worth another attempt
            Error::Network(_) | Error::Timeout(_) => true,
            // A corrupted payload may download cleanly next time
            Error::ChecksumMismatch { .. } => true,
            // Unknown failures get the benefit of the doubt, matching the
            // transfer loop's handling of unclassified exceptions
            Error::Unexpected(_) => true,
            // Retrying a 404 or 403 wastes a round trip for no benefit
            Error::NotFound(_) | Error::PermissionDenied(_) => false,
            // An unwritable destination will not fix itself
            Error::Filesystem { .. } => false,
            // Cancellation is terminal by definition
            Error::Cancelled(_) => false,
            Error::InvalidRequest(_)
            | Error::InvalidManifest(_)
            | Error::TaskNotFound(_)
            | Error::BatchFailed { .. } => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic.
///
/// The operation is attempted once, then retried up to `config.max_attempts`
/// additional times while errors remain retryable. Returns the successful
/// result or the last error after the budget is exhausted. The caller's
/// attempt counter (if any) is driven by the `on_retry` hook, which fires
/// before each backoff sleep.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    R: FnMut(u32),
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );
                on_retry(attempt);

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd.
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay falls between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
