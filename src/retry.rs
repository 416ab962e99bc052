//! Bounded retries with doubling backoff for fallible async operations.

use crate::constants::{RETRY_BASE_DELAY_MS, RETRY_MAX_ATTEMPTS};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait inserted after the `failed_attempts`-th failure (0-based): 1x, 2x, 4x ...
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(failed_attempts))
    }
}

/// Runs `op` until it succeeds, returns a non-retryable error, or the policy
/// runs out of attempts. The attempt number (0-based) is passed to `op`.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt + 1 >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_after(attempt);
        tracing::debug!(attempt, ?delay, error = %err, "attempt failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
