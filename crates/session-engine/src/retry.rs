//! Bounded retry around a single transport operation.
//!
//! Used for every call that reads or writes identity data. Login,
//! registration, and logout are fire-once by design: resubmitting
//! credentials has side effects, so their failures surface immediately.

use crate::error::AuthResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for transport retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the initial one.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-running a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `op` until it succeeds or `1 + max_retries` attempts are exhausted.
///
/// Each retry is logged with the attempt count and error detail; the final
/// failure is propagated unchanged so its classification survives.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, op: F) -> AuthResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AuthResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                warn!(
                    operation = %op_name,
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transport call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(
                    operation = %op_name,
                    attempts = attempt + 1,
                    error = %err,
                    "Transport call failed, retries exhausted"
                );
                return Err(err);
            }
        }
    }
}
