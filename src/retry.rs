//! Bounded retry with jittered exponential backoff
//!
//! Only errors reporting [`RagError::is_retryable`] are retried. The final
//! error is returned unchanged so its kind reaches the caller.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{RagError, Result};

/// Attempts including the first one
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

const BASE_DELAY_MS: u64 = 250;

const MAX_DELAY_MS: u64 = 4000;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_ATTEMPTS, BASE_DELAY_MS)
    }

    pub fn with_config(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: MAX_DELAY_MS,
            enable_jitter: true,
        }
    }

    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::with_config(1, 0)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// Cancellation during a backoff sleep ends the loop with `Cancelled`.
    pub async fn execute<F, Fut, T>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient failure"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RagError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Delay before attempt `attempt + 1`
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let delay_ms = exponential.min(self.max_delay_ms);

        // ±25% jitter
        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as f64;
            let offset = (rand::random::<f64>() * 2.0 - 1.0) * jitter;
            ((delay_ms as f64) + offset).max(0.0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
