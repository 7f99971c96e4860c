//! Exponential backoff for upstream requests.

use std::future::Future;
use std::time::Duration;

use crate::error::{HarvestError, Result, UpstreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given failed attempt (1-based): `base * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, endpoint: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, UpstreamError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Upstream request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                return Err(HarvestError::UpstreamUnavailable {
                    endpoint: endpoint.to_string(),
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}
