//! Retry logic.
//!
//! # Responsibilities
//! - Execute an async operation with exponential backoff + jitter
//! - Stop after a bounded number of attempts
//!
//! # Design Decisions
//! - Jittered backoff prevents thundering herd
//! - The last error is returned so callers can log or classify it

use std::fmt::Display;
use std::future::Future;

use crate::config::schema::RevalidationConfig;
use crate::resilience::backoff::calculate_backoff;

/// Attempt budget and delay bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl From<&RevalidationConfig> for RetryPolicy {
    fn from(config: &RevalidationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are spent.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                tracing::info!(operation = %label, attempt, delay = ?delay, error = %e, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
