//! Retry with exponential backoff.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use std::future::Future;
use tracing::{debug, warn};

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget in `config` is spent.
///
/// `operation` receives the 0-indexed attempt number.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, label: &str, mut operation: F) -> SyncResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let delay = config.delay_for_attempt(attempt);
        if !delay.is_zero() {
            debug!(label, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::time::sleep(delay).await;
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                warn!(label, attempt, error = %err, "retryable failure");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
