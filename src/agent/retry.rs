// SYNOID Repurpose - Backoff Wrapper
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use std::future::Future;

use rand::Rng;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::ServiceError;

/// Run `op` until it succeeds, fails with a non-retryable error, or `policy.max_attempts`
/// attempts are spent. Provider `retry_after` hints win over the computed delay when longer.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let mut delay = policy.delay_for(attempt);
                if let ServiceError::RateLimited {
                    retry_after: Some(hint),
                } = &e
                {
                    delay = delay.max(*hint).min(std::time::Duration::from_millis(policy.max_delay_ms));
                }
                // Up to 10% jitter so parallel workers don't retry in lockstep.
                let jitter_ms = delay.as_millis() as u64 / 10;
                if jitter_ms > 0 {
                    delay += std::time::Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
                }
                warn!(
                    "[RETRY] {} failed (attempt {}/{}): {}. Backing off {:?}",
                    label, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("[RETRY] {} gave up after {} attempts: {}", label, attempt, e);
                }
                return Err(e);
            }
        }
    }
}
