//! Retry logic.
//!
//! # Design Decisions
//! - Jittered exponential backoff between attempts prevents thundering herd
//! - Every attempt is raced against the same per-attempt deadline
//! - The last error is returned when attempts are exhausted

use std::future::Future;
use std::time::Duration;

use crate::resilience::backoff::calculate_backoff;
use crate::resilience::error::BoxError;
use crate::resilience::timeouts::race_optional;

/// Base delay between retry attempts.
pub const RETRY_BASE_DELAY_MS: u64 = 50;

/// Upper bound on the delay between retry attempts.
pub const RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Why an attempt failed.
#[derive(Debug)]
pub enum AttemptError {
    TimedOut,
    Failed(BoxError),
}

/// Run `attempt` up to `1 + max_retries` times.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    deadline: Option<Duration>,
    mut attempt: F,
) -> Result<T, AttemptError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    let mut n = 0;
    loop {
        let err = match race_optional(deadline, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => AttemptError::Failed(e),
            Err(_) => AttemptError::TimedOut,
        };

        if n >= max_retries {
            return Err(err);
        }
        n += 1;
        tokio::time::sleep(calculate_backoff(n, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS)).await;
    }
}
