//! Deadline enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the first of operation and timer wins
//! - A timed-out future is dropped, which cancels it at its next await point
//! - Work the operation spawned elsewhere is signalled through a
//!   `CancellationToken`, never forcibly terminated
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;

/// Race `fut` against `deadline`, cancelling `token` if the timer wins.
pub async fn race<F>(deadline: Duration, token: &CancellationToken, fut: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    let result = tokio::time::timeout(deadline, fut).await;
    if result.is_err() {
        token.cancel();
    }
    result
}

/// Race `fut` against an optional deadline.
pub async fn race_optional<F>(deadline: Option<Duration>, fut: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    match deadline {
        Some(deadline) => race(deadline, &CancellationToken::new(), fut).await,
        None => Ok(fut.await),
    }
}
