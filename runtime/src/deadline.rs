//! Per-attempt deadlines.
//!
//! A hub that accepts the TCP connection and then never answers must not hold a
//! browser request hostage. Each outbound attempt is raced against a deadline;
//! losing the race is reported as [`DeadlineElapsed`], which callers translate
//! into their own "unreachable" error.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The wrapped operation did not finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {0:?} elapsed")]
pub struct DeadlineElapsed(pub Duration);

/// Run `future` to completion or fail once `limit` has passed.
///
/// The future is dropped (cancelled) when the deadline fires.
///
/// # Errors
///
/// Returns [`DeadlineElapsed`] if `limit` passes first.
pub async fn with_deadline<F>(limit: Duration, future: F) -> Result<F::Output, DeadlineElapsed>
where
    F: Future,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| DeadlineElapsed(limit))
}
