//! Bounded exponential backoff shared by the network operations.

use crate::error::AcquireError;
use crate::types::RetryPolicy;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tracing::{error, warn};

/// Outcome of a single failed attempt.
pub(crate) enum Failure {
    /// Worth another attempt (network hiccup, 5xx, truncated body).
    Transient(AcquireError),
    /// Retrying cannot help (4xx, wrong content type).
    Permanent(AcquireError),
}

/// Delays between attempts: `base`, `2 * base`, `4 * base`, ... capped at
/// `max_delay`, jittered, and limited to `max_attempts - 1` retries.
pub(crate) fn backoff(policy: &RetryPolicy) -> impl Iterator<Item = Duration> {
    base_delays(policy)
        .map(jitter)
        .take(policy.max_attempts.saturating_sub(1))
}

/// The unjittered, unbounded delay sequence. Bases below 2ms start at 2ms.
fn base_delays(policy: &RetryPolicy) -> ExponentialBackoff {
    // from_millis(2).factor(f) yields 2f, 4f, 8f, ...
    let factor = (policy.base_delay.as_millis() / 2).max(1) as u64;
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(policy.max_delay)
}

/// Statuses that are worth retrying.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Runs `op` until it succeeds, fails permanently, or the policy is exhausted.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, AcquireError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let attempts = AtomicUsize::new(0);
    let max_attempts = policy.max_attempts.max(1);

    let result = Retry::spawn(backoff(policy), || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(Failure::Transient(e)) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        what, attempt, max_attempts, e
                    );
                    RetryError::to_transient(e)
                }
                Err(Failure::Permanent(e)) => {
                    warn!("{} failed permanently: {}", what, e);
                    RetryError::to_permanent(e)
                }
            }
        }
    })
    .await;

    if let Err(ref e) = result {
        error!(
            "Giving up on {} after {} attempt(s): {}",
            what,
            attempts.load(Ordering::Relaxed),
            e
        );
    }
    result
}
