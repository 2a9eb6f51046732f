//! Bounded polling against asynchronous controller state
//!
//! Every "wait until the controller says X" in the suites goes through
//! [`poll_until`]. The predicate is evaluated at least once, the helper
//! sleeps between evaluations, predicate errors are returned as-is, and
//! running out of time is a hard [`E2eError::PollTimeout`].

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Evaluate `check` every `interval` until it yields `Some`, or fail once
/// `timeout` has elapsed.
pub async fn poll_until<T, F, Fut>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Option<T>>>,
{
    debug!("Polling for: {} (interval {:?}, timeout {:?})", description, interval, timeout);

    let start = Instant::now();
    let mut attempts = 0usize;

    loop {
        attempts += 1;
        if let Some(value) = check().await? {
            debug!(
                "Condition satisfied: {} after {:?} ({} attempts)",
                description,
                start.elapsed(),
                attempts
            );
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            warn!("Timed out waiting for: {} after {:?}", description, elapsed);
            return Err(E2eError::PollTimeout {
                description: description.to_string(),
                elapsed,
            });
        }

        // never sleep past the deadline, never spin
        let remaining = timeout - elapsed;
        sleep(interval.min(remaining).max(Duration::from_millis(1))).await;
    }
}

/// [`poll_until`] for predicates that only answer yes or no
pub async fn poll_until_true<F, Fut>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> E2eResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<bool>>,
{
    poll_until(description, interval, timeout, || {
        let fut = check();
        async move { Ok(fut.await?.then_some(())) }
    })
    .await
}

/// Sleep while leaving a trace in the log
pub async fn logged_sleep(duration: Duration) {
    info!("Sleeping for {:?}", duration);
    sleep(duration).await;
}
