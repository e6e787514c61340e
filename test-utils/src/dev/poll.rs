// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for waiting on a condition that becomes true asynchronously
//!
//! Work handed to a background task (e.g., the pre-install job of a cluster
//! install) is only observable through later reads of the records it touches.
//! Tests use [`wait_for_condition`] to poll those records until the expected
//! state shows up.

use std::future::Future;
use std::time::Duration;
use std::time::Instant;
use thiserror::Error;

/// Result of one attempt to check a condition (see [`wait_for_condition()`])
#[derive(Debug, Error)]
pub enum CondCheckError<E> {
    /// the condition we're waiting for is not true
    #[error("poll condition not yet ready")]
    NotYet,
    #[error("non-retryable error while polling on condition")]
    Failed(#[from] E),
}

/// Result of [`wait_for_condition()`]
#[derive(Debug, Error)]
pub enum Error<E> {
    /// operation timed out before succeeding or failing permanently
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("non-retryable error while polling on condition")]
    PermanentError(E),
}

/// Poll the given closure until it succeeds, returns a permanent error, or
/// a given time has expired
///
/// The closure is invoked immediately and then every `poll_interval` until
/// `poll_max` has elapsed.
pub async fn wait_for_condition<O, E, Func, Fut>(
    mut cond: Func,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<O, Error<E>>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<O, CondCheckError<E>>>,
{
    let poll_start = Instant::now();
    loop {
        let duration = Instant::now().duration_since(poll_start);
        if duration > *poll_max {
            return Err(Error::TimedOut(duration));
        }

        let check = cond().await;
        if let Ok(output) = check {
            return Ok(output);
        }

        if let Err(CondCheckError::Failed(e)) = check {
            return Err(Error::PermanentError(e));
        }

        tokio::time::sleep(*poll_interval).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let attempts = AtomicU32::new(0);
        let value = wait_for_condition::<_, (), _, _>(
            || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CondCheckError::NotYet)
                } else {
                    Ok(42)
                }
            },
            &Duration::from_millis(1),
            &Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_polling() {
        let result = wait_for_condition::<(), _, _, _>(
            || async { Err(CondCheckError::Failed("boom")) },
            &Duration::from_millis(1),
            &Duration::from_secs(10),
        )
        .await;
        assert!(matches!(result, Err(Error::PermanentError("boom"))));
    }

    #[tokio::test]
    async fn test_times_out() {
        let result = wait_for_condition::<(), (), _, _>(
            || async { Err(CondCheckError::NotYet) },
            &Duration::from_millis(1),
            &Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(Error::TimedOut(_))));
    }
}
