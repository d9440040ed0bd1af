//! Bounded retry with capped exponential backoff and jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    /// Returns `true` for faults worth retrying (connect errors, timeouts,
    /// 5xx, 429).
    fn is_transient(&self) -> bool;
}

/// Why [`retry`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The cancellation token fired.
    Cancelled,
    /// The last attempt failed with a permanent error, or attempts ran out.
    Exhausted {
        /// Error of the final attempt.
        error: E,
        /// Attempts made.
        attempts: u32,
    },
}

/// Run `op` until it succeeds, fails permanently, runs out of attempts or is
/// cancelled. `op` receives the 1-based attempt number.
///
/// Cancellation aborts both an in-flight attempt and a pending backoff sleep.
///
/// # Errors
///
/// [`RetryError::Cancelled`] when `cancel` fires, otherwise
/// [`RetryError::Exhausted`] with the last error.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op(attempt) => r,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(_) if cancel.is_cancelled() => return Err(RetryError::Cancelled),
            Err(e) => e,
        };

        if !error.is_transient() || attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                error,
                attempts: attempt,
            });
        }

        let delay = with_jitter(policy.backoff(attempt));
        tracing::debug!(
            "{what}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {delay:?}"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Add up to 25% random jitter so parallel workers do not retry in lockstep.
fn with_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 4 {
        return delay;
    }
    let extra = rand::rng().random_range(0..=millis / 4);
    delay + Duration::from_millis(extra)
}
