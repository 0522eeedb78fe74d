//! Deadline and retry primitives
//!
//! `with_timeout` races a unit of work against a deadline and surfaces
//! expiry as a distinguished marker error, so callers can tell "give up
//! immediately" apart from failures that permit another attempt.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Marker error for an exceeded deadline. Distinct from every other
/// failure: retry loops abort on it without consuming an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {0:?}")]
pub struct TimeoutElapsed(pub Duration);

/// Race `fut` against `duration`.
pub async fn with_timeout<T>(
    fut: impl Future<Output = Result<T>>,
    duration: Duration,
) -> Result<T> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::Error::new(TimeoutElapsed(duration))),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Attempt `work` until it succeeds or the attempt budget is spent.
///
/// Each attempt runs under `with_timeout`; a timeout fails the whole loop
/// immediately. Any other error is retried after `interval` while attempts
/// remain and `should_retry` returns true.
pub async fn retry_with_backoff<T, W, Fut>(
    mut work: W,
    options: RetryOptions,
    should_retry: impl Fn(&anyhow::Error) -> bool,
) -> Result<T>
where
    W: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match with_timeout(work(), options.timeout).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is::<TimeoutElapsed>() => return Err(err),
            Err(err) => {
                if attempt >= options.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                debug!(attempt, error = %err, "retrying after interval");
                tokio::time::sleep(options.interval).await;
                attempt += 1;
            }
        }
    }
}

/// Retry policy that always permits another attempt.
pub fn always_retry(_: &anyhow::Error) -> bool {
    true
}
