// packages/runner/src/runtime/poll.rs
//! Readiness waits
//!
//! All coordination with containers and driver processes is observational.
//! A wait re-runs its check on a fixed interval until the check yields a
//! value, the optional deadline passes, or the experiment is cancelled.

use crate::utils::errors::{Result, RunnerError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Retry interval, deadline and cancellation for one wait
#[derive(Debug, Clone)]
pub struct Waiter {
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl Waiter {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            timeout: None,
            cancel,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunnerError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Run `check` every `waiter.interval` until it returns `Some`
pub async fn wait_until<T, F, Fut>(what: &str, waiter: &Waiter, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let mut ticker = interval(waiter.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = waiter.cancel.cancelled() => return Err(RunnerError::Cancelled),
            _ = ticker.tick() => {}
        }

        if let Some(value) = check().await? {
            trace!("{} ready after {:?}", what, started.elapsed());
            return Ok(value);
        }

        if let Some(limit) = waiter.timeout {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                return Err(RunnerError::Timeout {
                    what: what.to_string(),
                    elapsed,
                });
            }
        }
    }
}
