//! Bounded retry-until-converged polling.
//!
//! The check runs immediately, then once per interval, until it reports a
//! converged value or the deadline passes. A check that is already running
//! when the deadline passes is allowed to finish; the deadline is only
//! enforced between checks. Query errors are never retried.

use std::future::Future;
use std::time::Duration;

use rollgate_core::Timeout;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Why a poll ended without converging.
#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("timed out after {}ms ({attempts} checks)", .timeout.as_millis())]
    TimedOut { timeout: Duration, attempts: u32 },

    #[error("{0}")]
    Check(E),
}

impl<E> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::TimedOut { .. })
    }
}

/// Interval and deadline for one convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePoller {
    interval: Duration,
    timeout: Timeout,
}

impl ConvergencePoller {
    pub fn new(interval: Duration, timeout: Timeout) -> Self {
        Self { interval, timeout }
    }

    /// Run `check` until it returns `Ok(Some(value))`.
    ///
    /// `Ok(None)` means "not converged yet" and is retried after the
    /// interval. `Err(e)` ends the poll at once with [`PollError::Check`].
    pub async fn poll<T, E, F, Fut>(&self, mut check: F) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let started = Instant::now();
        // A deadline past the end of the clock is no deadline at all.
        let deadline = self
            .timeout
            .as_duration()
            .and_then(|t| started.checked_add(t));
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if let Some(value) = check().await.map_err(PollError::Check)? {
                debug!(attempts, elapsed_ms = started.elapsed().as_millis() as u64, "converged");
                return Ok(value);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PollError::TimedOut {
                            timeout: deadline - started,
                            attempts,
                        });
                    }
                    // A final check lands exactly on the deadline.
                    self.interval.min(deadline - now)
                }
                None => self.interval,
            };
            tokio::time::sleep(wait).await;
        }
    }
}
