//! Retry policy
//!
//! Separates error classification from looping mechanics: callers provide a
//! predicate that decides whether a failure is worth retrying and a backoff
//! schedule; the policy drives the attempts. The backoff sleep observes an
//! optional deadline so an expiring request stops before issuing the next
//! attempt, not after.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// A fixed backoff schedule; `delays.len() + 1` total attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Linear schedule: retry `i` (zero-based) waits `(i + 1) * step`.
    pub fn linear(step: Duration, retries: usize) -> Self {
        Self {
            delays: (0..retries).map(|i| step * (i as u32 + 1)).collect(),
        }
    }

    /// No retries; the single attempt's result is final.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// Total attempts this policy will make.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Drive `op` until it succeeds, fails fatally, or the schedule (or the
    /// deadline) is exhausted. `op` receives the zero-based attempt number.
    ///
    /// Transient failures whose backoff would cross `deadline` are returned
    /// immediately; the next attempt is never issued.
    pub async fn run<T, E, Op, Fut, Classify>(
        &self,
        deadline: Option<Instant>,
        is_transient: Classify,
        mut op: Op,
    ) -> Result<T, E>
    where
        Op: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classify: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.delays.len() || !is_transient(&err) {
                        return Err(err);
                    }

                    let delay = self.delays[attempt];
                    if let Some(deadline) = deadline {
                        if Instant::now() + delay >= deadline {
                            debug!(
                                attempt,
                                "abandoning retries: backoff would cross the request deadline"
                            );
                            return Err(err);
                        }
                    }

                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
