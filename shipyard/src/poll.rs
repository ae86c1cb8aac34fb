//! Bounded readiness polling
//!
//! A single helper drives every "retry within a budget" wait in the engine.
//! The API-server wait uses a capped exponential backoff and the load
//! balancer wait a fixed interval; both are just different [`PollPolicy`]
//! values.
//!
//! A wait starts in `Polling` and ends in exactly one of `Ready`, `TimedOut`
//! or `Failed`:
//!
//! ```text
//! Polling --positive read--------> Ready
//! Polling --non-retryable error--> Failed
//! Polling --budget exhausted-----> TimedOut
//! Polling --pending--> sleep --> Polling
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::EngineError;

/// Interval schedule and time budget for a readiness wait
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub growth_factor: f64,
    pub budget: Duration,
}

impl PollPolicy {
    /// Interval doubling from `initial` up to `max`
    pub fn backoff(initial: Duration, max: Duration, budget: Duration) -> Self {
        Self {
            initial_interval: initial,
            max_interval: max,
            growth_factor: 2.0,
            budget,
        }
    }

    /// Same interval between every attempt
    pub fn fixed(interval: Duration, budget: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            growth_factor: 1.0,
            budget,
        }
    }

    /// Sleep before attempt `attempt + 1` (zero-based)
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.growth_factor.powi(attempt);
        let capped = secs.min(self.max_interval.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped)
        } else {
            self.max_interval
        }
    }
}

/// Result of a single check
#[derive(Debug)]
pub enum Check<T> {
    /// Positive read; the wait is over
    Ready(T),
    /// Not there yet, with a note on what was observed
    Pending(String),
    /// Non-retryable read error
    Failed(EngineError),
}

/// Terminal state of a wait
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut {
        elapsed: Duration,
        last_observation: Option<String>,
    },
    Failed(EngineError),
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }
}

/// Check until ready, failed, or the budget is spent.
///
/// The budget is checked after every pending check, so the final check
/// happens at or after the deadline and a timed-out wait has always
/// observed at least `budget` of elapsed time.
pub async fn poll_until<T, P, PF, S, SF>(
    what: &str,
    policy: &PollPolicy,
    mut sleep_fn: S,
    mut check: P,
) -> PollOutcome<T>
where
    P: FnMut() -> PF,
    PF: Future<Output = Check<T>>,
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let observation = match check().await {
            Check::Ready(value) => {
                debug!(
                    "{} ready after {} attempt(s) in {:?}",
                    what,
                    attempt + 1,
                    started.elapsed()
                );
                return PollOutcome::Ready(value);
            }
            Check::Failed(err) => {
                warn!("{} wait aborted: {}", what, err);
                return PollOutcome::Failed(err);
            }
            Check::Pending(observation) => {
                debug!("{} not ready yet: {}", what, observation);
                observation
            }
        };

        let elapsed = started.elapsed();
        if elapsed >= policy.budget {
            warn!("{} not ready within {:?}", what, policy.budget);
            return PollOutcome::TimedOut {
                elapsed,
                last_observation: Some(observation),
            };
        }

        sleep_fn(policy.interval_for(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}
