//! Time-bounded rolling window of call outcomes.
//!
//! Answers "how many requests, and what fraction failed, in the trailing
//! horizon?". Samples are appended in completion order and pruned from the
//! front once they fall out of the horizon.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::resilience::error::FailureKind;

/// One recorded outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSample {
    pub timestamp: Instant,
    pub success: bool,
    pub response_time: Duration,
    pub error: Option<FailureKind>,
}

/// Storage for a breaker's outcome window.
///
/// The in-process [`RollingWindow`] is the default; an implementation backed
/// by a shared store can be injected through
/// [`CircuitBreakerBuilder::window_store`](crate::resilience::CircuitBreakerBuilder::window_store).
pub trait WindowStore: Send {
    /// Append a sample at `now` and prune everything older than the horizon.
    fn record(&mut self, now: Instant, success: bool, response_time: Duration, error: Option<FailureKind>);

    /// Drop samples older than `now - horizon`.
    fn prune(&mut self, now: Instant);

    /// Samples currently in the window.
    fn total(&self) -> usize;

    /// Failed samples currently in the window.
    fn failures(&self) -> usize;

    /// Change the retention horizon.
    fn set_horizon(&mut self, horizon: Duration);

    /// Remove every sample.
    fn clear(&mut self);

    /// Failure percentage (0-100). Zero for an empty window.
    fn error_percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64 * 100.0
    }

    /// Mean response time of the samples in the window, if the store tracks it.
    fn average_response_time(&self) -> Option<Duration> {
        None
    }
}

/// In-memory sliding log of samples.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    horizon: Duration,
    samples: VecDeque<WindowSample>,
    failures: usize,
    response_time_sum: Duration,
}

impl RollingWindow {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            samples: VecDeque::new(),
            failures: 0,
            response_time_sum: Duration::ZERO,
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Samples oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &WindowSample> {
        self.samples.iter()
    }
}

impl WindowStore for RollingWindow {
    fn record(&mut self, now: Instant, success: bool, response_time: Duration, error: Option<FailureKind>) {
        if !success {
            self.failures += 1;
        }
        self.response_time_sum += response_time;
        self.samples.push_back(WindowSample {
            timestamp: now,
            success,
            response_time,
            error,
        });
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        // Samples before the process-start edge cannot be expired yet.
        let Some(cutoff) = now.checked_sub(self.horizon) else {
            return;
        };
        while let Some(front) = self.samples.front() {
            if front.timestamp >= cutoff {
                break;
            }
            if !front.success {
                self.failures -= 1;
            }
            self.response_time_sum = self.response_time_sum.saturating_sub(front.response_time);
            self.samples.pop_front();
        }
    }

    fn total(&self) -> usize {
        self.samples.len()
    }

    fn failures(&self) -> usize {
        self.failures
    }

    fn set_horizon(&mut self, horizon: Duration) {
        self.horizon = horizon;
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.failures = 0;
        self.response_time_sum = Duration::ZERO;
    }

    fn average_response_time(&self) -> Option<Duration> {
        let total = u32::try_from(self.samples.len()).ok().filter(|n| *n > 0)?;
        Some(self.response_time_sum / total)
    }
}
