//! Per-breaker counters and the read-only snapshot exposed to callers.

use serde::Serialize;

use crate::resilience::circuit_breaker::CircuitState;

/// Cumulative counters owned by one breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitMetrics {
    /// Every call to `execute`, short-circuited ones included.
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeouts: u64,
    pub short_circuited: u64,
    pub fallback_calls: u64,
    /// Running mean over completed calls, in milliseconds.
    pub average_response_time_ms: f64,
    pub consecutive_failures: u64,
    pub consecutive_successes: u64,
}

impl CircuitMetrics {
    pub(crate) fn record_success(&mut self, response_time_ms: f64) {
        self.successful_requests += 1;
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.update_average(response_time_ms);
    }

    pub(crate) fn record_failure(&mut self, response_time_ms: f64, timed_out: bool) {
        self.failed_requests += 1;
        if timed_out {
            self.timeouts += 1;
        }
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        self.update_average(response_time_ms);
    }

    fn update_average(&mut self, response_time_ms: f64) {
        let completed = (self.successful_requests + self.failed_requests) as f64;
        self.average_response_time_ms += (response_time_ms - self.average_response_time_ms) / completed;
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    /// Milliseconds spent in the current state.
    pub time_in_state_ms: u64,
    pub error_threshold_percentage: f64,
    pub metrics: CircuitMetrics,
    pub window_requests: usize,
    pub window_error_percentage: f64,
    /// Mean response time of the calls still in the window.
    pub window_average_response_time_ms: Option<f64>,
    pub half_open_successes: u32,
    /// Held OPEN by an emergency pin.
    pub pinned_open: bool,
    pub state_changes: u64,
    /// Epoch milliseconds of the most recent trip.
    pub last_trip_at: Option<u64>,
    /// Trip-to-CLOSED duration of the most recent recovery.
    pub last_recovery_ms: Option<u64>,
    pub threshold_adjustments: usize,
    pub confidence_interval: f64,
    pub fallback_strategies: Vec<String>,
}
