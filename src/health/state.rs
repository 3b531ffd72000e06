//! Per-check health state.
//!
//! # State Transitions
//! ```text
//! Unknown → Passing | Failing: first probe completes
//! Passing ↔ Failing: every probe overwrites the last result
//! ```
//!
//! Consecutive failures are tracked so logs can tell a blip from an outage.
//! Results never touch circuit state.

use serde::Serialize;

/// Outcome history of one health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckStatus {
    /// `None` until the first probe completes.
    pub last_passed: Option<bool>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the Unix epoch.
    pub last_checked: Option<u64>,
    pub last_error: Option<String>,
}

impl CheckStatus {
    pub fn record_success(&mut self, at: u64) {
        self.last_passed = Some(true);
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.last_checked = Some(at);
        self.last_error = None;
    }

    pub fn record_failure(&mut self, at: u64, error: String) {
        self.last_passed = Some(false);
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_checked = Some(at);
        self.last_error = Some(error);
    }
}
