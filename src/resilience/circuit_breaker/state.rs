//! Circuit breaker state machine states.
//!
//! # State Transitions
//! ```text
//! Closed → Open:      window volume ≥ threshold AND error% ≥ threshold, force_open, or emergency pin
//! Open → HalfOpen:    first call after the sleep window (lazy, no timer)
//! HalfOpen → Closed:  success_threshold consecutive trial successes
//! HalfOpen → Open:    first trial failure
//! ```

use std::fmt;
use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation; all calls pass through.
    #[default]
    Closed,
    /// Tripped; calls are short-circuited.
    Open,
    /// Probing recovery with a limited number of trial calls.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Value published on the `circuit_breaker_state` gauge.
    pub fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
