//! Adaptive error-threshold tuning.
//!
//! A heuristic control loop, not a statistical estimator: once enough traffic
//! has been observed it nudges the trip threshold down while a dependency is
//! performing well and up while it is chronically above threshold.
//!
//! ```text
//! window error% < 0.5 × threshold  AND  consecutive successes ≥ 100  → lower by step
//! window error% > 1.5 × threshold                                     → raise by step
//! step = learning_rate × 10 points, threshold clamped to [5, 95]
//! ```

use serde::Serialize;

use crate::config::AdaptiveConfig;

/// Lowest threshold the tuner will set.
pub const MIN_THRESHOLD: f64 = 5.0;

/// Highest threshold the tuner will set.
pub const MAX_THRESHOLD: f64 = 95.0;

/// Consecutive successes required before lowering.
pub const LOWER_AFTER_SUCCESSES: u64 = 100;

/// Adjustments at or below this many points are applied but not recorded.
pub const RECORD_DELTA: f64 = 1.0;

/// One recorded threshold move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdAdjustment {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub old: f64,
    pub new: f64,
    pub reason: String,
}

/// Direction of a proposed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Lower,
    Raise,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Lower => "lower",
            Direction::Raise => "raise",
        }
    }
}

/// Inputs observed by the tuner after each outcome.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub threshold: f64,
    pub total_requests: u64,
    pub window_error_percentage: f64,
    pub consecutive_successes: u64,
}

/// Result of one tuning step that changed the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub direction: Direction,
    pub old: f64,
    pub new: f64,
    pub reason: String,
}

impl Proposal {
    /// Whether the move is large enough to go into the history and event stream.
    pub fn is_significant(&self) -> bool {
        (self.new - self.old).abs() > RECORD_DELTA
    }
}

/// Tuner state owned by one breaker.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveThresholdTuner {
    history: Vec<ThresholdAdjustment>,
}

impl AdaptiveThresholdTuner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the threshold should move. Pure; records nothing.
    pub fn propose(&self, config: &AdaptiveConfig, obs: Observation) -> Option<Proposal> {
        if obs.total_requests < config.min_observations {
            return None;
        }

        let step = config.learning_rate * 10.0;
        let current = obs.threshold;

        let (direction, target, reason) = if obs.window_error_percentage < current * 0.5
            && obs.consecutive_successes >= LOWER_AFTER_SUCCESSES
        {
            (
                Direction::Lower,
                (current - step).max(MIN_THRESHOLD),
                format!(
                    "error rate {:.1}% well below threshold after {} consecutive successes",
                    obs.window_error_percentage, obs.consecutive_successes
                ),
            )
        } else if obs.window_error_percentage > current * 1.5 {
            (
                Direction::Raise,
                (current + step).min(MAX_THRESHOLD),
                format!(
                    "error rate {:.1}% sustained above threshold",
                    obs.window_error_percentage
                ),
            )
        } else {
            return None;
        };

        if target == current {
            return None;
        }

        Some(Proposal {
            direction,
            old: current,
            new: target,
            reason,
        })
    }

    /// Append a significant adjustment to the history.
    pub fn record(&mut self, timestamp: u64, proposal: &Proposal) -> ThresholdAdjustment {
        let adjustment = ThresholdAdjustment {
            timestamp,
            old: proposal.old,
            new: proposal.new,
            reason: proposal.reason.clone(),
        };
        self.history.push(adjustment.clone());
        adjustment
    }

    pub fn history(&self) -> &[ThresholdAdjustment] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            learning_rate: 0.2,
            min_observations: 50,
            confidence_interval: 0.95,
        }
    }

    fn obs(threshold: f64, error: f64, successes: u64) -> Observation {
        Observation {
            threshold,
            total_requests: 500,
            window_error_percentage: error,
            consecutive_successes: successes,
        }
    }

    #[test]
    fn test_no_op_before_min_observations() {
        let tuner = AdaptiveThresholdTuner::new();
        let mut o = obs(50.0, 99.0, 0);
        o.total_requests = 49;
        assert!(tuner.propose(&config(), o).is_none());
    }

    #[test]
    fn test_lowers_when_healthy() {
        let tuner = AdaptiveThresholdTuner::new();
        let p = tuner.propose(&config(), obs(50.0, 1.0, 150)).unwrap();
        assert_eq!(p.direction, Direction::Lower);
        assert!((p.new - 48.0).abs() < 1e-9);
        assert!(p.is_significant());
    }

    #[test]
    fn test_healthy_needs_success_streak() {
        let tuner = AdaptiveThresholdTuner::new();
        assert!(tuner.propose(&config(), obs(50.0, 1.0, 99)).is_none());
    }

    #[test]
    fn test_raises_when_degraded() {
        let tuner = AdaptiveThresholdTuner::new();
        let p = tuner.propose(&config(), obs(20.0, 40.0, 0)).unwrap();
        assert_eq!(p.direction, Direction::Raise);
        assert!((p.new - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let tuner = AdaptiveThresholdTuner::new();
        let mut threshold = 10.0;
        for _ in 0..20 {
            if let Some(p) = tuner.propose(&config(), obs(threshold, 0.0, 1_000)) {
                threshold = p.new;
            }
        }
        assert_eq!(threshold, MIN_THRESHOLD);

        // raising stops once 1.5x the threshold passes 100%
        let mut threshold = 60.0;
        for _ in 0..20 {
            if let Some(p) = tuner.propose(&config(), obs(threshold, 100.0, 0)) {
                threshold = p.new;
            }
        }
        assert!(threshold <= MAX_THRESHOLD);
        assert!((threshold - 68.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_steps_are_not_significant() {
        let tuner = AdaptiveThresholdTuner::new();
        let small = AdaptiveConfig {
            learning_rate: 0.1,
            ..config()
        };
        let p = tuner.propose(&small, obs(50.0, 1.0, 150)).unwrap();
        assert!(!p.is_significant());
    }

    #[test]
    fn test_history_is_append_only() {
        let mut tuner = AdaptiveThresholdTuner::new();
        let p = tuner.propose(&config(), obs(50.0, 1.0, 150)).unwrap();
        tuner.record(1, &p);
        tuner.record(2, &p);
        assert_eq!(tuner.history().len(), 2);
        assert_eq!(tuner.history()[0].timestamp, 1);
    }
}
