//! System-wide health scoring.
//!
//! ```text
//! dependency status:
//!     health check failed          → DOWN      (0)
//!     circuit OPEN, fallback       → DEGRADED  (50)
//!     circuit OPEN, no fallback    → DOWN      (0)
//!     circuit HALF_OPEN            → DEGRADED  (50)
//!     otherwise                    → HEALTHY   (100)
//!
//! system score = Σ(score × weight) / Σ weight   (CRITICAL 4, HIGH 3, MEDIUM 2, LOW 1)
//! healthy      = score ≥ 80 AND no CRITICAL dependency DOWN
//! ```

use serde::Serialize;

use crate::config::Criticality;
use crate::resilience::CircuitState;

/// Weighted score at or above which the system can be healthy.
pub const SYSTEM_HEALTHY_SCORE: f64 = 80.0;

/// Status of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyHealth {
    Healthy,
    Degraded,
    Down,
}

impl DependencyHealth {
    pub fn score(self) -> f64 {
        match self {
            DependencyHealth::Healthy => 100.0,
            DependencyHealth::Degraded => 50.0,
            DependencyHealth::Down => 0.0,
        }
    }

    pub fn classify(check_passed: bool, state: CircuitState, fallback_available: bool) -> Self {
        if !check_passed {
            return DependencyHealth::Down;
        }
        match state {
            CircuitState::Open if fallback_available => DependencyHealth::Degraded,
            CircuitState::Open => DependencyHealth::Down,
            CircuitState::HalfOpen => DependencyHealth::Degraded,
            CircuitState::Closed => DependencyHealth::Healthy,
        }
    }
}

/// Scored dependency in a system health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub circuit: String,
    pub criticality: Criticality,
    pub status: DependencyHealth,
    pub score: f64,
    pub circuit_state: CircuitState,
    pub check_passed: bool,
}

impl DependencyStatus {
    pub fn new(
        name: &str,
        circuit: &str,
        criticality: Criticality,
        check_passed: bool,
        circuit_state: CircuitState,
        fallback_available: bool,
    ) -> Self {
        let status = DependencyHealth::classify(check_passed, circuit_state, fallback_available);
        Self {
            name: name.to_string(),
            circuit: circuit.to_string(),
            criticality,
            status,
            score: status.score(),
            circuit_state,
            check_passed,
        }
    }

    fn is_critical_down(&self) -> bool {
        self.criticality == Criticality::Critical && self.status == DependencyHealth::Down
    }
}

/// Aggregated health of every registered dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub score: f64,
    pub healthy: bool,
    pub critical_down: usize,
    pub dependencies: Vec<DependencyStatus>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl SystemHealth {
    /// Score `dependencies`. An empty set is fully healthy.
    pub fn aggregate(dependencies: Vec<DependencyStatus>, timestamp: u64) -> Self {
        let (weighted, total_weight) = dependencies.iter().fold((0.0, 0.0), |(sum, weight), dep| {
            let w = dep.criticality.weight();
            (sum + dep.score * w, weight + w)
        });
        let score = if total_weight > 0.0 { weighted / total_weight } else { 100.0 };
        let critical_down = dependencies.iter().filter(|d| d.is_critical_down()).count();

        Self {
            score,
            healthy: score >= SYSTEM_HEALTHY_SCORE && critical_down == 0,
            critical_down,
            dependencies,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str, criticality: Criticality, passed: bool, state: CircuitState) -> DependencyStatus {
        DependencyStatus::new(name, name, criticality, passed, state, false)
    }

    #[test]
    fn test_classification() {
        assert_eq!(DependencyHealth::classify(false, CircuitState::Closed, true), DependencyHealth::Down);
        assert_eq!(DependencyHealth::classify(true, CircuitState::Open, true), DependencyHealth::Degraded);
        assert_eq!(DependencyHealth::classify(true, CircuitState::Open, false), DependencyHealth::Down);
        assert_eq!(DependencyHealth::classify(true, CircuitState::HalfOpen, false), DependencyHealth::Degraded);
        assert_eq!(DependencyHealth::classify(true, CircuitState::Closed, false), DependencyHealth::Healthy);
    }

    #[test]
    fn test_critical_down_cannot_be_masked() {
        let mut deps: Vec<_> = (0..10)
            .map(|i| dep(&format!("low-{i}"), Criticality::Low, true, CircuitState::Closed))
            .collect();
        deps.push(dep("db", Criticality::Critical, false, CircuitState::Closed));

        let health = SystemHealth::aggregate(deps, 0);
        // 1000 / 14
        assert!(health.score > 70.0);
        assert_eq!(health.critical_down, 1);
        assert!(!health.healthy);
    }

    #[test]
    fn test_weighted_score_threshold() {
        let health = SystemHealth::aggregate(
            vec![
                dep("api", Criticality::High, true, CircuitState::Closed),
                dep("cache", Criticality::Low, false, CircuitState::Open),
            ],
            0,
        );
        assert!((health.score - 75.0).abs() < 1e-9);
        assert_eq!(health.critical_down, 0);
        assert!(!health.healthy);

        let health = SystemHealth::aggregate(
            vec![
                dep("db", Criticality::Critical, true, CircuitState::Closed),
                dep("cache", Criticality::Low, true, CircuitState::HalfOpen),
            ],
            0,
        );
        assert!((health.score - 90.0).abs() < 1e-9);
        assert!(health.healthy);
    }

    #[test]
    fn test_no_dependencies_is_healthy() {
        let health = SystemHealth::aggregate(Vec::new(), 42);
        assert_eq!(health.score, 100.0);
        assert!(health.healthy);
        assert_eq!(health.timestamp, 42);
    }
}
