//! Service dependencies tracked for system health.

use crate::config::{Criticality, DependencyConfig};
use crate::health::HealthCheck;

/// A downstream service, the breaker protecting it and its criticality tier.
#[derive(Debug, Clone)]
pub struct ServiceDependency {
    pub name: String,
    pub circuit: String,
    /// Dedicated probe run on every system health poll. Without one the
    /// breaker's own health report is used.
    pub health_check: Option<HealthCheck>,
    pub criticality: Criticality,
    /// An OPEN breaker counts as degraded rather than down when callers can fall back.
    pub fallback_available: bool,
}

impl ServiceDependency {
    pub fn new(name: impl Into<String>, circuit: impl Into<String>, criticality: Criticality) -> Self {
        Self {
            name: name.into(),
            circuit: circuit.into(),
            health_check: None,
            criticality,
            fallback_available: false,
        }
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn with_fallback(mut self, available: bool) -> Self {
        self.fallback_available = available;
        self
    }
}

impl From<&DependencyConfig> for ServiceDependency {
    fn from(config: &DependencyConfig) -> Self {
        Self::new(&config.name, &config.circuit, config.criticality).with_fallback(config.fallback_available)
    }
}
