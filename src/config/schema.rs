//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the breaker
//! subsystem. All types derive Serde traits for deserialization from config files.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Root configuration for the resilience subsystem.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Health check defaults and system polling.
    pub health: HealthConfig,

    /// Circuit breaker definitions.
    pub circuits: Vec<CircuitBreakerConfig>,

    /// Service dependencies scored in system health.
    pub dependencies: Vec<DependencyConfig>,
}

/// Per-dependency circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Unique breaker identifier.
    pub name: String,

    /// Minimum samples in the rolling window before the breaker may trip.
    pub request_volume_threshold: u32,

    /// Error percentage (0-100) at which the breaker trips.
    pub error_threshold_percentage: f64,

    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,

    /// How long the breaker stays OPEN before admitting trial calls.
    pub sleep_window_ms: u64,

    /// Trial calls admitted per HALF_OPEN episode.
    pub half_open_max_calls: u32,

    /// Consecutive trial successes needed to close.
    pub success_threshold: u32,

    /// Retention horizon of the rolling window in milliseconds.
    pub rolling_window_size_ms: u64,

    /// Manual override: always OPEN.
    pub force_open: bool,

    /// Manual override: always CLOSED.
    pub force_closed: bool,

    /// Let the tuner move `error_threshold_percentage`.
    pub adaptive_thresholds: bool,

    /// Walk the fallback chain on failure or short-circuit.
    pub fallback_enabled: bool,

    /// Record to the metrics recorder.
    pub enable_metrics: bool,

    /// Adaptive tuner settings.
    pub adaptive: AdaptiveConfig,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            request_volume_threshold: 20,
            error_threshold_percentage: 50.0,
            timeout_ms: 3_000,
            sleep_window_ms: 5_000,
            half_open_max_calls: 3,
            success_threshold: 2,
            rolling_window_size_ms: 10_000,
            force_open: false,
            force_closed: false,
            adaptive_thresholds: true,
            fallback_enabled: true,
            enable_metrics: true,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Default configuration for the named breaker.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_size_ms)
    }

    /// Return a copy with every `Some` field of `patch` applied.
    ///
    /// The name is never patched.
    pub fn patched(&self, patch: &CircuitBreakerConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(v) = patch.request_volume_threshold {
            next.request_volume_threshold = v;
        }
        if let Some(v) = patch.error_threshold_percentage {
            next.error_threshold_percentage = v;
        }
        if let Some(v) = patch.timeout_ms {
            next.timeout_ms = v;
        }
        if let Some(v) = patch.sleep_window_ms {
            next.sleep_window_ms = v;
        }
        if let Some(v) = patch.half_open_max_calls {
            next.half_open_max_calls = v;
        }
        if let Some(v) = patch.success_threshold {
            next.success_threshold = v;
        }
        if let Some(v) = patch.rolling_window_size_ms {
            next.rolling_window_size_ms = v;
        }
        if let Some(v) = patch.force_open {
            next.force_open = v;
        }
        if let Some(v) = patch.force_closed {
            next.force_closed = v;
        }
        if let Some(v) = patch.adaptive_thresholds {
            next.adaptive_thresholds = v;
        }
        if let Some(v) = patch.fallback_enabled {
            next.fallback_enabled = v;
        }
        if let Some(v) = patch.enable_metrics {
            next.enable_metrics = v;
        }
        if let Some(v) = &patch.adaptive {
            next.adaptive = v.clone();
        }
        next
    }
}

/// Partial update applied by `CircuitBreaker::update_config`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfigPatch {
    pub request_volume_threshold: Option<u32>,
    pub error_threshold_percentage: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub sleep_window_ms: Option<u64>,
    pub half_open_max_calls: Option<u32>,
    pub success_threshold: Option<u32>,
    pub rolling_window_size_ms: Option<u64>,
    pub force_open: Option<bool>,
    pub force_closed: Option<bool>,
    pub adaptive_thresholds: Option<bool>,
    pub fallback_enabled: Option<bool>,
    pub enable_metrics: Option<bool>,
    pub adaptive: Option<AdaptiveConfig>,
}

impl CircuitBreakerConfigPatch {
    /// Patch that turns a loaded config into a full replacement (name excluded).
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            request_volume_threshold: Some(config.request_volume_threshold),
            error_threshold_percentage: Some(config.error_threshold_percentage),
            timeout_ms: Some(config.timeout_ms),
            sleep_window_ms: Some(config.sleep_window_ms),
            half_open_max_calls: Some(config.half_open_max_calls),
            success_threshold: Some(config.success_threshold),
            rolling_window_size_ms: Some(config.rolling_window_size_ms),
            force_open: Some(config.force_open),
            force_closed: Some(config.force_closed),
            adaptive_thresholds: Some(config.adaptive_thresholds),
            fallback_enabled: Some(config.fallback_enabled),
            enable_metrics: Some(config.enable_metrics),
            adaptive: Some(config.adaptive.clone()),
        }
    }
}

/// Adaptive threshold tuner settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Step size factor; each adjustment moves the threshold by `learning_rate * 10` points.
    pub learning_rate: f64,

    /// Total requests observed before the tuner starts adjusting.
    pub min_observations: u64,

    /// Reported with the breaker status. Not used by the heuristic tuner.
    pub confidence_interval: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.2,
            min_observations: 50,
            confidence_interval: 0.95,
        }
    }
}

/// Criticality tier of a service dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criticality {
    Critical,
    High,
    Medium,
    Low,
}

impl Criticality {
    /// Weight of this tier in system health scoring.
    pub fn weight(self) -> f64 {
        match self {
            Criticality::Critical => 4.0,
            Criticality::High => 3.0,
            Criticality::Medium => 2.0,
            Criticality::Low => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Criticality::Critical => "CRITICAL",
            Criticality::High => "HIGH",
            Criticality::Medium => "MEDIUM",
            Criticality::Low => "LOW",
        }
    }
}

/// Service dependency declared in a config file.
///
/// The health probe itself is code; the config only names the dependency,
/// its breaker and its tier.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DependencyConfig {
    /// Dependency identifier.
    pub name: String,

    /// Name of the circuit breaker protecting this dependency.
    pub circuit: String,

    /// Criticality tier.
    pub criticality: Criticality,

    /// Whether callers have a fallback for this dependency.
    #[serde(default)]
    pub fallback_available: bool,
}

/// Health check defaults.
///
/// `interval_ms` and `timeout_ms` apply to every check registered without
/// its own interval or timeout.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between probes in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// How often the manager recomputes system health, in milliseconds.
    pub system_poll_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
            system_poll_interval_ms: 60_000,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn system_poll_interval(&self) -> Duration {
        Duration::from_millis(self.system_poll_interval_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty for development, JSON for production.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CircuitBreakerConfig::named("db");
        assert_eq!(config.name, "db");
        assert_eq!(config.request_volume_threshold, 20);
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert!(config.adaptive_thresholds);
    }

    #[test]
    fn test_patch_leaves_name_and_unset_fields() {
        let config = CircuitBreakerConfig::named("db");
        let patch = CircuitBreakerConfigPatch {
            timeout_ms: Some(250),
            force_open: Some(true),
            ..Default::default()
        };
        let next = config.patched(&patch);
        assert_eq!(next.name, "db");
        assert_eq!(next.timeout_ms, 250);
        assert!(next.force_open);
        assert_eq!(next.sleep_window_ms, config.sleep_window_ms);
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [[circuits]]
            name = "payments"
            request_volume_threshold = 10
            error_threshold_percentage = 25.0

            [[dependencies]]
            name = "payment-gateway"
            circuit = "payments"
            criticality = "CRITICAL"
        "#;
        let config: ResilienceConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.circuits[0].request_volume_threshold, 10);
        assert_eq!(config.circuits[0].timeout_ms, 3_000);
        assert_eq!(config.dependencies[0].criticality, Criticality::Critical);
        assert!(!config.dependencies[0].fallback_available);
    }

    #[test]
    fn test_criticality_weights() {
        assert_eq!(Criticality::Critical.weight(), 4.0);
        assert_eq!(Criticality::Low.weight(), 1.0);
    }
}
