//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (dependencies reference existing circuits)
//! - Validate value ranges (thresholds within bounds, durations > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, ResilienceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("circuit name must not be empty")]
    EmptyName,

    #[error("circuit '{circuit}': {field} must be greater than zero")]
    Zero { circuit: String, field: &'static str },

    #[error("circuit '{circuit}': error_threshold_percentage {value} is outside 0-100")]
    ThresholdOutOfRange { circuit: String, value: f64 },

    #[error("circuit '{circuit}': success_threshold {success} exceeds half_open_max_calls {max_calls}")]
    UnreachablePromotion { circuit: String, success: u32, max_calls: u32 },

    #[error("circuit '{0}': force_open and force_closed are both set")]
    ConflictingOverrides(String),

    #[error("circuit '{circuit}': adaptive learning_rate {value} must be in (0, 1]")]
    LearningRate { circuit: String, value: f64 },

    #[error("duplicate circuit name '{0}'")]
    DuplicateCircuit(String),

    #[error("dependency '{dependency}' references unknown circuit '{circuit}'")]
    UnknownCircuit { dependency: String, circuit: String },

    #[error("health: {0} must be greater than zero")]
    HealthZero(&'static str),
}

/// Validate one breaker configuration.
pub fn validate_circuit(config: &CircuitBreakerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let name = config.name.clone();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    let zero_checks: [(&'static str, u64); 5] = [
        ("timeout_ms", config.timeout_ms),
        ("sleep_window_ms", config.sleep_window_ms),
        ("rolling_window_size_ms", config.rolling_window_size_ms),
        ("half_open_max_calls", config.half_open_max_calls as u64),
        ("success_threshold", config.success_threshold as u64),
    ];
    for (field, value) in zero_checks {
        if value == 0 {
            errors.push(ValidationError::Zero { circuit: name.clone(), field });
        }
    }

    let threshold = config.error_threshold_percentage;
    if !(0.0..=100.0).contains(&threshold) || threshold.is_nan() {
        errors.push(ValidationError::ThresholdOutOfRange {
            circuit: name.clone(),
            value: threshold,
        });
    }

    if config.success_threshold > config.half_open_max_calls {
        errors.push(ValidationError::UnreachablePromotion {
            circuit: name.clone(),
            success: config.success_threshold,
            max_calls: config.half_open_max_calls,
        });
    }

    if config.force_open && config.force_closed {
        errors.push(ValidationError::ConflictingOverrides(name.clone()));
    }

    let rate = config.adaptive.learning_rate;
    if !(rate > 0.0 && rate <= 1.0) {
        errors.push(ValidationError::LearningRate { circuit: name, value: rate });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a full configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    for circuit in &config.circuits {
        if let Err(mut circuit_errors) = validate_circuit(circuit) {
            errors.append(&mut circuit_errors);
        }
        if !names.insert(circuit.name.as_str()) {
            errors.push(ValidationError::DuplicateCircuit(circuit.name.clone()));
        }
    }

    for dep in &config.dependencies {
        if !names.contains(dep.circuit.as_str()) {
            errors.push(ValidationError::UnknownCircuit {
                dependency: dep.name.clone(),
                circuit: dep.circuit.clone(),
            });
        }
    }

    if config.health.interval_ms == 0 {
        errors.push(ValidationError::HealthZero("interval_ms"));
    }
    if config.health.timeout_ms == 0 {
        errors.push(ValidationError::HealthZero("timeout_ms"));
    }
    if config.health.system_poll_interval_ms == 0 {
        errors.push(ValidationError::HealthZero("system_poll_interval_ms"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
