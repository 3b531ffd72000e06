//! Metrics collection and exposition.
//!
//! # Metrics
//! - `circuit_breaker_requests_total` (counter): outcomes by circuit, result, failure type
//! - `circuit_breaker_request_duration_seconds` (histogram): protected call latency
//! - `circuit_breaker_state` (gauge): 0=CLOSED, 1=HALF_OPEN, 2=OPEN
//! - `circuit_breaker_state_changes_total` (counter): transitions by from/to state
//! - `circuit_breaker_recovery_duration_seconds` (histogram): trip to CLOSED
//! - `circuit_breaker_fallback_attempts_total` (counter): per strategy and outcome
//! - `circuit_breaker_error_threshold_percentage` (gauge): current trip threshold
//! - `circuit_breaker_threshold_adjustments_total` (counter): tuner moves by direction
//! - `circuit_breaker_health_check` (gauge): 1=passing, 0=failing
//! - `circuit_breaker_system_health_score` (gauge): weighted 0-100 score
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Latency buckets in seconds for protected calls.
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(LATENCY_BUCKETS)?
        .install()?;

    describe_metrics();
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "circuit_breaker_requests_total",
        "Requests seen by circuit breakers by result and failure type"
    );
    describe_histogram!(
        "circuit_breaker_request_duration_seconds",
        "Duration of protected calls in seconds"
    );
    describe_gauge!(
        "circuit_breaker_state",
        "Circuit state: 0=CLOSED, 1=HALF_OPEN, 2=OPEN"
    );
    describe_counter!(
        "circuit_breaker_state_changes_total",
        "Circuit state transitions"
    );
    describe_histogram!(
        "circuit_breaker_recovery_duration_seconds",
        "Time from trip to CLOSED in seconds"
    );
    describe_counter!(
        "circuit_breaker_fallback_attempts_total",
        "Fallback strategy attempts by outcome"
    );
    describe_gauge!(
        "circuit_breaker_error_threshold_percentage",
        "Current error percentage trip threshold"
    );
    describe_counter!(
        "circuit_breaker_threshold_adjustments_total",
        "Adaptive threshold adjustments"
    );
    describe_gauge!(
        "circuit_breaker_health_check",
        "Health check result: 1=passing, 0=failing"
    );
    describe_gauge!(
        "circuit_breaker_system_health_score",
        "Criticality-weighted system health score (0-100)"
    );
}

/// Record one request outcome.
pub fn record_request(circuit: &str, result: &'static str, failure_type: &'static str, duration_secs: Option<f64>) {
    let labels = [
        ("circuit", circuit.to_string()),
        ("result", result.to_string()),
        ("failure_type", failure_type.to_string()),
    ];
    counter!("circuit_breaker_requests_total", &labels).increment(1);

    if let Some(secs) = duration_secs {
        let labels = [("circuit", circuit.to_string()), ("result", result.to_string())];
        histogram!("circuit_breaker_request_duration_seconds", &labels).record(secs);
    }
}

/// Publish the current state gauge.
pub fn record_state(circuit: &str, value: f64) {
    gauge!("circuit_breaker_state", "circuit" => circuit.to_string()).set(value);
}

/// Record a state transition.
pub fn record_state_change(circuit: &str, from: &'static str, to: &'static str) {
    counter!(
        "circuit_breaker_state_changes_total",
        "circuit" => circuit.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

/// Record how long a breaker took to recover after tripping.
pub fn record_recovery(circuit: &str, secs: f64) {
    histogram!("circuit_breaker_recovery_duration_seconds", "circuit" => circuit.to_string()).record(secs);
}

/// Record a fallback strategy attempt.
pub fn record_fallback_attempt(circuit: &str, strategy: &str, outcome: &'static str) {
    counter!(
        "circuit_breaker_fallback_attempts_total",
        "circuit" => circuit.to_string(),
        "strategy" => strategy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Publish the current trip threshold.
pub fn record_threshold(circuit: &str, value: f64) {
    gauge!("circuit_breaker_error_threshold_percentage", "circuit" => circuit.to_string()).set(value);
}

/// Record a tuner adjustment.
pub fn record_threshold_adjustment(circuit: &str, direction: &'static str) {
    counter!(
        "circuit_breaker_threshold_adjustments_total",
        "circuit" => circuit.to_string(),
        "direction" => direction
    )
    .increment(1);
}

/// Publish a health check result.
pub fn record_health_check(circuit: &str, check: &str, passed: bool) {
    gauge!(
        "circuit_breaker_health_check",
        "circuit" => circuit.to_string(),
        "check" => check.to_string()
    )
    .set(if passed { 1.0 } else { 0.0 });
}

/// Publish the system-wide health score.
pub fn record_system_health(score: f64) {
    gauge!("circuit_breaker_system_health_score").set(score);
}
