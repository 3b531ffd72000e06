//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::broadcast;

use adaptive_breaker::config::CircuitBreakerConfig;
use adaptive_breaker::resilience::{BoxError, BreakerError, CircuitBreaker, CircuitEvent};

/// Breaker with small, deterministic settings: volume 10, threshold 50%,
/// timeout 500ms, sleep window 1000ms, 3 trial calls, 2 to close, no tuning.
pub fn test_config(name: &str) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        request_volume_threshold: 10,
        error_threshold_percentage: 50.0,
        timeout_ms: 500,
        sleep_window_ms: 1_000,
        half_open_max_calls: 3,
        success_threshold: 2,
        adaptive_thresholds: false,
        ..CircuitBreakerConfig::named(name)
    }
}

pub fn test_breaker(name: &str) -> CircuitBreaker {
    CircuitBreaker::new(test_config(name)).unwrap()
}

pub async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError> {
    breaker.execute(|| async { Ok::<_, BoxError>(1u32) }).await
}

pub async fn fail(breaker: &CircuitBreaker) -> Result<u32, BreakerError> {
    breaker.execute(|| async { Err::<u32, BoxError>("boom".into()) }).await
}

/// Call that takes `latency` to succeed.
pub async fn slow(breaker: &CircuitBreaker, latency: Duration) -> Result<u32, BreakerError> {
    breaker
        .execute(|| async move {
            tokio::time::sleep(latency).await;
            Ok::<_, BoxError>(1u32)
        })
        .await
}

/// Drive the breaker to OPEN: 4 successes then 6 failures.
pub async fn trip(breaker: &CircuitBreaker) {
    for _ in 0..4 {
        let _ = succeed(breaker).await;
    }
    for _ in 0..6 {
        let _ = fail(breaker).await;
    }
}

/// Everything currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<CircuitEvent>) -> Vec<CircuitEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
