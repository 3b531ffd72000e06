//! Circuit breaker state machine tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::future::join_all;
use tokio::time;

use adaptive_breaker::config::CircuitBreakerConfigPatch;
use adaptive_breaker::resilience::adaptive::MIN_THRESHOLD;
use adaptive_breaker::resilience::{
    BoxError, BreakerError, CircuitBreaker, CircuitEventKind, CircuitState, ClassifiedError,
    ExecutionContext, FailureKind,
};

mod common;
use common::{drain, fail, slow, succeed, test_breaker, test_config, trip};

#[tokio::test(start_paused = true)]
async fn test_trip_short_circuit_and_recover() {
    let breaker = test_breaker("payments");

    trip(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    let metrics = breaker.metrics();
    assert_eq!(metrics.total_requests, 10);
    assert_eq!(metrics.failed_requests, 6);

    let invoked = Arc::new(AtomicU32::new(0));
    let counter = invoked.clone();
    let result = breaker
        .execute(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(1u32)
        })
        .await;
    assert!(matches!(result, Err(BreakerError::Open { .. })));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(breaker.metrics().short_circuited, 1);

    time::advance(Duration::from_millis(1_001)).await;

    assert_eq!(succeed(&breaker).await.unwrap(), 1);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(breaker.snapshot().half_open_successes, 1);

    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state_changes, 3);
    assert!(snapshot.last_trip_at.is_some());
    assert!(snapshot.last_recovery_ms.unwrap() >= 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_volume_gate_prevents_trip() {
    let breaker = test_breaker("db");
    for _ in 0..9 {
        let _ = fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().window_error_percentage, 100.0);

    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_open_stays_open_inside_sleep_window() {
    let breaker = test_breaker("db");
    trip(&breaker).await;

    time::advance(Duration::from_millis(999)).await;
    assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let breaker = test_breaker("db");
    trip(&breaker).await;
    time::advance(Duration::from_millis(1_001)).await;

    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    assert!(matches!(fail(&breaker).await, Err(BreakerError::Operation(_))));
    assert_eq!(breaker.state(), CircuitState::Open);

    // fresh sleep window from the re-trip
    time::advance(Duration::from_millis(500)).await;
    assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_bounded_trials() {
    let breaker = test_breaker("db");
    trip(&breaker).await;
    time::advance(Duration::from_millis(1_001)).await;

    let calls = (0..4).map(|_| slow(&breaker, Duration::from_millis(100)));
    let results = join_all(calls).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let saturated = results
        .iter()
        .filter(|r| matches!(r, Err(BreakerError::HalfOpenSaturated { .. })))
        .count();
    assert_eq!(admitted, 3);
    assert_eq!(saturated, 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let breaker = test_breaker("db");

    let result = slow(&breaker, Duration::from_secs(5)).await;
    match result {
        Err(BreakerError::Timeout { circuit, timeout }) => {
            assert_eq!(circuit, "db");
            assert_eq!(timeout, Duration::from_millis(500));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let metrics = breaker.metrics();
    assert_eq!(metrics.timeouts, 1);
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(metrics.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_token() {
    let breaker = test_breaker("db");
    let (tx, rx) = tokio::sync::oneshot::channel();

    let result = breaker
        .execute_cancellable(ExecutionContext::new(), |token| async move {
            let _ = tx.send(token.clone());
            time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BoxError>(1u32)
        })
        .await;

    assert!(matches!(result, Err(BreakerError::Timeout { .. })));
    assert!(rx.await.unwrap().is_cancelled());
}

#[tokio::test]
async fn test_operation_error_is_returned_unchanged() {
    let breaker = test_breaker("db");
    let err = breaker
        .execute(|| async { Err::<u32, _>(std::io::Error::new(std::io::ErrorKind::Other, "disk full")) })
        .await
        .unwrap_err();

    let source = err.into_operation_error().unwrap();
    let io = source.downcast::<std::io::Error>().unwrap();
    assert_eq!(io.to_string(), "disk full");
}

#[tokio::test]
async fn test_classified_failures_are_labelled() {
    let breaker = test_breaker("api");
    let mut events = breaker.subscribe();

    let err = breaker
        .execute(|| async { Err::<u32, _>(ClassifiedError::new(FailureKind::RateLimit, "429")) })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::RateLimit);

    let failure = drain(&mut events)
        .into_iter()
        .find_map(|e| match e.kind {
            CircuitEventKind::RequestFailure { failure_type, .. } => Some(failure_type),
            _ => None,
        });
    assert_eq!(failure, Some(FailureKind::RateLimit));
}

#[tokio::test(start_paused = true)]
async fn test_state_change_events() {
    let breaker = test_breaker("db");
    let mut events = breaker.subscribe();

    trip(&breaker).await;

    let events = drain(&mut events);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e.kind, CircuitEventKind::RequestSuccess { .. }))
            .count(),
        4
    );
    let change = events
        .iter()
        .find_map(|e| match &e.kind {
            CircuitEventKind::StateChange { from, to, forced, .. } => Some((*from, *to, *forced)),
            _ => None,
        })
        .unwrap();
    assert_eq!(change, (CircuitState::Closed, CircuitState::Open, false));
    assert!(events.iter().all(|e| e.circuit_name == "db"));
}

#[tokio::test(start_paused = true)]
async fn test_force_open_pins_open() {
    let breaker = test_breaker("db");
    breaker
        .update_config(&CircuitBreakerConfigPatch {
            force_open: Some(true),
            ..Default::default()
        })
        .unwrap();

    assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));
    assert_eq!(breaker.state(), CircuitState::Open);

    time::advance(Duration::from_secs(60)).await;
    assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));
    assert_eq!(breaker.metrics().short_circuited, 2);
}

#[tokio::test(start_paused = true)]
async fn test_force_closed_never_trips() {
    let breaker = test_breaker("db");
    breaker
        .update_config(&CircuitBreakerConfigPatch {
            force_closed: Some(true),
            ..Default::default()
        })
        .unwrap();

    for _ in 0..50 {
        let _ = fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().failed_requests, 50);
}

#[tokio::test(start_paused = true)]
async fn test_force_state() {
    let breaker = test_breaker("db");
    let mut events = breaker.subscribe();

    breaker.force_state(CircuitState::Open, "maintenance");
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));

    breaker.force_state(CircuitState::Closed, "maintenance over");
    assert_eq!(succeed(&breaker).await.unwrap(), 1);

    let reasons: Vec<(String, bool)> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e.kind {
            CircuitEventKind::StateChange { reason, forced, .. } => Some((reason, forced)),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![("maintenance".to_string(), true), ("maintenance over".to_string(), true)]
    );
}

#[tokio::test]
async fn test_update_config_validates() {
    let breaker = test_breaker("db");

    let errors = breaker
        .update_config(&CircuitBreakerConfigPatch {
            success_threshold: Some(10),
            ..Default::default()
        })
        .unwrap_err();
    assert!(!errors.is_empty());
    assert_eq!(breaker.config().success_threshold, 2);

    breaker
        .update_config(&CircuitBreakerConfigPatch {
            error_threshold_percentage: Some(25.0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(breaker.error_threshold_percentage(), 25.0);
    assert_eq!(breaker.config().name, "db");
}

#[tokio::test(start_paused = true)]
async fn test_window_expiry_forgets_old_failures() {
    let breaker = test_breaker("db");
    for _ in 0..9 {
        let _ = fail(&breaker).await;
    }

    // default window is 10s
    time::advance(Duration::from_secs(11)).await;
    assert_eq!(breaker.snapshot().window_requests, 0);

    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_reset_metrics_keeps_state() {
    let breaker = test_breaker("db");
    breaker.force_state(CircuitState::Open, "test");
    let _ = succeed(&breaker).await;

    breaker.reset_metrics();
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.metrics.total_requests, 0);
    assert_eq!(snapshot.metrics.short_circuited, 0);
    assert_eq!(snapshot.window_requests, 0);
    assert_eq!(snapshot.state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_threshold_lowers_for_healthy_dependency() {
    let mut config = test_config("db");
    config.adaptive_thresholds = true;
    let breaker = CircuitBreaker::new(config).unwrap();
    let mut events = breaker.subscribe();

    for _ in 0..150 {
        succeed(&breaker).await.unwrap();
    }
    // one step per rolling window, however many calls land in it
    assert_eq!(breaker.error_threshold_percentage(), 48.0);
    assert_eq!(breaker.threshold_history().len(), 1);

    time::advance(Duration::from_millis(10_001)).await;
    succeed(&breaker).await.unwrap();
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.error_threshold_percentage(), 46.0);

    for _ in 0..30 {
        time::advance(Duration::from_millis(10_001)).await;
        succeed(&breaker).await.unwrap();
    }

    assert_eq!(breaker.error_threshold_percentage(), MIN_THRESHOLD);
    let history = breaker.threshold_history();
    assert_eq!(history.len(), 22);
    assert_eq!(history[0].old, 50.0);
    assert_eq!(history[0].new, 48.0);

    let adjusted = drain(&mut events)
        .iter()
        .filter(|e| matches!(e.kind, CircuitEventKind::ThresholdAdjusted { .. }))
        .count();
    assert_eq!(adjusted, 22);
}

#[tokio::test]
async fn test_adaptive_disabled_never_moves() {
    let breaker = test_breaker("db");
    for _ in 0..150 {
        succeed(&breaker).await.unwrap();
    }
    assert_eq!(breaker.error_threshold_percentage(), 50.0);
    assert!(breaker.threshold_history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_reports_window_latency() {
    let breaker = test_breaker("db");
    slow(&breaker, Duration::from_millis(100)).await.unwrap();
    slow(&breaker, Duration::from_millis(300)).await.unwrap();

    let average = breaker.snapshot().window_average_response_time_ms.unwrap();
    assert!((average - 200.0).abs() < 2.0);

    time::advance(Duration::from_secs(11)).await;
    assert_eq!(breaker.snapshot().window_average_response_time_ms, None);
}
