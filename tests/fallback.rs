//! Fallback chain behaviour through the breaker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde_json::json;

use adaptive_breaker::config::CircuitBreakerConfigPatch;
use adaptive_breaker::resilience::fallback::{FallbackDataStrategy, FnFallback, StaticFallback};
use adaptive_breaker::resilience::{
    BoxError, BreakerError, CircuitEventKind, CircuitState, ClassifiedError, ExecutionContext, FailureKind,
};

mod common;
use common::{drain, fail, succeed, test_breaker};

#[tokio::test]
async fn test_chain_runs_in_priority_order() {
    let breaker = test_breaker("search");
    let tried = Arc::new(AtomicU32::new(0));

    let counter = tried.clone();
    breaker.add_fallback_strategy(Arc::new(FnFallback::new("broken", 1, move |_err, _ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<u32, BoxError>("replica down".into())
        }
    })));
    breaker.add_fallback_strategy(Arc::new(StaticFallback::new("stale", 5, 99u32)));
    breaker.add_fallback_strategy(Arc::new(StaticFallback::new("never", 10, 0u32)));

    assert_eq!(breaker.snapshot().fallback_strategies, vec!["broken", "stale", "never"]);

    let mut events = breaker.subscribe();
    assert_eq!(fail(&breaker).await.unwrap(), 99);
    assert_eq!(tried.load(Ordering::SeqCst), 1);

    let executed = drain(&mut events).into_iter().find_map(|e| match e.kind {
        CircuitEventKind::FallbackExecuted { success, strategy } => Some((success, strategy)),
        _ => None,
    });
    assert_eq!(executed, Some((true, Some("stale".to_string()))));
    assert_eq!(breaker.metrics().fallback_calls, 1);
    // the failure still counts against the dependency
    assert_eq!(breaker.metrics().failed_requests, 1);
}

#[tokio::test]
async fn test_exhausted_chain_returns_original_error() {
    let breaker = test_breaker("search");
    breaker.add_fallback_strategy(Arc::new(FnFallback::new("broken", 1, |_err, _ctx| async {
        Err::<u32, BoxError>("no luck".into())
    })));

    let mut events = breaker.subscribe();
    let err = fail(&breaker).await.unwrap_err();
    assert_eq!(err.to_string(), "boom");

    let executed = drain(&mut events).into_iter().find_map(|e| match e.kind {
        CircuitEventKind::FallbackExecuted { success, strategy } => Some((success, strategy)),
        _ => None,
    });
    assert_eq!(executed, Some((false, None)));
}

#[tokio::test]
async fn test_condition_selects_by_failure_kind() {
    let breaker = test_breaker("api");
    breaker.add_fallback_strategy(Arc::new(
        FnFallback::new("throttled", 1, |_err, _ctx| async { Ok::<_, BoxError>("queued") })
            .with_condition(|err, _ctx| err.kind() == FailureKind::RateLimit),
    ));
    breaker.add_fallback_strategy(Arc::new(
        FnFallback::new("circuit-open", 2, |_err, _ctx| async { Ok::<_, BoxError>("cached") })
            .with_condition(|err, _ctx| err.is_short_circuit()),
    ));

    let limited = breaker
        .execute(|| async { Err::<&'static str, _>(ClassifiedError::new(FailureKind::RateLimit, "429")) })
        .await;
    assert_eq!(limited.unwrap(), "queued");

    let plain = breaker
        .execute(|| async { Err::<&'static str, BoxError>("500".into()) })
        .await;
    assert!(matches!(plain, Err(BreakerError::Operation(_))));

    breaker.force_state(CircuitState::Open, "test");
    let open = breaker
        .execute(|| async { Ok::<_, BoxError>("live") })
        .await;
    assert_eq!(open.unwrap(), "cached");
}

#[tokio::test]
async fn test_fallback_data_from_context() {
    let breaker = test_breaker("profile");
    breaker.add_fallback_strategy(Arc::new(FallbackDataStrategy::new(0)));

    let ctx = ExecutionContext::new()
        .with_attributes(json!({ "user": 42 }))
        .with_fallback_data(json!({ "name": "guest" }));
    let value = breaker
        .execute_with_context(ctx, || async { Err::<serde_json::Value, BoxError>("timeout".into()) })
        .await
        .unwrap();
    assert_eq!(value, json!({ "name": "guest" }));

    // no payload on this call, so the strategy is skipped
    let err = breaker
        .execute(|| async { Err::<serde_json::Value, BoxError>("timeout".into()) })
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn test_fallback_disabled() {
    let breaker = test_breaker("db");
    breaker.add_fallback_strategy(Arc::new(StaticFallback::new("stale", 0, 5u32)));
    breaker
        .update_config(&CircuitBreakerConfigPatch {
            fallback_enabled: Some(false),
            ..Default::default()
        })
        .unwrap();

    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.metrics().fallback_calls, 0);
}

#[tokio::test]
async fn test_type_mismatch_moves_on() {
    let breaker = test_breaker("db");
    breaker.add_fallback_strategy(Arc::new(StaticFallback::new("wrong-type", 0, String::from("nope"))));
    breaker.add_fallback_strategy(Arc::new(StaticFallback::new("right-type", 1, 3u32)));

    assert_eq!(fail(&breaker).await.unwrap(), 3);
    assert_eq!(succeed(&breaker).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fallback_times_out() {
    let breaker = test_breaker("db");
    breaker.add_fallback_strategy(Arc::new(
        FnFallback::new("slow", 0, |_err, _ctx| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, BoxError>(1u32)
        })
        .with_timeout(Duration::from_millis(100)),
    ));
    breaker.add_fallback_strategy(Arc::new(StaticFallback::new("fast", 1, 2u32)));

    assert_eq!(fail(&breaker).await.unwrap(), 2);
}
