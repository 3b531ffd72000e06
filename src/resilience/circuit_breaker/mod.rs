//! Adaptive circuit breaker for one dependency.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls short-circuit to the fallback chain
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # Call path
//! ```text
//! execute(op)
//!     → admit (emergency pin, force flags, lazy OPEN → HALF_OPEN, half-open admission)
//!         rejected → short_circuited += 1 → fallback chain / Open error
//!     → race op against timeout_ms
//!     → record outcome into the rolling window and counters
//!     → evaluate transitions, run the adaptive tuner
//!     → on failure: fallback chain, else the original error
//! ```
//!
//! # Design Decisions
//! - One mutex per breaker guards state, counters and window; it is never
//!   held across an await
//! - Config lives in an `ArcSwap`; every writer holds the state mutex, so the
//!   tuner and `update_config` never lose each other's changes
//! - Short-circuited calls are counted separately and never enter the window
//! - The emergency pin lives outside the config, so a reload cannot clear it
//! - The tuner moves the threshold at most once per rolling window

mod metrics;
mod state;

pub use metrics::{CircuitMetrics, CircuitSnapshot};
pub use state::CircuitState;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::validation::{validate_circuit, ValidationError};
use crate::config::{CircuitBreakerConfig, CircuitBreakerConfigPatch, HealthConfig};
use crate::health::{BreakerHealth, HealthCheck, HealthCheckRunner};
use crate::observability::metrics as telemetry;
use crate::resilience::adaptive::{AdaptiveThresholdTuner, Observation, ThresholdAdjustment};
use crate::resilience::error::{BoxError, BreakerError};
use crate::resilience::events::{now_millis, CircuitEvent, CircuitEventKind, EventBus};
use crate::resilience::fallback::{ExecutionContext, FallbackChain, FallbackOutcome, FallbackStrategy};
use crate::resilience::timeouts;
use crate::resilience::window::{RollingWindow, WindowStore};

/// Mutable breaker state guarded by one lock.
struct Inner {
    state: CircuitState,
    state_changed_at: Instant,
    half_open_successes: u32,
    half_open_admitted: u32,
    metrics: CircuitMetrics,
    window: Box<dyn WindowStore>,
    tuner: AdaptiveThresholdTuner,
    state_changes: u64,
    /// Instant and epoch millis of the last trip.
    last_trip: Option<(Instant, u64)>,
    last_recovery: Option<Duration>,
    /// Set by `pin_open`, cleared only by `unpin`.
    pinned_open: bool,
    last_tuned_at: Option<Instant>,
}

/// Builder for [`CircuitBreaker`].
pub struct CircuitBreakerBuilder {
    config: CircuitBreakerConfig,
    upstream: Option<broadcast::Sender<CircuitEvent>>,
    window: Option<Box<dyn WindowStore>>,
    health: HealthConfig,
}

impl CircuitBreakerBuilder {
    /// Also forward every event to `sender`.
    pub fn event_upstream(mut self, sender: broadcast::Sender<CircuitEvent>) -> Self {
        self.upstream = Some(sender);
        self
    }

    /// Replace the in-memory rolling window.
    pub fn window_store(mut self, store: Box<dyn WindowStore>) -> Self {
        self.window = Some(store);
        self
    }

    /// Interval and timeout for health checks registered without their own.
    pub fn health_defaults(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn build(self) -> Result<CircuitBreaker, Vec<ValidationError>> {
        validate_circuit(&self.config)?;

        let window = self
            .window
            .unwrap_or_else(|| Box::new(RollingWindow::new(self.config.rolling_window())));

        let health = HealthCheckRunner::with_defaults(&self.config.name, self.health);
        health.set_metrics_enabled(self.config.enable_metrics);

        let breaker = CircuitBreaker {
            name: self.config.name.clone(),
            health: Arc::new(health),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                state_changed_at: Instant::now(),
                half_open_successes: 0,
                half_open_admitted: 0,
                metrics: CircuitMetrics::default(),
                window,
                tuner: AdaptiveThresholdTuner::new(),
                state_changes: 0,
                last_trip: None,
                last_recovery: None,
                pinned_open: false,
                last_tuned_at: None,
            }),
            fallbacks: ArcSwap::from_pointee(FallbackChain::new()),
            events: EventBus::new(self.upstream),
            config: ArcSwap::from_pointee(self.config),
        };

        let config = breaker.config.load_full();
        if config.enable_metrics {
            telemetry::record_state(&breaker.name, CircuitState::Closed.gauge_value());
            telemetry::record_threshold(&breaker.name, config.error_threshold_percentage);
        }
        tracing::info!(circuit = %breaker.name, "Circuit breaker created");

        Ok(breaker)
    }
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: ArcSwap<CircuitBreakerConfig>,
    inner: Mutex<Inner>,
    fallbacks: ArcSwap<FallbackChain>,
    events: EventBus,
    health: Arc<HealthCheckRunner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Validate `config` and build a standalone breaker.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, Vec<ValidationError>> {
        Self::builder(config).build()
    }

    pub fn builder(config: CircuitBreakerConfig) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            config,
            upstream: None,
            window: None,
            health: HealthConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration, including the tuned threshold.
    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.load_full()
    }

    /// Current state. Does not apply the lazy OPEN → HALF_OPEN transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn error_threshold_percentage(&self) -> f64 {
        self.config.load().error_threshold_percentage
    }

    /// Subscribe to this breaker's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    /// Run `operation` through the breaker.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError>
    where
        T: 'static,
        E: Into<BoxError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_context(ExecutionContext::new(), operation).await
    }

    /// Run `operation` with a context passed through to fallback strategies.
    pub async fn execute_with_context<T, E, F, Fut>(&self, ctx: ExecutionContext, operation: F) -> Result<T, BreakerError>
    where
        T: 'static,
        E: Into<BoxError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_cancellable(ctx, |_| operation()).await
    }

    /// Run `operation`, handing it a token that is cancelled if the call times out.
    pub async fn execute_cancellable<T, E, F, Fut>(&self, ctx: ExecutionContext, operation: F) -> Result<T, BreakerError>
    where
        T: 'static,
        E: Into<BoxError>,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = self.config.load_full();

        if let Err(rejection) = self.admit() {
            return self.recover(rejection, &ctx, &config).await;
        }

        let token = CancellationToken::new();
        let started = Instant::now();
        let outcome = timeouts::race(config.timeout(), &token, operation(token.clone())).await;
        let elapsed = started.elapsed();

        let error = match outcome {
            Ok(Ok(value)) => {
                self.on_success(elapsed, &ctx);
                return Ok(value);
            }
            Ok(Err(e)) => BreakerError::Operation(e.into()),
            Err(_) => BreakerError::Timeout {
                circuit: self.name.clone(),
                timeout: config.timeout(),
            },
        };

        self.on_failure(elapsed, &error, &ctx);
        self.recover(error, &ctx, &config).await
    }

    /// Decide whether a call may run.
    fn admit(&self) -> Result<(), BreakerError> {
        let mut inner = self.inner.lock();
        let config = self.config.load_full();
        inner.metrics.total_requests += 1;

        if inner.pinned_open || config.force_open {
            let reason = if inner.pinned_open { "emergency pin" } else { "force_open override" };
            self.transition(&mut inner, &config, CircuitState::Open, reason, true);
            return Err(self.short_circuit(&mut inner, &config, CircuitState::Open));
        }
        if config.force_closed {
            self.transition(&mut inner, &config, CircuitState::Closed, "force_closed override", true);
            return Ok(());
        }

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if inner.state_changed_at.elapsed() < config.sleep_window() {
                    return Err(self.short_circuit(&mut inner, &config, CircuitState::Open));
                }
                self.transition(&mut inner, &config, CircuitState::HalfOpen, "sleep window elapsed", false);
                self.admit_trial(&mut inner, &config)
            }
            CircuitState::HalfOpen => self.admit_trial(&mut inner, &config),
        }
    }

    fn admit_trial(&self, inner: &mut Inner, config: &CircuitBreakerConfig) -> Result<(), BreakerError> {
        if inner.half_open_admitted < config.half_open_max_calls {
            inner.half_open_admitted += 1;
            Ok(())
        } else {
            Err(self.short_circuit(inner, config, CircuitState::HalfOpen))
        }
    }

    fn short_circuit(&self, inner: &mut Inner, config: &CircuitBreakerConfig, state: CircuitState) -> BreakerError {
        inner.metrics.short_circuited += 1;
        if config.enable_metrics {
            telemetry::record_request(&self.name, "short_circuited", "none", None);
        }
        tracing::debug!(circuit = %self.name, state = %state, "Call short-circuited");

        match state {
            CircuitState::HalfOpen => BreakerError::HalfOpenSaturated {
                circuit: self.name.clone(),
            },
            _ => BreakerError::Open {
                circuit: self.name.clone(),
            },
        }
    }

    fn on_success(&self, elapsed: Duration, ctx: &ExecutionContext) {
        let mut inner = self.inner.lock();
        let config = self.config.load_full();
        let response_time_ms = elapsed.as_secs_f64() * 1000.0;

        inner.window.record(Instant::now(), true, elapsed, None);
        inner.metrics.record_success(response_time_ms);

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= config.success_threshold {
                self.transition(&mut inner, &config, CircuitState::Closed, "trial calls succeeded", false);
            }
        }

        self.tune(&mut inner, &config);

        if config.enable_metrics {
            telemetry::record_request(&self.name, "success", "none", Some(elapsed.as_secs_f64()));
        }
        tracing::debug!(circuit = %self.name, response_time_ms, "Call succeeded");

        self.emit(
            CircuitEventKind::RequestSuccess { response_time_ms },
            Some(ctx.metadata()),
        );
    }

    fn on_failure(&self, elapsed: Duration, error: &BreakerError, ctx: &ExecutionContext) {
        let mut inner = self.inner.lock();
        let config = self.config.load_full();
        let response_time_ms = elapsed.as_secs_f64() * 1000.0;
        let kind = error.kind();
        let timed_out = matches!(error, BreakerError::Timeout { .. });

        inner.window.record(Instant::now(), false, elapsed, Some(kind));
        inner.metrics.record_failure(response_time_ms, timed_out);

        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, &config, CircuitState::Open, "trial call failed", false);
            }
            CircuitState::Closed if !config.force_closed => {
                let total = inner.window.total();
                let error_percentage = inner.window.error_percentage();
                if total >= config.request_volume_threshold as usize
                    && error_percentage >= config.error_threshold_percentage
                {
                    let reason = format!(
                        "error rate {:.1}% reached threshold {:.1}% over {} requests",
                        error_percentage, config.error_threshold_percentage, total
                    );
                    self.transition(&mut inner, &config, CircuitState::Open, &reason, false);
                }
            }
            _ => {}
        }

        self.tune(&mut inner, &config);

        if config.enable_metrics {
            telemetry::record_request(&self.name, "failure", kind.as_str(), Some(elapsed.as_secs_f64()));
        }
        tracing::debug!(
            circuit = %self.name,
            failure_type = kind.as_str(),
            error = %error,
            response_time_ms,
            "Call failed"
        );

        self.emit(
            CircuitEventKind::RequestFailure {
                failure_type: kind,
                error: error.to_string(),
                response_time_ms,
            },
            Some(ctx.metadata()),
        );
    }

    /// Walk the fallback chain; on exhaustion hand back the original error.
    async fn recover<T: 'static>(
        &self,
        error: BreakerError,
        ctx: &ExecutionContext,
        config: &CircuitBreakerConfig,
    ) -> Result<T, BreakerError> {
        if !config.fallback_enabled {
            return Err(error);
        }
        let chain = self.fallbacks.load_full();
        if chain.is_empty() {
            return Err(error);
        }

        self.inner.lock().metrics.fallback_calls += 1;

        let (result, success, strategy) = match chain.run::<T>(&self.name, &error, ctx, config.enable_metrics).await {
            FallbackOutcome::Recovered { strategy, value } => (Ok(value), true, Some(strategy)),
            FallbackOutcome::Exhausted => (Err(error), false, None),
        };

        self.emit(
            CircuitEventKind::FallbackExecuted { success, strategy },
            Some(ctx.metadata()),
        );
        result
    }

    fn transition(
        &self,
        inner: &mut Inner,
        config: &CircuitBreakerConfig,
        to: CircuitState,
        reason: &str,
        forced: bool,
    ) {
        let from = inner.state;
        if from == to {
            return;
        }

        let now = Instant::now();
        inner.state = to;
        inner.state_changed_at = now;
        inner.half_open_successes = 0;
        inner.half_open_admitted = 0;
        inner.state_changes += 1;

        match to {
            CircuitState::Open => {
                inner.last_trip = Some((now, now_millis()));
                tracing::warn!(circuit = %self.name, from = %from, reason, forced, "Circuit breaker OPEN");
            }
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.name, from = %from, reason, forced, "Circuit breaker HALF_OPEN");
            }
            CircuitState::Closed => {
                if let Some((tripped_at, _)) = inner.last_trip {
                    let recovery = now.duration_since(tripped_at);
                    inner.last_recovery = Some(recovery);
                    if config.enable_metrics {
                        telemetry::record_recovery(&self.name, recovery.as_secs_f64());
                    }
                }
                tracing::info!(circuit = %self.name, from = %from, reason, forced, "Circuit breaker CLOSED");
            }
        }

        if config.enable_metrics {
            telemetry::record_state_change(&self.name, from.as_str(), to.as_str());
            telemetry::record_state(&self.name, to.gauge_value());
        }

        self.emit(
            CircuitEventKind::StateChange {
                from,
                to,
                reason: reason.to_string(),
                forced,
            },
            None,
        );
    }

    /// Let the adaptive tuner move the trip threshold, once per rolling window at most.
    fn tune(&self, inner: &mut Inner, config: &CircuitBreakerConfig) {
        if !config.adaptive_thresholds {
            return;
        }
        if inner
            .last_tuned_at
            .is_some_and(|at| at.elapsed() < config.rolling_window())
        {
            return;
        }

        let observation = Observation {
            threshold: config.error_threshold_percentage,
            total_requests: inner.metrics.total_requests,
            window_error_percentage: inner.window.error_percentage(),
            consecutive_successes: inner.metrics.consecutive_successes,
        };
        let Some(proposal) = inner.tuner.propose(&config.adaptive, observation) else {
            return;
        };

        let mut next = config.clone();
        next.error_threshold_percentage = proposal.new;
        self.config.store(Arc::new(next));
        inner.last_tuned_at = Some(Instant::now());

        if config.enable_metrics {
            telemetry::record_threshold(&self.name, proposal.new);
            telemetry::record_threshold_adjustment(&self.name, proposal.direction.as_str());
        }

        if !proposal.is_significant() {
            tracing::debug!(circuit = %self.name, old = proposal.old, new = proposal.new, "Threshold nudged");
            return;
        }

        let adjustment = inner.tuner.record(now_millis(), &proposal);
        tracing::info!(
            circuit = %self.name,
            old = adjustment.old,
            new = adjustment.new,
            reason = %adjustment.reason,
            "Error threshold adjusted"
        );
        self.emit(
            CircuitEventKind::ThresholdAdjusted {
                old: adjustment.old,
                new: adjustment.new,
                reason: adjustment.reason,
            },
            None,
        );
    }

    fn emit(&self, kind: CircuitEventKind, metadata: Option<serde_json::Value>) {
        self.events.emit(CircuitEvent::new(&self.name, kind, metadata));
    }

    // --- Administration ---

    /// Move to `state` immediately, bypassing every rule.
    pub fn force_state(&self, state: CircuitState, reason: &str) {
        let mut inner = self.inner.lock();
        let config = self.config.load_full();
        tracing::warn!(circuit = %self.name, to = %state, reason, "Forcing circuit state");
        self.transition(&mut inner, &config, state, reason, true);
    }

    /// Hold the breaker OPEN until [`unpin`](Self::unpin), whatever the config says.
    pub fn pin_open(&self, reason: &str) {
        let mut inner = self.inner.lock();
        let config = self.config.load_full();
        inner.pinned_open = true;
        tracing::warn!(circuit = %self.name, reason, "Circuit pinned open");
        self.transition(&mut inner, &config, CircuitState::Open, reason, true);
    }

    /// Release an emergency pin. The state is left as it is.
    pub fn unpin(&self, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        let was_pinned = std::mem::replace(&mut inner.pinned_open, false);
        if was_pinned {
            tracing::warn!(circuit = %self.name, reason, "Circuit pin released");
        }
        was_pinned
    }

    pub fn is_pinned_open(&self) -> bool {
        self.inner.lock().pinned_open
    }

    /// Hot-patch the configuration. The name cannot change.
    pub fn update_config(&self, patch: &CircuitBreakerConfigPatch) -> Result<(), Vec<ValidationError>> {
        let mut inner = self.inner.lock();
        let current = self.config.load_full();
        let next = current.patched(patch);
        validate_circuit(&next)?;

        if next.rolling_window_size_ms != current.rolling_window_size_ms {
            inner.window.set_horizon(next.rolling_window());
            inner.window.prune(Instant::now());
        }
        if next.enable_metrics {
            telemetry::record_threshold(&self.name, next.error_threshold_percentage);
        }
        self.health.set_metrics_enabled(next.enable_metrics);

        self.config.store(Arc::new(next));
        tracing::info!(circuit = %self.name, "Circuit configuration updated");
        Ok(())
    }

    /// Zero every counter and empty the window. State is kept.
    pub fn reset_metrics(&self) {
        let mut inner = self.inner.lock();
        inner.metrics = CircuitMetrics::default();
        inner.window.clear();
        tracing::info!(circuit = %self.name, "Circuit metrics reset");
    }

    /// Append a fallback strategy; the chain stays sorted by priority.
    pub fn add_fallback_strategy(&self, strategy: Arc<dyn FallbackStrategy>) {
        tracing::debug!(circuit = %self.name, strategy = %strategy.name(), "Fallback strategy added");
        self.fallbacks.rcu(|chain| {
            let mut next = FallbackChain::clone(chain);
            next.add(strategy.clone());
            next
        });
    }

    /// Register a periodic health probe for this breaker.
    pub fn add_health_check(&self, check: HealthCheck) {
        self.health.add(check);
    }

    /// The breaker's health check runner.
    pub fn health(&self) -> &Arc<HealthCheckRunner> {
        &self.health
    }

    /// Weighted result of the most recent health probes.
    pub fn health_status(&self) -> BreakerHealth {
        self.health.report()
    }

    /// Cumulative counters.
    pub fn metrics(&self) -> CircuitMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Recorded threshold adjustments, oldest first.
    pub fn threshold_history(&self) -> Vec<ThresholdAdjustment> {
        self.inner.lock().tuner.history().to_vec()
    }

    /// Point-in-time view of state, counters and window.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.inner.lock();
        let config = self.config.load_full();
        inner.window.prune(Instant::now());

        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            time_in_state_ms: inner.state_changed_at.elapsed().as_millis() as u64,
            error_threshold_percentage: config.error_threshold_percentage,
            metrics: inner.metrics.clone(),
            window_requests: inner.window.total(),
            window_error_percentage: inner.window.error_percentage(),
            window_average_response_time_ms: inner
                .window
                .average_response_time()
                .map(|d| d.as_secs_f64() * 1000.0),
            half_open_successes: inner.half_open_successes,
            pinned_open: inner.pinned_open,
            state_changes: inner.state_changes,
            last_trip_at: inner.last_trip.map(|(_, at)| at),
            last_recovery_ms: inner.last_recovery.map(|d| d.as_millis() as u64),
            threshold_adjustments: inner.tuner.history().len(),
            confidence_interval: config.adaptive.confidence_interval,
            fallback_strategies: self
                .fallbacks
                .load()
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}
