//! Fallback strategies and the ordered chain that runs them.
//!
//! # Chain semantics
//! ```text
//! strategies sorted ascending by priority
//!     → condition(error, ctx) false   → skip
//!     → execute (own timeout, retries) → first success wins
//!     → all skipped or failed          → caller gets the ORIGINAL error
//! ```
//!
//! Strategies return type-erased values ([`FallbackValue`]); the chain downcasts
//! to the type the protected call returns and treats a mismatch as a failed
//! attempt.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use uuid::Uuid;

use crate::observability::metrics;
use crate::resilience::error::{BoxError, BreakerError};
use crate::resilience::retries::{retry_with_backoff, AttemptError};

/// Value produced by a fallback strategy.
pub type FallbackValue = Box<dyn Any + Send>;

/// Per-call data handed through to fallback strategies.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Correlates the call's events.
    pub request_id: Uuid,
    /// Free-form caller context; attached to request events as metadata.
    pub attributes: serde_json::Value,
    /// Payload a fallback may return in place of the primary result.
    pub fallback_data: Option<serde_json::Value>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attributes: serde_json::Value::Null,
            fallback_data: None,
        }
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_fallback_data(mut self, data: serde_json::Value) -> Self {
        self.fallback_data = Some(data);
        self
    }

    /// Event metadata for this call.
    pub(crate) fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "request_id": self.request_id.to_string(),
            "context": self.attributes,
        })
    }
}

/// A recovery path tried when the protected call fails or is short-circuited.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32;

    /// Whether this strategy applies to `error`. Defaults to always.
    fn condition(&self, _error: &BreakerError, _ctx: &ExecutionContext) -> bool {
        true
    }

    /// Per-attempt deadline.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Extra attempts after the first failure.
    fn max_retries(&self) -> u32 {
        0
    }

    async fn execute(&self, error: &BreakerError, ctx: &ExecutionContext) -> Result<FallbackValue, BoxError>;
}

/// What the chain produced.
#[derive(Debug)]
pub enum FallbackOutcome<T> {
    Recovered { strategy: String, value: T },
    Exhausted,
}

/// Strategies ordered by ascending priority.
#[derive(Clone, Default)]
pub struct FallbackChain {
    strategies: Vec<Arc<dyn FallbackStrategy>>,
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping priority order; equal priorities keep insertion order.
    pub fn add(&mut self, strategy: Arc<dyn FallbackStrategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority());
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Strategy names in the order they will be tried.
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order until one yields a `T`.
    pub async fn run<T: 'static>(
        &self,
        circuit: &str,
        error: &BreakerError,
        ctx: &ExecutionContext,
        record_metrics: bool,
    ) -> FallbackOutcome<T> {
        for strategy in &self.strategies {
            let name = strategy.name();
            let outcome = if !strategy.condition(error, ctx) {
                tracing::debug!(circuit = %circuit, strategy = %name, "Fallback condition not met, skipping");
                "skipped"
            } else {
                let attempt = retry_with_backoff(strategy.max_retries(), strategy.timeout(), || {
                    strategy.execute(error, ctx)
                })
                .await;

                match attempt {
                    Ok(value) => match value.downcast::<T>() {
                        Ok(value) => {
                            if record_metrics {
                                metrics::record_fallback_attempt(circuit, name, "success");
                            }
                            tracing::info!(circuit = %circuit, strategy = %name, "Fallback recovered call");
                            return FallbackOutcome::Recovered {
                                strategy: name.to_string(),
                                value: *value,
                            };
                        }
                        Err(_) => {
                            tracing::warn!(
                                circuit = %circuit,
                                strategy = %name,
                                expected = std::any::type_name::<T>(),
                                "Fallback returned a value of the wrong type"
                            );
                            "type_mismatch"
                        }
                    },
                    Err(AttemptError::TimedOut) => {
                        tracing::warn!(circuit = %circuit, strategy = %name, "Fallback timed out");
                        "timeout"
                    }
                    Err(AttemptError::Failed(e)) => {
                        tracing::warn!(circuit = %circuit, strategy = %name, error = %e, "Fallback failed");
                        "failure"
                    }
                }
            };

            if record_metrics {
                metrics::record_fallback_attempt(circuit, name, outcome);
            }
        }

        FallbackOutcome::Exhausted
    }
}

type Condition = Arc<dyn Fn(&BreakerError, &ExecutionContext) -> bool + Send + Sync>;
type Handler =
    Arc<dyn Fn(&BreakerError, &ExecutionContext) -> BoxFuture<'static, Result<FallbackValue, BoxError>> + Send + Sync>;

/// Closure-backed strategy.
///
/// ```rust,ignore
/// let cached = FnFallback::new("cache", 1, |_err, _ctx| async { Ok::<_, BoxError>(42u32) })
///     .with_condition(|err, _ctx| err.is_short_circuit())
///     .with_timeout(Duration::from_millis(50));
/// ```
pub struct FnFallback {
    name: String,
    priority: i32,
    timeout: Option<Duration>,
    max_retries: u32,
    condition: Option<Condition>,
    handler: Handler,
}

impl FnFallback {
    pub fn new<T, F, Fut>(name: impl Into<String>, priority: i32, f: F) -> Self
    where
        T: Send + 'static,
        F: Fn(&BreakerError, &ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |error: &BreakerError, ctx: &ExecutionContext| {
            let fut = f(error, ctx);
            async move { fut.await.map(|v| Box::new(v) as FallbackValue) }.boxed()
        });

        Self {
            name: name.into(),
            priority,
            timeout: None,
            max_retries: 0,
            condition: None,
            handler,
        }
    }

    pub fn with_condition<C>(mut self, condition: C) -> Self
    where
        C: Fn(&BreakerError, &ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl FallbackStrategy for FnFallback {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn condition(&self, error: &BreakerError, ctx: &ExecutionContext) -> bool {
        self.condition.as_ref().map_or(true, |c| c(error, ctx))
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn execute(&self, error: &BreakerError, ctx: &ExecutionContext) -> Result<FallbackValue, BoxError> {
        (self.handler)(error, ctx).await
    }
}

/// Returns a fixed value.
pub struct StaticFallback<T> {
    name: String,
    priority: i32,
    value: T,
}

impl<T: Clone + Send + Sync + 'static> StaticFallback<T> {
    pub fn new(name: impl Into<String>, priority: i32, value: T) -> Self {
        Self {
            name: name.into(),
            priority,
            value,
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> FallbackStrategy for StaticFallback<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self, _error: &BreakerError, _ctx: &ExecutionContext) -> Result<FallbackValue, BoxError> {
        Ok(Box::new(self.value.clone()))
    }
}

/// Returns the call's `fallback_data` as a `serde_json::Value`.
///
/// Only applies to calls that carry fallback data and whose protected
/// operation returns `serde_json::Value`.
pub struct FallbackDataStrategy {
    priority: i32,
}

impl FallbackDataStrategy {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }
}

#[async_trait]
impl FallbackStrategy for FallbackDataStrategy {
    fn name(&self) -> &str {
        "fallback_data"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn condition(&self, _error: &BreakerError, ctx: &ExecutionContext) -> bool {
        ctx.fallback_data.is_some()
    }

    async fn execute(&self, _error: &BreakerError, ctx: &ExecutionContext) -> Result<FallbackValue, BoxError> {
        ctx.fallback_data
            .clone()
            .map(|v| Box::new(v) as FallbackValue)
            .ok_or_else(|| "no fallback data on this call".into())
    }
}
