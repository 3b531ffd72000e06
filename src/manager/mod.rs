//! Registry and coordinator for many circuit breakers.
//!
//! # Data Flow
//! ```text
//! create_circuit_breaker(config) → breakers (DashMap)
//!     every breaker forwards its events to the manager's broadcast channel
//!
//! register_service_dependency(dep) → dependencies (DashMap)
//!
//! get_system_health():
//!     per dependency: run its probe, read its breaker state
//!     → system_health.rs (criticality-weighted score)
//!     → gauge + log + last_system_health
//!
//! emergency_open_all / recovery_close_all:
//!     pin / unpin every breaker + forced transition
//! ```
//!
//! # Design Decisions
//! - Breakers are shared as `Arc<CircuitBreaker>`; callers hold them directly
//! - Dependency probes run concurrently on every poll
//! - A config reload patches existing breakers in place and never drops one
//! - Emergency pins are not config, so a reload leaves them in place

pub mod dependency;
pub mod system_health;

pub use dependency::ServiceDependency;
pub use system_health::{DependencyHealth, DependencyStatus, SystemHealth, SYSTEM_HEALTHY_SCORE};

use std::future::Future;
use std::sync::Arc;
use arc_swap::ArcSwapOption;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::validation::{validate_config, ValidationError};
use crate::config::{CircuitBreakerConfig, CircuitBreakerConfigPatch, HealthConfig, ResilienceConfig};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::events::{now_millis, CircuitEvent, EVENT_CHANNEL_CAPACITY};
use crate::resilience::{BoxError, BreakerError, CircuitBreaker, CircuitSnapshot, CircuitState, ExecutionContext};

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("circuit breaker '{0}' already exists")]
    AlreadyExists(String),

    #[error("unknown circuit breaker '{0}'")]
    UnknownCircuit(String),

    #[error("invalid config for circuit '{circuit}': {}", join_errors(.errors))]
    InvalidConfig {
        circuit: String,
        errors: Vec<ValidationError>,
    },

    #[error("invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

type BoxedOperation<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, BoxError>> + Send>;

/// One call in a batch, addressed to a breaker by name.
pub struct CircuitOperation<T> {
    pub circuit: String,
    pub context: ExecutionContext,
    operation: BoxedOperation<T>,
}

impl<T: Send + 'static> CircuitOperation<T> {
    pub fn new<E, F, Fut>(circuit: impl Into<String>, operation: F) -> Self
    where
        E: Into<BoxError>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            circuit: circuit.into(),
            context: ExecutionContext::new(),
            operation: Box::new(move || Box::pin(async move { operation().await.map_err(Into::into) })),
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }
}

/// Result of one call in a batch.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub circuit: String,
    pub result: Result<T, BreakerError>,
}

/// Number of breakers in each state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// Snapshot of every breaker plus the last system health poll.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub total_circuits: usize,
    pub state_summary: StateSummary,
    pub circuits: Vec<CircuitSnapshot>,
    pub dependencies: usize,
    pub last_system_health: Option<SystemHealth>,
}

/// Registry of named breakers and service dependencies.
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    dependencies: DashMap<String, ServiceDependency>,
    events: broadcast::Sender<CircuitEvent>,
    health_config: HealthConfig,
    last_health: ArcSwapOption<SystemHealth>,
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerManager {
    pub fn new() -> Self {
        Self::with_health_config(HealthConfig::default())
    }

    pub fn with_health_config(health_config: HealthConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            breakers: DashMap::new(),
            dependencies: DashMap::new(),
            events,
            health_config,
            last_health: ArcSwapOption::empty(),
        }
    }

    /// Build a manager with every circuit and dependency in `config`.
    pub fn from_config(config: &ResilienceConfig) -> Result<Self, Vec<ManagerError>> {
        let manager = Self::with_health_config(config.health.clone());
        manager.apply_config(config)?;
        Ok(manager)
    }

    /// Events from every managed breaker.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    /// Create and register a breaker. Names are unique.
    pub fn create_circuit_breaker(&self, config: CircuitBreakerConfig) -> Result<Arc<CircuitBreaker>, ManagerError> {
        match self.breakers.entry(config.name.clone()) {
            Entry::Occupied(entry) => Err(ManagerError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let circuit = config.name.clone();
                let breaker = CircuitBreaker::builder(config)
                    .event_upstream(self.events.clone())
                    .health_defaults(self.health_config.clone())
                    .build()
                    .map_err(|errors| ManagerError::InvalidConfig { circuit, errors })?;
                let breaker = Arc::new(breaker);
                entry.insert(Arc::clone(&breaker));
                Ok(breaker)
            }
        }
    }

    pub fn get_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Registered breaker names, sorted.
    pub fn circuit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|b| b.key().clone()).collect();
        names.sort();
        names
    }

    fn all_breakers(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut breakers: Vec<_> = self.breakers.iter().map(|b| Arc::clone(b.value())).collect();
        breakers.sort_by(|a, b| a.name().cmp(b.name()));
        breakers
    }

    /// Track a dependency for system health. Its breaker must exist.
    pub fn register_service_dependency(&self, dependency: ServiceDependency) -> Result<(), ManagerError> {
        if !self.breakers.contains_key(&dependency.circuit) {
            return Err(ManagerError::UnknownCircuit(dependency.circuit));
        }
        tracing::info!(
            dependency = %dependency.name,
            circuit = %dependency.circuit,
            criticality = dependency.criticality.as_str(),
            "Service dependency registered"
        );
        self.dependencies.insert(dependency.name.clone(), dependency);
        Ok(())
    }

    /// Probe every dependency and compute the weighted system score.
    pub async fn get_system_health(&self) -> SystemHealth {
        let mut dependencies: Vec<ServiceDependency> = self.dependencies.iter().map(|d| d.value().clone()).collect();
        dependencies.sort_by(|a, b| a.name.cmp(&b.name));

        let statuses = join_all(dependencies.iter().map(|dep| self.dependency_status(dep))).await;
        let health = SystemHealth::aggregate(statuses, now_millis());

        metrics::record_system_health(health.score);
        if health.healthy {
            tracing::info!(score = health.score, dependencies = health.dependencies.len(), "System healthy");
        } else {
            tracing::warn!(
                score = health.score,
                critical_down = health.critical_down,
                dependencies = health.dependencies.len(),
                "System unhealthy"
            );
        }

        self.last_health.store(Some(Arc::new(health.clone())));
        health
    }

    async fn dependency_status(&self, dep: &ServiceDependency) -> DependencyStatus {
        let Some(breaker) = self.get_circuit_breaker(&dep.circuit) else {
            return DependencyStatus::new(&dep.name, &dep.circuit, dep.criticality, false, CircuitState::Open, false);
        };

        let check_passed = match &dep.health_check {
            Some(check) => match time::timeout(breaker.health().timeout_for(check), check.probe.check()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(dependency = %dep.name, check = %check.name, error = %e, "Dependency health check failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(dependency = %dep.name, check = %check.name, "Dependency health check failed: timeout");
                    false
                }
            },
            None => breaker.health_status().healthy,
        };

        DependencyStatus::new(
            &dep.name,
            &dep.circuit,
            dep.criticality,
            check_passed,
            breaker.state(),
            dep.fallback_available,
        )
    }

    /// Result of the most recent `get_system_health` call.
    pub fn last_system_health(&self) -> Option<Arc<SystemHealth>> {
        self.last_health.load_full()
    }

    /// Run each operation through its named breaker, concurrently.
    ///
    /// Outcomes are returned in input order; an unknown circuit fails only its own call.
    pub async fn execute_with_multiple_circuits<T: Send + 'static>(
        &self,
        operations: Vec<CircuitOperation<T>>,
    ) -> Vec<BatchOutcome<T>> {
        join_all(operations.into_iter().map(|op| async move {
            let CircuitOperation {
                circuit,
                context,
                operation,
            } = op;
            let result = match self.get_circuit_breaker(&circuit) {
                Some(breaker) => breaker.execute_with_context(context, operation).await,
                None => Err(BreakerError::UnknownCircuit(circuit.clone())),
            };
            BatchOutcome { circuit, result }
        }))
        .await
    }

    /// Force every breaker OPEN and pin it there until `recovery_close_all`.
    ///
    /// The pin overrides `force_closed` and survives `apply_config`.
    pub fn emergency_open_all(&self, reason: &str) -> usize {
        let breakers = self.all_breakers();
        tracing::warn!(reason, circuits = breakers.len(), "Emergency open of all circuits");

        for breaker in &breakers {
            breaker.pin_open(reason);
        }
        breakers.len()
    }

    /// Release every emergency pin and force every breaker CLOSED.
    ///
    /// A `force_open` set in the config still applies on the next call.
    pub fn recovery_close_all(&self, reason: &str) -> usize {
        let breakers = self.all_breakers();
        tracing::warn!(reason, circuits = breakers.len(), "Recovery close of all circuits");

        for breaker in &breakers {
            breaker.unpin(reason);
            breaker.force_state(CircuitState::Closed, reason);
        }
        breakers.len()
    }

    /// Snapshot every breaker with a per-state count.
    pub fn system_status(&self) -> SystemStatus {
        let circuits: Vec<CircuitSnapshot> = self.all_breakers().iter().map(|b| b.snapshot()).collect();

        let mut state_summary = StateSummary::default();
        for snapshot in &circuits {
            match snapshot.state {
                CircuitState::Closed => state_summary.closed += 1,
                CircuitState::Open => state_summary.open += 1,
                CircuitState::HalfOpen => state_summary.half_open += 1,
            }
        }

        SystemStatus {
            total_circuits: circuits.len(),
            state_summary,
            circuits,
            dependencies: self.dependencies.len(),
            last_system_health: self.last_system_health().map(|h| SystemHealth::clone(&h)),
        }
    }

    /// Create missing breakers, hot-patch existing ones and (re)register dependencies.
    ///
    /// A config that fails validation is rejected whole. Otherwise every entry
    /// is attempted and all failures are returned together. Emergency pins
    /// and the health section in effect at construction are kept.
    pub fn apply_config(&self, config: &ResilienceConfig) -> Result<(), Vec<ManagerError>> {
        if let Err(errors) = validate_config(config) {
            tracing::error!(errors = %join_errors(&errors), "Configuration rejected");
            return Err(vec![ManagerError::Validation(errors)]);
        }

        let mut errors = Vec::new();

        for circuit in &config.circuits {
            let result = match self.get_circuit_breaker(&circuit.name) {
                Some(breaker) => breaker
                    .update_config(&CircuitBreakerConfigPatch::from_config(circuit))
                    .map_err(|errors| ManagerError::InvalidConfig {
                        circuit: circuit.name.clone(),
                        errors,
                    }),
                None => self.create_circuit_breaker(circuit.clone()).map(|_| ()),
            };
            if let Err(e) = result {
                errors.push(e);
            }
        }

        for dep_config in &config.dependencies {
            let mut dependency = ServiceDependency::from(dep_config);
            if let Some(existing) = self.dependencies.get(&dependency.name) {
                dependency.health_check = existing.health_check.clone();
            }
            if let Err(e) = self.register_service_dependency(dependency) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            tracing::info!(
                circuits = config.circuits.len(),
                dependencies = config.dependencies.len(),
                "Configuration applied"
            );
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Start every breaker's health checks and the periodic system health poll.
    pub fn spawn_monitoring(self: &Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self
            .all_breakers()
            .iter()
            .flat_map(|breaker| breaker.health().spawn(shutdown))
            .collect();

        let manager = Arc::clone(self);
        let rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move { manager.poll_system_health(rx).await }));
        handles
    }

    async fn poll_system_health(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let interval = self.health_config.system_poll_interval();
        tracing::info!(interval_ms = interval.as_millis() as u64, "System health monitor starting");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.get_system_health().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("System health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
