//! Active health checking.
//!
//! # Responsibilities
//! - Run each registered probe on its own interval, bounded by its timeout
//! - Keep the latest result per check
//! - Fold results into a weighted 0-100 score for the owning breaker

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthConfig;
use crate::health::state::CheckStatus;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::error::BoxError;
use crate::resilience::events::now_millis;

/// Score at or above which a breaker counts as healthy.
pub const HEALTHY_SCORE: f64 = 70.0;

/// A liveness probe for one dependency.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(())` when the dependency is alive.
    async fn check(&self) -> Result<(), BoxError>;
}

struct FnProbe<F>(F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn check(&self) -> Result<(), BoxError> {
        if (self.0)().await {
            Ok(())
        } else {
            Err("check reported unhealthy".into())
        }
    }
}

/// A named, weighted probe with its own schedule.
///
/// An unset interval or timeout falls back to the runner's [`HealthConfig`].
#[derive(Clone)]
pub struct HealthCheck {
    pub name: String,
    pub probe: Arc<dyn HealthProbe>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub weight: f64,
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("weight", &self.weight)
            .finish()
    }
}

impl HealthCheck {
    /// Weight 1, interval and timeout taken from the runner's defaults.
    pub fn new(name: impl Into<String>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            name: name.into(),
            probe,
            interval: None,
            timeout: None,
            weight: 1.0,
        }
    }

    /// Build a check from an async closure returning `true` when healthy.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::new(name, Arc::new(FnProbe(f)))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Latest result of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub weight: f64,
    #[serde(flatten)]
    pub status: CheckStatus,
}

/// Weighted health of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerHealth {
    pub circuit: String,
    /// Weight-averaged pass rate, 0-100.
    pub score: f64,
    pub healthy: bool,
    pub checks: Vec<CheckReport>,
}

struct Entry {
    check: HealthCheck,
    status: Mutex<CheckStatus>,
}

/// Runs a breaker's health checks.
pub struct HealthCheckRunner {
    circuit: String,
    defaults: HealthConfig,
    /// Mirrors the owning breaker's `enable_metrics`.
    metrics_enabled: AtomicBool,
    entries: RwLock<Vec<Arc<Entry>>>,
}

impl HealthCheckRunner {
    pub fn new(circuit: &str) -> Self {
        Self::with_defaults(circuit, HealthConfig::default())
    }

    /// Runner whose checks default to `defaults.interval()` / `defaults.timeout()`.
    pub fn with_defaults(circuit: &str, defaults: HealthConfig) -> Self {
        Self {
            circuit: circuit.to_string(),
            defaults,
            metrics_enabled: AtomicBool::new(true),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Turn the health check gauge on or off.
    pub fn set_metrics_enabled(&self, enabled: bool) {
        self.metrics_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled.load(Ordering::Relaxed)
    }

    /// Effective probe interval of `check`.
    pub fn interval_for(&self, check: &HealthCheck) -> Duration {
        check.interval.unwrap_or_else(|| self.defaults.interval())
    }

    /// Effective probe timeout of `check`.
    pub fn timeout_for(&self, check: &HealthCheck) -> Duration {
        check.timeout.unwrap_or_else(|| self.defaults.timeout())
    }

    /// Register a check. A check with the same name is replaced.
    pub fn add(&self, check: HealthCheck) {
        tracing::debug!(circuit = %self.circuit, check = %check.name, "Health check registered");
        let entry = Arc::new(Entry {
            check,
            status: Mutex::new(CheckStatus::default()),
        });
        let mut entries = self.entries.write();
        entries.retain(|e| e.check.name != entry.check.name);
        entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Probe every check once, concurrently, and report.
    pub async fn run_once(&self) -> BreakerHealth {
        let entries = self.entries.read().clone();
        join_all(entries.iter().map(|entry| self.probe(entry))).await;
        self.report()
    }

    async fn probe(&self, entry: &Entry) -> bool {
        let check = &entry.check;
        let timeout = self.timeout_for(check);
        let result = time::timeout(timeout, check.probe.check()).await;
        let at = now_millis();

        let passed = match result {
            Ok(Ok(())) => {
                entry.status.lock().record_success(at);
                true
            }
            Ok(Err(e)) => {
                let failures = {
                    let mut status = entry.status.lock();
                    status.record_failure(at, e.to_string());
                    status.consecutive_failures
                };
                tracing::warn!(
                    circuit = %self.circuit,
                    check = %check.name,
                    error = %e,
                    consecutive_failures = failures,
                    "Health check failed"
                );
                false
            }
            Err(_) => {
                let failures = {
                    let mut status = entry.status.lock();
                    status.record_failure(at, format!("timed out after {}ms", timeout.as_millis()));
                    status.consecutive_failures
                };
                tracing::warn!(
                    circuit = %self.circuit,
                    check = %check.name,
                    timeout_ms = timeout.as_millis() as u64,
                    consecutive_failures = failures,
                    "Health check failed: timeout"
                );
                false
            }
        };

        if self.metrics_enabled() {
            metrics::record_health_check(&self.circuit, &check.name, passed);
        }
        passed
    }

    /// Score the latest results without probing.
    pub fn report(&self) -> BreakerHealth {
        let entries = self.entries.read();
        let checks: Vec<CheckReport> = entries
            .iter()
            .map(|entry| CheckReport {
                name: entry.check.name.clone(),
                weight: entry.check.weight,
                status: entry.status.lock().clone(),
            })
            .collect();

        let score = weighted_score(&checks);
        BreakerHealth {
            circuit: self.circuit.clone(),
            score,
            healthy: score >= HEALTHY_SCORE,
            checks,
        }
    }

    /// Start one probe loop per registered check. Loops stop on shutdown.
    ///
    /// Checks added afterwards are not scheduled until the next call.
    pub fn spawn(self: &Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let entries = self.entries.read().clone();
        entries
            .into_iter()
            .map(|entry| {
                let runner = Arc::clone(self);
                let rx = shutdown.subscribe();
                tokio::spawn(async move { runner.run_check(entry, rx).await })
            })
            .collect()
    }

    async fn run_check(self: Arc<Self>, entry: Arc<Entry>, mut shutdown: broadcast::Receiver<()>) {
        let interval = self.interval_for(&entry.check);
        tracing::info!(
            circuit = %self.circuit,
            check = %entry.check.name,
            interval_ms = interval.as_millis() as u64,
            "Health check loop starting"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe(&entry).await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!(circuit = %self.circuit, check = %entry.check.name, "Health check loop exiting");
                    break;
                }
            }
        }
    }
}

/// Weight-averaged pass rate over checks that have run. 100 when none have.
fn weighted_score(checks: &[CheckReport]) -> f64 {
    let (passed, total) = checks
        .iter()
        .filter_map(|c| c.status.last_passed.map(|p| (p, c.weight)))
        .fold((0.0, 0.0), |(passed, total), (p, weight)| {
            (if p { passed + weight } else { passed }, total + weight)
        });

    if total <= 0.0 {
        return 100.0;
    }
    passed / total * 100.0
}
