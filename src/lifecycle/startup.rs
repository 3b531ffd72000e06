//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging, then metrics
//! - Build the manager from a validated config
//! - Start background tasks (health checks, system health poll)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::loader::ConfigError;
use crate::config::{ObservabilityConfig, ResilienceConfig};
use crate::lifecycle::Shutdown;
use crate::manager::{CircuitBreakerManager, ManagerError};
use crate::observability::{logging, metrics};

/// Error type for startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging init failed: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("Invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("Metrics init failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Manager setup failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Manager(Vec<ManagerError>),
}

/// Install the tracing subscriber and, when enabled, the Prometheus exporter.
pub fn init_observability(config: &ObservabilityConfig) -> Result<(), StartupError> {
    logging::init_logging(config)?;

    if config.metrics_enabled {
        let addr: SocketAddr = config
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }
    Ok(())
}

/// A running manager with its background tasks.
pub struct Runtime {
    pub manager: Arc<CircuitBreakerManager>,
    pub shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build the manager from `config` and start monitoring.
    ///
    /// Observability must already be initialized.
    pub fn start(config: &ResilienceConfig) -> Result<Self, StartupError> {
        let manager = Arc::new(CircuitBreakerManager::from_config(config).map_err(StartupError::Manager)?);
        let shutdown = Shutdown::new();
        let tasks = manager.spawn_monitoring(&shutdown);

        tracing::info!(
            circuits = config.circuits.len(),
            dependencies = config.dependencies.len(),
            tasks = tasks.len(),
            "Resilience runtime started"
        );

        Ok(Self {
            manager,
            shutdown,
            tasks,
        })
    }

    /// Signal shutdown and wait up to `grace` for background tasks.
    pub async fn stop(self, grace: Duration) {
        self.shutdown.trigger();
        if tokio::time::timeout(grace, join_all(self.tasks)).await.is_err() {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "Background tasks did not stop in time");
        } else {
            tracing::info!("Resilience runtime stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;

    #[tokio::test]
    async fn test_start_and_stop() {
        let config = ResilienceConfig {
            circuits: vec![CircuitBreakerConfig::named("db")],
            ..Default::default()
        };
        let runtime = Runtime::start(&config).unwrap();
        assert!(runtime.manager.get_circuit_breaker("db").is_some());
        runtime.stop(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_bad_metrics_address() {
        let config = ObservabilityConfig {
            metrics_address: "not-an-address".to_string(),
            ..Default::default()
        };
        // logging may already be installed by another test; either way the address is rejected or logging fails first
        assert!(init_observability(&config).is_err());
    }
}
