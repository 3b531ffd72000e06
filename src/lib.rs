//! Adaptive circuit breakers and resilience coordination.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──execute(op)──▶ ┌───────────────────────────────────────────┐
//!                           │              CircuitBreaker               │
//!                           │  admission ─▶ timeout race ─▶ window      │
//!                           │      │                          │         │
//!                           │      ▼                          ▼         │
//!                           │  fallback chain         adaptive tuner    │
//!                           │      │                                    │
//!                           │  events ──────────────┐   health runner   │
//!                           └───────────────────────┼───────────────────┘
//!                                                   ▼
//!                           ┌───────────────────────────────────────────┐
//!                           │          CircuitBreakerManager            │
//!                           │  registry · dependencies · system health  │
//!                           │  batch execute · emergency open / close   │
//!                           └───────────────────────────────────────────┘
//!
//!   Cross-cutting: config (TOML + hot reload), observability (tracing,
//!   Prometheus), lifecycle (startup, signals, shutdown)
//! ```

// Core
pub mod resilience;
pub mod health;
pub mod manager;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigPatch, Criticality, ResilienceConfig};
pub use health::{HealthCheck, HealthProbe};
pub use lifecycle::Shutdown;
pub use manager::{CircuitBreakerManager, CircuitOperation, ServiceDependency, SystemHealth};
pub use resilience::{
    BreakerError, CircuitBreaker, CircuitEvent, CircuitState, ClassifiedError, ExecutionContext,
    FailureKind, FallbackStrategy,
};
