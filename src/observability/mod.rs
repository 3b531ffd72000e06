//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, health runners and the manager produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Alerting pipelines subscribe to the circuit event stream directly
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments) and no-ops without a recorder
//! - Per-breaker `enable_metrics` switches recording off entirely

pub mod logging;
pub mod metrics;
