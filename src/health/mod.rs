//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Per breaker (active.rs):
//!     One timer per registered HealthCheck
//!     → race probe against its timeout
//!     → Update state.rs
//!     → gauge + warn! on failure
//!
//! Reporting:
//!     HealthCheckRunner::report()
//!     → weight-averaged pass rate (0-100), healthy at >= 70
//! ```
//!
//! # Design Decisions
//! - Health is a signal independent of circuit state; probes never trip a breaker
//! - Checks that have not completed yet do not count against the score
//! - Each check runs on its own interval so a slow probe cannot starve others

pub mod active;
pub mod state;

pub use active::{BreakerHealth, CheckReport, HealthCheck, HealthCheckRunner, HealthProbe, HEALTHY_SCORE};
pub use state::CheckStatus;
