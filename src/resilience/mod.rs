//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! CircuitBreaker::execute(op):
//!     → circuit_breaker/ (admission: CLOSED / OPEN / HALF_OPEN)
//!     → timeouts.rs (race op against timeout_ms, cancel on expiry)
//!     → window.rs (record outcome in the rolling window)
//!     → adaptive.rs (nudge the trip threshold)
//!     → On failure or short-circuit: fallback.rs
//!         → retries.rs + backoff.rs (per-strategy attempts)
//!     → events.rs (broadcast every outcome and transition)
//! ```
//!
//! # Design Decisions
//! - Every guarded call has a deadline
//! - Fallback values are type-erased and checked against the caller's type
//! - Failure classification is the caller's job, via `ClassifiedError`

pub mod adaptive;
pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod events;
pub mod fallback;
pub mod retries;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerBuilder, CircuitMetrics, CircuitSnapshot, CircuitState};
pub use error::{BoxError, BreakerError, ClassifiedError, FailureKind};
pub use events::{CircuitEvent, CircuitEventKind};
pub use fallback::{ExecutionContext, FallbackStrategy, FnFallback, StaticFallback, FallbackDataStrategy};
