//! Breaker error types and failure classification.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error returned by protected operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure taxonomy.
///
/// The breaker itself only detects `Timeout` and `Error`. The other kinds are
/// hints a caller attaches with [`ClassifiedError`] so that metrics and fallback
/// conditions can tell failures apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    Error,
    RateLimit,
    Dependency,
    Resource,
    Custom,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Error => "ERROR",
            FailureKind::RateLimit => "RATE_LIMIT",
            FailureKind::Dependency => "DEPENDENCY",
            FailureKind::Resource => "RESOURCE",
            FailureKind::Custom => "CUSTOM",
        }
    }
}

/// An operation error tagged with a [`FailureKind`].
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ClassifiedError {
    pub kind: FailureKind,
    #[source]
    pub source: BoxError,
}

impl ClassifiedError {
    pub fn new(kind: FailureKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}

/// Errors returned by [`CircuitBreaker::execute`](crate::resilience::CircuitBreaker::execute).
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The circuit is OPEN and no fallback recovered the call.
    #[error("circuit breaker '{circuit}' is OPEN")]
    Open { circuit: String },

    /// The circuit is HALF_OPEN and has admitted all of its trial calls.
    #[error("circuit breaker '{circuit}' is HALF_OPEN and not admitting more trial calls")]
    HalfOpenSaturated { circuit: String },

    /// The protected call did not finish within its deadline.
    #[error("circuit breaker '{circuit}': operation timed out after {}ms", .timeout.as_millis())]
    Timeout { circuit: String, timeout: Duration },

    /// The protected call failed; this is the caller's own error.
    #[error(transparent)]
    Operation(BoxError),

    /// No breaker is registered under this name.
    #[error("no circuit breaker named '{0}'")]
    UnknownCircuit(String),
}

impl BreakerError {
    /// Classification used for metrics labels and fallback predicates.
    pub fn kind(&self) -> FailureKind {
        match self {
            BreakerError::Timeout { .. } => FailureKind::Timeout,
            BreakerError::Operation(source) => source
                .downcast_ref::<ClassifiedError>()
                .map(|c| c.kind)
                .unwrap_or(FailureKind::Error),
            _ => FailureKind::Error,
        }
    }

    /// True when the call was rejected without invoking the operation.
    pub fn is_short_circuit(&self) -> bool {
        matches!(
            self,
            BreakerError::Open { .. } | BreakerError::HalfOpenSaturated { .. }
        )
    }

    /// The caller's original error, if the operation itself failed.
    pub fn into_operation_error(self) -> Option<BoxError> {
        match self {
            BreakerError::Operation(source) => Some(source),
            _ => None,
        }
    }
}
