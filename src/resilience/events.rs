//! Circuit lifecycle events.
//!
//! Events are broadcast to subscribers and never stored by the breaker.
//! A subscriber that lags behind the channel capacity loses the oldest events.

use std::time::{SystemTime, UNIX_EPOCH};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::error::FailureKind;

/// Capacity of each breaker's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Event kind and its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitEventKind {
    StateChange {
        from: CircuitState,
        to: CircuitState,
        reason: String,
        forced: bool,
    },
    RequestSuccess {
        response_time_ms: f64,
    },
    RequestFailure {
        failure_type: FailureKind,
        error: String,
        response_time_ms: f64,
    },
    FallbackExecuted {
        success: bool,
        strategy: Option<String>,
    },
    ThresholdAdjusted {
        old: f64,
        new: f64,
        reason: String,
    },
}

/// An immutable record of something that happened to a circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub circuit_name: String,
    #[serde(flatten)]
    pub kind: CircuitEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CircuitEvent {
    pub fn new(circuit_name: &str, kind: CircuitEventKind, metadata: Option<serde_json::Value>) -> Self {
        Self {
            timestamp: now_millis(),
            circuit_name: circuit_name.to_string(),
            kind,
            metadata,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fan-out point for a breaker's events.
///
/// Every event goes to the breaker's own channel and, when the breaker is
/// registered with a manager, to the manager's channel as well.
#[derive(Debug, Clone)]
pub struct EventBus {
    local: broadcast::Sender<CircuitEvent>,
    upstream: Option<broadcast::Sender<CircuitEvent>>,
}

impl EventBus {
    pub fn new(upstream: Option<broadcast::Sender<CircuitEvent>>) -> Self {
        let (local, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { local, upstream }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.local.subscribe()
    }

    /// Send to all subscribers. Having no subscribers is not an error.
    pub fn emit(&self, event: CircuitEvent) {
        if let Some(upstream) = &self.upstream {
            let _ = upstream.send(event.clone());
        }
        let _ = self.local.send(event);
    }
}
