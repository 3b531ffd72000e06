//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated)
//!     → manager builds breakers from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → manager.apply_config hot-patches existing breakers
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Breaker names are identity; a reload never renames a breaker

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdaptiveConfig, CircuitBreakerConfig, CircuitBreakerConfigPatch, Criticality,
    DependencyConfig, HealthConfig, LogFormat, ObservabilityConfig, ResilienceConfig,
};
