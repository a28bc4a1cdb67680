//! Resilience engine for calls to unreliable dependencies
//!
//! This crate wraps fallible async operations with layered recovery:
//!
//! - Error classification by status code and message patterns
//! - Retries with capped exponential backoff
//! - Per-resource circuit breakers with lazy half-open probing
//! - Fallbacks: default values, cached results, custom functions,
//!   skip markers and alternative services
//! - An orchestrator composing all of the above, plus presets for
//!   common dependency classes
//!
//! Configuration can be loaded from TOML or `RECOVERY_*` environment
//! variables, and [`logging::init_logging`] installs a `tracing` subscriber.

// Core modules
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod logging;

// Re-export main types for convenience
pub use config::RecoveryConfig;
pub use error::{RecoveryError, Result};
pub use error_recovery::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ErrorClassification, ErrorClassifier,
    FallbackPolicy, RecoveryOptions, RecoveryOrchestrator, RecoveryPresets, RetryPolicy,
};
