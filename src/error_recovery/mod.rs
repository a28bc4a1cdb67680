//! Error recovery patterns for calls to unreliable dependencies
//!
//! This module provides error classification, retry policies with exponential
//! backoff, circuit breakers, fallbacks, and an orchestrator composing them.

pub mod circuit_breaker;
pub mod classifier;
pub mod fallback;
pub mod orchestrator;
pub mod presets;
pub mod retry_policy;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent, CircuitBreakerListener,
    CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use classifier::{ClassificationRule, ErrorClassification, ErrorClassifier};
pub use fallback::{
    FallbackPolicy, FallbackResolver, FallbackStats, FallbackStrategy, FallbackType,
    DEFAULT_CACHE_TTL,
};
pub use orchestrator::{
    CircuitBreakerOptions, RecoverableFn, RecoveryOptions, RecoveryOrchestrator, RecoveryStats,
};
pub use presets::RecoveryPresets;
pub use retry_policy::{RetryExecutor, RetryPolicy, RetryPredicate, RetryStats};
