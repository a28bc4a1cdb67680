//! Recovery orchestrator combining circuit breakers, retries and fallbacks
//!
//! A call goes through the named circuit breaker first; the breaker-guarded
//! call is what the retry executor repeats; whatever error is left after that
//! is handed to the fallback resolver. Each layer is optional.

use crate::config::RecoveryConfig;
use crate::error::Result;
use crate::error_recovery::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, ErrorClassifier,
    FallbackPolicy, FallbackResolver, FallbackStats, RetryExecutor, RetryPolicy, RetryStats,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Circuit breaker settings for one call path
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerOptions {
    /// Circuit name; defaults to the operation name
    pub name: Option<String>,
    /// Used when the circuit is first created
    pub config: CircuitBreakerConfig,
}

/// Recovery layers to apply to a call. `None` disables a layer.
///
/// `A` is the argument type of the protected call; it only matters to an
/// alternative-service fallback, which receives the same arguments.
pub struct RecoveryOptions<T, A = ()> {
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerOptions>,
    pub fallback: Option<FallbackPolicy<T, A>>,
}

impl<T, A> Default for RecoveryOptions<T, A> {
    fn default() -> Self {
        Self {
            retry: None,
            circuit_breaker: None,
            fallback: None,
        }
    }
}

impl<T: Clone, A> Clone for RecoveryOptions<T, A> {
    fn clone(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T: fmt::Debug, A> fmt::Debug for RecoveryOptions<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOptions")
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl<T, A> RecoveryOptions<T, A> {
    /// No recovery layers
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable retries
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Enable a circuit breaker named after the operation
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(CircuitBreakerOptions { name: None, config });
        self
    }

    /// Enable a circuit breaker with an explicit name
    pub fn with_named_circuit_breaker<S: Into<String>>(
        mut self,
        name: S,
        config: CircuitBreakerConfig,
    ) -> Self {
        self.circuit_breaker = Some(CircuitBreakerOptions {
            name: Some(name.into()),
            config,
        });
        self
    }

    /// Enable a fallback
    pub fn with_fallback(mut self, policy: FallbackPolicy<T, A>) -> Self {
        self.fallback = Some(policy);
        self
    }
}

/// Aggregated statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub retry: RetryStats,
    pub circuit_breaker: HashMap<String, CircuitBreakerStats>,
    pub fallback: FallbackStats,
    pub timestamp: DateTime<Utc>,
}

/// Composes circuit breaker -> retry -> fallback into one call path
pub struct RecoveryOrchestrator {
    classifier: Arc<ErrorClassifier>,
    default_retry: RetryPolicy,
    retry_executor: RetryExecutor,
    circuit_breakers: CircuitBreakerRegistry,
    fallback_resolver: FallbackResolver,
}

impl Default for RecoveryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryOrchestrator {
    /// Orchestrator with default classifier, circuit config and cache TTL
    pub fn new() -> Self {
        Self::with_classifier(ErrorClassifier::new())
    }

    /// Orchestrator using a custom classifier
    pub fn with_classifier(classifier: ErrorClassifier) -> Self {
        let classifier = Arc::new(classifier);
        Self {
            retry_executor: RetryExecutor::new(classifier.clone()),
            classifier,
            default_retry: RetryPolicy::default(),
            circuit_breakers: CircuitBreakerRegistry::default(),
            fallback_resolver: FallbackResolver::default(),
        }
    }

    /// Orchestrator using configured defaults
    pub fn from_config(config: &RecoveryConfig) -> Self {
        let classifier = Arc::new(ErrorClassifier::new());
        Self {
            retry_executor: RetryExecutor::new(classifier.clone()),
            classifier,
            default_retry: config.retry.clone(),
            circuit_breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            fallback_resolver: FallbackResolver::new(config.fallback.cache_ttl),
        }
    }

    /// Classifier shared with the retry executor
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Retry policy from the configuration (`RetryPolicy::default()` otherwise)
    pub fn default_retry(&self) -> &RetryPolicy {
        &self.default_retry
    }

    /// Options retrying with [`Self::default_retry`], other layers off
    pub fn default_options<T, A>(&self) -> RecoveryOptions<T, A> {
        RecoveryOptions::new().with_retry(self.default_retry.clone())
    }

    /// Retry executor
    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry_executor
    }

    /// Circuit breakers owned by this orchestrator
    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.circuit_breakers
    }

    /// Fallback resolver and its cache
    pub fn fallback_resolver(&self) -> &FallbackResolver {
        &self.fallback_resolver
    }

    /// Execute operation with the requested recovery layers
    pub async fn execute_with_recovery<F, Fut, T>(
        &self,
        name: &str,
        operation: F,
        options: &RecoveryOptions<T>,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned + Clone,
    {
        self.execute_with_recovery_args(name, (), |()| operation(), options)
            .await
    }

    /// Execute `operation(args)` with the requested recovery layers.
    ///
    /// Every attempt and an alternative-service fallback get a clone of `args`.
    pub async fn execute_with_recovery_args<A, F, Fut, T>(
        &self,
        name: &str,
        args: A,
        operation: F,
        options: &RecoveryOptions<T, A>,
    ) -> Result<T>
    where
        A: Clone,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned + Clone,
    {
        let breaker = match &options.circuit_breaker {
            Some(cb) => {
                let circuit = cb.name.as_deref().unwrap_or(name);
                Some(
                    self.circuit_breakers
                        .get_or_create(circuit, Some(&cb.config))
                        .await,
                )
            }
            None => None,
        };

        debug!(
            "Executing '{}' (retry: {}, circuit breaker: {}, fallback: {})",
            name,
            options.retry.is_some(),
            breaker.is_some(),
            options.fallback.is_some()
        );

        let breaker = breaker.as_ref();
        let operation = &operation;
        let args = &args;
        let guarded = move || async move {
            let attempt = move || operation(args.clone());
            match breaker {
                Some(breaker) => breaker.execute(attempt).await,
                None => attempt().await,
            }
        };

        let primary = async {
            match &options.retry {
                Some(policy) => self.retry_executor.execute_with_retry(guarded, policy).await,
                None => guarded().await,
            }
        };

        match &options.fallback {
            Some(policy) => {
                self.fallback_resolver
                    .execute_with_fallback_args(name, args, || primary, policy)
                    .await
            }
            None => primary.await,
        }
    }

    /// Bind `operation` to this orchestrator and `options`.
    ///
    /// The returned callable forwards its arguments to `operation` on every
    /// attempt and to an alternative-service fallback; pass several arguments
    /// as a tuple.
    pub fn wrap_with_recovery<A, F, Fut, T, S>(
        self: &Arc<Self>,
        name: S,
        operation: F,
        options: RecoveryOptions<T, A>,
    ) -> RecoverableFn<A, F, T>
    where
        S: Into<String>,
        A: Clone,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned + Clone,
    {
        RecoverableFn {
            orchestrator: self.clone(),
            name: name.into(),
            operation,
            options,
        }
    }

    /// Get aggregated statistics
    pub async fn get_stats(&self) -> RecoveryStats {
        RecoveryStats {
            retry: self.retry_executor.get_stats().await,
            circuit_breaker: self.circuit_breakers.all_stats().await,
            fallback: self.fallback_resolver.get_stats().await,
            timestamp: Utc::now(),
        }
    }

    /// Reset statistics and close every circuit. Cached values are kept.
    pub async fn reset(&self) {
        self.retry_executor.reset_stats().await;
        self.fallback_resolver.reset_stats().await;
        self.circuit_breakers.reset_all().await;
        info!("Reset recovery statistics and circuit breakers");
    }
}

/// Callable produced by [`RecoveryOrchestrator::wrap_with_recovery`]
pub struct RecoverableFn<A, F, T> {
    orchestrator: Arc<RecoveryOrchestrator>,
    name: String,
    operation: F,
    options: RecoveryOptions<T, A>,
}

impl<A, F, Fut, T> RecoverableFn<A, F, T>
where
    A: Clone,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<T>>,
    T: Serialize + DeserializeOwned + Clone,
{
    /// Operation name used for the circuit and cache key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the wrapped operation with recovery
    pub async fn call(&self, args: A) -> Result<T> {
        self.orchestrator
            .execute_with_recovery_args(&self.name, args, &self.operation, &self.options)
            .await
    }
}
