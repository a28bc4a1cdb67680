//! Ready-made recovery option bundles for common dependency classes
//!
//! Each preset is generic over the result type `T` and the call's argument
//! type `A` (`()` for argument-less operations).

use crate::error::Result;
use crate::error_recovery::{CircuitBreakerConfig, FallbackPolicy, RecoveryOptions, RetryPolicy};
use std::future::Future;
use std::time::Duration;

/// Stateless preset factories
pub struct RecoveryPresets;

impl RecoveryPresets {
    /// Remote REST API: moderate retries, circuit `"{name}-api"`, default value fallback
    pub fn api_call<T: Default, A>(name: &str) -> RecoveryOptions<T, A> {
        RecoveryOptions::new()
            .with_retry(
                RetryPolicy::new(3)
                    .with_base_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(10))
                    .with_backoff_multiplier(2.0),
            )
            .with_named_circuit_breaker(
                format!("{name}-api"),
                CircuitBreakerConfig::default()
                    .with_failure_threshold(5)
                    .with_recovery_timeout(Duration::from_secs(60))
                    .with_monitoring_period(Duration::from_secs(10)),
            )
            .with_fallback(FallbackPolicy::default_value(T::default()))
    }

    /// Database: fewer retries, lower failure threshold, cached fallback
    pub fn database<T, A>(name: &str) -> RecoveryOptions<T, A> {
        RecoveryOptions::new()
            .with_retry(
                RetryPolicy::new(2)
                    .with_base_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(5))
                    .with_backoff_multiplier(2.0),
            )
            .with_named_circuit_breaker(
                format!("{name}-db"),
                CircuitBreakerConfig::default()
                    .with_failure_threshold(3)
                    .with_recovery_timeout(Duration::from_secs(30))
                    .with_monitoring_period(Duration::from_secs(5)),
            )
            .with_fallback(FallbackPolicy::cached().with_cache_ttl(Duration::from_secs(60)))
    }

    /// External service with an alternative to call, with the same
    /// arguments, when it stays down
    pub fn external_service<T, A, F, Fut>(
        name: &str,
        alternative_service: F,
    ) -> RecoveryOptions<T, A>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        RecoveryOptions::new()
            .with_retry(
                RetryPolicy::new(2)
                    .with_base_delay(Duration::from_secs(2))
                    .with_max_delay(Duration::from_secs(15))
                    .with_backoff_multiplier(2.0),
            )
            .with_named_circuit_breaker(
                format!("{name}-service"),
                CircuitBreakerConfig::default()
                    .with_failure_threshold(3)
                    .with_recovery_timeout(Duration::from_secs(120))
                    .with_monitoring_period(Duration::from_secs(15)),
            )
            .with_fallback(FallbackPolicy::alternative(alternative_service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::FallbackType;

    #[test]
    fn test_api_call_preset() {
        let options: RecoveryOptions<Vec<String>> = RecoveryPresets::api_call("calendar");

        let retry = options.retry.as_ref().unwrap();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.max_attempts(), 4);

        let circuit = options.circuit_breaker.as_ref().unwrap();
        assert_eq!(circuit.name.as_deref(), Some("calendar-api"));
        assert_eq!(circuit.config.failure_threshold, 5);

        let fallback = options.fallback.as_ref().unwrap();
        assert_eq!(fallback.fallback_type(), FallbackType::DefaultValue);
    }

    #[test]
    fn test_database_is_tighter_than_api() {
        let api: RecoveryOptions<u32> = RecoveryPresets::api_call("store");
        let db: RecoveryOptions<u32> = RecoveryPresets::database("store");

        let api_retry = api.retry.as_ref().unwrap();
        let db_retry = db.retry.as_ref().unwrap();
        assert!(db_retry.max_retries < api_retry.max_retries);
        assert!(db_retry.base_delay < api_retry.base_delay);

        let api_circuit = api.circuit_breaker.as_ref().unwrap();
        let db_circuit = db.circuit_breaker.as_ref().unwrap();
        assert!(db_circuit.config.failure_threshold < api_circuit.config.failure_threshold);
        assert_eq!(db_circuit.name.as_deref(), Some("store-db"));
        assert_eq!(
            db.fallback.as_ref().unwrap().fallback_type(),
            FallbackType::CachedValue
        );
    }

    #[test]
    fn test_external_service_preset() {
        let options = RecoveryPresets::external_service("holidays", |year: u16| async move {
            Ok(vec![format!("{year}-12-25")])
        });

        assert_eq!(
            options.circuit_breaker.as_ref().unwrap().name.as_deref(),
            Some("holidays-service")
        );
        assert_eq!(
            options.fallback.as_ref().unwrap().fallback_type(),
            FallbackType::AlternativeService
        );
    }
}
