//! Retry policy implementation with exponential backoff
//!
//! An operation gets `max_retries + 1` attempts. Between attempts the caller's
//! task is suspended on a tokio timer for
//! `min(base_delay * backoff_multiplier^(attempt - 1), max_delay)`.

use crate::error::{RecoveryError, Result};
use crate::error_recovery::classifier::ErrorClassifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Custom retry predicate: `(error, failed_attempt_number) -> retry?`
pub type RetryPredicate = Arc<dyn Fn(&RecoveryError, u32) -> bool + Send + Sync>;

/// Retry policy configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Overrides the default eligibility rule when set
    #[serde(skip)]
    pub should_retry: Option<RetryPredicate>,
    /// Status codes that may be retried, for errors that carry one
    pub retryable_status_codes: Option<BTreeSet<u16>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field(
                "should_retry",
                &self.should_retry.as_ref().map(|_| "<function>"),
            )
            .field("retryable_status_codes", &self.retryable_status_codes)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            should_retry: None,
            retryable_status_codes: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retry count and default timings
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set retry count
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Replace the default eligibility rule
    pub fn with_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RecoveryError, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Restrict retries of status-bearing errors to these codes
    pub fn with_retryable_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable_status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Total attempts including the initial one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if !secs.is_finite() || secs < 0.0 || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(secs)
    }

    /// Check policy values for consistency
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RecoveryError::config(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(RecoveryError::config(format!(
                "base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Attempts made across all calls
    pub total_attempts: u64,
    /// Calls that succeeded after more than one attempt
    pub successful_retries: u64,
    /// Calls that exhausted every attempt
    pub failed_retries: u64,
    /// Last time a retry was scheduled
    pub last_retry: Option<DateTime<Utc>>,
}

/// Retry executor
pub struct RetryExecutor {
    classifier: Arc<ErrorClassifier>,
    stats: Arc<RwLock<RetryStats>>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(ErrorClassifier::new()))
    }
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            classifier,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        }
    }

    /// Decide whether a failure of the given attempt may be retried
    pub fn should_retry(&self, policy: &RetryPolicy, error: &RecoveryError, attempt: u32) -> bool {
        if let Some(predicate) = &policy.should_retry {
            return predicate(error, attempt);
        }

        if matches!(
            error,
            RecoveryError::CircuitOpen { .. } | RecoveryError::RetryExhausted { .. }
        ) {
            return false;
        }

        let status = error.status_code();
        if let (Some(codes), Some(status)) = (&policy.retryable_status_codes, status) {
            return codes.contains(&status);
        }

        if !self.classifier.classify(error).is_retryable() {
            return false;
        }

        match status {
            Some(429) => true,
            Some(400..=499) => false,
            _ => true,
        }
    }

    /// Execute operation with retry policy
    pub async fn execute_with_retry<F, T, Fut>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.stats.write().await.total_attempts += 1;

            if attempt > 1 {
                debug!("Retry attempt {} of {}", attempt, max_attempts);
            }

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        self.stats.write().await.successful_retries += 1;
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if !self.should_retry(policy, &error, attempt) {
                debug!("Error not retryable on attempt {}: {}", attempt, error);
                return Err(error);
            }

            if attempt >= max_attempts {
                self.stats.write().await.failed_retries += 1;
                warn!("Operation failed after {} attempts: {}", attempt, error);
                return Err(RecoveryError::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let delay = policy.calculate_delay(attempt);
            self.stats.write().await.last_retry = Some(Utc::now());

            debug!(
                "Retrying after {:?} (attempt {}/{}): {}",
                delay, attempt, max_attempts, error
            );

            sleep(delay).await;
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }

    /// Reset statistics
    pub async fn reset_stats(&self) {
        *self.stats.write().await = RetryStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0);

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(800));
        // Capped
        assert_eq!(policy.calculate_delay(5), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default()
            .with_backoff_multiplier(0.5)
            .validate()
            .is_err());
        assert!(RetryPolicy::default()
            .with_base_delay(Duration::from_secs(60))
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_always_failing_operation_is_invoked_n_plus_one_times() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RecoveryError::http(503, "Service Unavailable")) }
                },
                &fast_policy(3),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let error = result.unwrap_err();
        assert!(error.is_retry_exhausted());
        assert_eq!(error.attempts(), Some(4));
        assert_eq!(error.status_code(), Some(503));

        let stats = executor.get_stats().await;
        assert_eq!(stats.total_attempts, 4);
        assert_eq!(stats.failed_retries, 1);
        assert_eq!(stats.successful_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let executor = RetryExecutor::default();
        let policy = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        let result: Result<()> = executor
            .execute_with_retry(
                || async { Err(RecoveryError::http(503, "Service Unavailable")) },
                &policy,
            )
            .await;

        assert!(result.unwrap_err().is_retry_exhausted());
        // 100ms + 200ms + 250ms (capped), within timer resolution
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(550), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(560), "slept {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_final_attempt() {
        let executor = RetryExecutor::default();
        let policy = RetryPolicy::new(1).with_base_delay(Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let result: Result<()> = executor
            .execute_with_retry(|| async { Err(RecoveryError::network("reset")) }, &policy)
            .await;

        assert_eq!(result.unwrap_err().attempts(), Some(2));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2010), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn test_succeeds_on_kth_attempt() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute_with_retry(
                || {
                    let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if current < 3 {
                            Err(RecoveryError::network("connection reset"))
                        } else {
                            Ok("Success")
                        }
                    }
                },
                &fast_policy(3),
            )
            .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = executor.get_stats().await;
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.successful_retries, 1);
        assert!(stats.last_retry.is_some());
    }

    #[tokio::test]
    async fn test_custom_predicate_stops_after_first_attempt() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5).with_retry_predicate(|_, _| false);

        let result: Result<()> = executor
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RecoveryError::network("connection refused")) }
                },
                &policy,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RecoveryError::Network(_))));
        assert_eq!(executor.get_stats().await.failed_retries, 0);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_propagate_unwrapped() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RecoveryError::http(401, "Unauthorized")) }
                },
                &fast_policy(3),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RecoveryError::Http { status: 401, .. })
        ));
    }

    #[test]
    fn test_default_eligibility() {
        let executor = RetryExecutor::default();
        let policy = RetryPolicy::default();

        assert!(executor.should_retry(&policy, &RecoveryError::http(429, "slow down"), 1));
        assert!(executor.should_retry(&policy, &RecoveryError::http(502, "Bad Gateway"), 1));
        assert!(!executor.should_retry(&policy, &RecoveryError::http(404, "Not Found"), 1));
        assert!(!executor.should_retry(&policy, &RecoveryError::operation("validation failed"), 1));
        assert!(executor.should_retry(&policy, &RecoveryError::operation("mystery"), 1));
        assert!(!executor.should_retry(&policy, &RecoveryError::circuit_open("api"), 1));
    }

    #[test]
    fn test_retryable_status_codes() {
        let executor = RetryExecutor::default();
        let policy = RetryPolicy::default().with_retryable_status_codes([503]);

        assert!(executor.should_retry(&policy, &RecoveryError::http(503, "unavailable"), 1));
        assert!(!executor.should_retry(&policy, &RecoveryError::http(500, "boom"), 1));
        // Errors without a status still go through classification
        assert!(executor.should_retry(&policy, &RecoveryError::network("dns failure"), 1));
    }

    #[test]
    fn test_policy_deserializes_humantime() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_retries": 2, "base_delay": "250ms", "max_delay": "5s", "backoff_multiplier": 3.0}"#,
        )
        .unwrap();

        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert!(policy.should_retry.is_none());
        assert!(policy.retryable_status_codes.is_none());
    }
}
