//! Circuit breaker pattern implementation for resilient error recovery
//!
//! Each protected resource gets its own breaker. A breaker stops invoking a
//! dependency after `failure_threshold` consecutive failures, waits
//! `recovery_timeout`, then lets trial calls through until
//! `half_open_success_threshold` consecutive successes close it again.
//!
//! There is no background timer: the Open -> HalfOpen transition is applied
//! lazily whenever the breaker is called or its state is read.

use crate::error::{RecoveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - operations rejected
    Open,
    /// Circuit is half-open - probing whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Expected polling interval for state observers
    #[serde(with = "humantime_serde")]
    pub monitoring_period: Duration,
    /// Consecutive half-open successes needed to close the circuit
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(10),
            half_open_success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set recovery timeout
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set monitoring period
    pub fn with_monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period = period;
        self
    }

    /// Set half-open success threshold
    pub fn with_half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold;
        self
    }

    /// Check thresholds
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(RecoveryError::config("failure_threshold must be at least 1"));
        }
        if self.half_open_success_threshold == 0 {
            return Err(RecoveryError::config(
                "half_open_success_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Resource name
    pub name: String,
    /// Current state
    pub current_state: CircuitState,
    /// Consecutive failures
    pub failure_count: u32,
    /// Consecutive half-open successes
    pub half_open_successes: u32,
    /// Calls made through `execute`, rejected ones included
    pub total_calls: u64,
    /// Calls whose operation succeeded
    pub successful_calls: u64,
    /// Calls whose operation failed
    pub failed_calls: u64,
    /// Calls rejected while open
    pub rejected_calls: u64,
    /// Last recorded failure time
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Last state change
    pub last_state_change: DateTime<Utc>,
    /// Remaining cooldown while open
    #[serde(default, with = "humantime_serde")]
    pub time_until_half_open: Option<Duration>,
}

/// State transition notification
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerEvent {
    /// Resource name
    pub circuit: String,
    /// Previous state
    pub previous_state: CircuitState,
    /// New state
    pub new_state: CircuitState,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Why the transition happened
    pub reason: String,
}

/// Circuit breaker listener trait
#[async_trait::async_trait]
pub trait CircuitBreakerListener: Send + Sync {
    /// Called after the state lock is released
    async fn on_state_change(&self, event: &CircuitBreakerEvent);
}

/// Per-resource mutable record
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure_time: None,
            last_state_change: Utc::now(),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
        }
    }

    fn transition(
        &mut self,
        circuit: &str,
        new_state: CircuitState,
        reason: &str,
    ) -> CircuitBreakerEvent {
        let previous_state = self.state;
        let now = Utc::now();
        self.state = new_state;
        self.last_state_change = now;

        CircuitBreakerEvent {
            circuit: circuit.to_string(),
            previous_state,
            new_state,
            timestamp: now,
            reason: reason.to_string(),
        }
    }

    /// Time left before an open circuit admits trial calls; `None` once elapsed
    fn remaining_cooldown(&self, recovery_timeout: Duration) -> Option<Duration> {
        let last_failure = self.last_failure_time?;
        // A failure time in the future counts as "just failed"
        let elapsed = Utc::now()
            .signed_duration_since(last_failure)
            .to_std()
            .unwrap_or(Duration::ZERO);
        recovery_timeout.checked_sub(elapsed).filter(|d| !d.is_zero())
    }
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    record: RwLock<CircuitRecord>,
    listeners: RwLock<Vec<Arc<dyn CircuitBreakerListener>>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create new circuit breaker
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            record: RwLock::new(CircuitRecord::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run an operation through the breaker
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (admitted, event) = {
            let mut record = self.record.write().await;
            record.total_calls += 1;
            let event = self.refresh(&mut record);

            if record.state == CircuitState::Open {
                record.rejected_calls += 1;
                (false, event)
            } else {
                (true, event)
            }
        };
        self.emit(event).await;

        if !admitted {
            debug!("Circuit breaker '{}' open, rejecting call", self.name);
            return Err(RecoveryError::circuit_open(&self.name));
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(&error).await;
                Err(error)
            }
        }
    }

    /// Current state, applying the lazy Open -> HalfOpen check
    pub async fn get_state(&self) -> CircuitState {
        let (state, event) = {
            let mut record = self.record.write().await;
            let event = self.refresh(&mut record);
            (record.state, event)
        };
        self.emit(event).await;
        state
    }

    /// Administrative override bypassing the transition rules.
    ///
    /// Forcing `Open` records `last_failure_time` (now, unless given).
    pub async fn force_state(
        &self,
        state: CircuitState,
        last_failure_time: Option<DateTime<Utc>>,
    ) {
        let event = {
            let mut record = self.record.write().await;
            let event = record.transition(&self.name, state, "forced");

            match state {
                CircuitState::Closed => {
                    record.failure_count = 0;
                    record.half_open_successes = 0;
                }
                CircuitState::HalfOpen => {
                    record.half_open_successes = 0;
                }
                CircuitState::Open => {
                    record.half_open_successes = 0;
                    record.last_failure_time = Some(Utc::now());
                }
            }
            if let Some(time) = last_failure_time {
                record.last_failure_time = Some(time);
            }
            event
        };

        warn!(
            "Circuit breaker '{}' forced {} -> {}",
            self.name, event.previous_state, event.new_state
        );
        self.emit(Some(event)).await;
    }

    /// Reset to closed and clear counters and statistics
    pub async fn reset(&self) {
        let event = {
            let mut record = self.record.write().await;
            let previous_state = record.state;
            *record = CircuitRecord::new();
            (previous_state != CircuitState::Closed).then(|| CircuitBreakerEvent {
                circuit: self.name.clone(),
                previous_state,
                new_state: CircuitState::Closed,
                timestamp: record.last_state_change,
                reason: "reset".to_string(),
            })
        };

        info!("Circuit breaker '{}' reset to closed state", self.name);
        self.emit(event).await;
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let (stats, event) = {
            let mut record = self.record.write().await;
            let event = self.refresh(&mut record);
            let time_until_half_open = match record.state {
                CircuitState::Open => record.remaining_cooldown(self.config.recovery_timeout),
                _ => None,
            };

            let stats = CircuitBreakerStats {
                name: self.name.clone(),
                current_state: record.state,
                failure_count: record.failure_count,
                half_open_successes: record.half_open_successes,
                total_calls: record.total_calls,
                successful_calls: record.successful_calls,
                failed_calls: record.failed_calls,
                rejected_calls: record.rejected_calls,
                last_failure_time: record.last_failure_time,
                last_state_change: record.last_state_change,
                time_until_half_open,
            };
            (stats, event)
        };
        self.emit(event).await;
        stats
    }

    /// Add event listener
    pub async fn add_listener(&self, listener: Arc<dyn CircuitBreakerListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Apply the time-based Open -> HalfOpen transition
    fn refresh(&self, record: &mut CircuitRecord) -> Option<CircuitBreakerEvent> {
        if record.state != CircuitState::Open
            || record
                .remaining_cooldown(self.config.recovery_timeout)
                .is_some()
        {
            return None;
        }

        record.half_open_successes = 0;
        info!("Circuit breaker '{}' transitioning to half-open", self.name);
        Some(record.transition(&self.name, CircuitState::HalfOpen, "recovery timeout elapsed"))
    }

    async fn record_success(&self) {
        let event = {
            let mut record = self.record.write().await;
            record.successful_calls += 1;

            match record.state {
                CircuitState::Closed => {
                    record.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    record.half_open_successes += 1;
                    if record.half_open_successes >= self.config.half_open_success_threshold {
                        record.failure_count = 0;
                        record.half_open_successes = 0;
                        info!(
                            "Circuit breaker '{}' closed after successful recovery",
                            self.name
                        );
                        Some(record.transition(
                            &self.name,
                            CircuitState::Closed,
                            "half-open trial calls succeeded",
                        ))
                    } else {
                        None
                    }
                }
                // Call admitted before another caller opened the circuit
                CircuitState::Open => None,
            }
        };
        self.emit(event).await;
    }

    async fn record_failure(&self, error: &RecoveryError) {
        let event = {
            let mut record = self.record.write().await;
            record.failed_calls += 1;
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_failure_time = Some(Utc::now());

            match record.state {
                CircuitState::Closed => {
                    if record.failure_count >= self.config.failure_threshold {
                        warn!(
                            "Circuit breaker '{}' opened after {} failures: {}",
                            self.name, record.failure_count, error
                        );
                        Some(record.transition(
                            &self.name,
                            CircuitState::Open,
                            "failure threshold reached",
                        ))
                    } else {
                        debug!(
                            "Circuit breaker '{}' failure {}/{}",
                            self.name, record.failure_count, self.config.failure_threshold
                        );
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    record.half_open_successes = 0;
                    warn!("Circuit breaker '{}' reopened: {}", self.name, error);
                    Some(record.transition(&self.name, CircuitState::Open, "half-open trial call failed"))
                }
                CircuitState::Open => {
                    debug!("Failure recorded while circuit '{}' is open", self.name);
                    None
                }
            }
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: Option<CircuitBreakerEvent>) {
        let Some(event) = event else {
            return;
        };

        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener.on_state_change(&event).await;
        }
    }
}

/// Registry of named circuit breakers
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Create new registry
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Config used for breakers created without one
    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create the breaker for a resource.
    ///
    /// `config` applies only when the breaker is created.
    pub async fn get_or_create(
        &self,
        name: &str,
        config: Option<&CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Created new circuit breaker for resource: {}", name);
                Arc::new(CircuitBreaker::new(
                    name,
                    config.cloned().unwrap_or_else(|| self.default_config.clone()),
                ))
            })
            .clone()
    }

    /// Get an existing breaker
    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    /// Remove a breaker
    pub async fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.write().await.remove(name)
    }

    /// Registered resource names
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get all circuit breaker statistics
    pub async fn all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();

        let mut stats = HashMap::with_capacity(breakers.len());
        for breaker in breakers {
            stats.insert(breaker.name().to_string(), breaker.get_stats().await);
        }
        stats
    }

    /// Reset all circuit breakers
    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();

        for breaker in breakers {
            breaker.reset().await;
        }
    }
}
