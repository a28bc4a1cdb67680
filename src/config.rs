//! Configuration management for the recovery engine
//!
//! Defaults can come from a TOML document, from environment variables, or
//! both (`from_file` followed by `apply_env`). Durations use humantime
//! notation such as `"250ms"` or `"2m"`.

use crate::error::{RecoveryError, Result};
use crate::error_recovery::fallback::DEFAULT_CACHE_TTL;
use crate::error_recovery::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt};

/// Engine-wide defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Default retry policy
    pub retry: RetryPolicy,

    /// Config for circuits created without one
    pub circuit_breaker: CircuitBreakerConfig,

    /// Fallback cache settings
    pub fallback: FallbackConfig,
}

/// Fallback cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Lifetime of cached values when the policy sets none
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl RecoveryConfig {
    /// Parse from a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RecoveryError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `RECOVERY_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_parse::<u32>("RECOVERY_MAX_RETRIES")? {
            self.retry.max_retries = value;
        }
        if let Some(value) = env_duration("RECOVERY_BASE_DELAY")? {
            self.retry.base_delay = value;
        }
        if let Some(value) = env_duration("RECOVERY_MAX_DELAY")? {
            self.retry.max_delay = value;
        }
        if let Some(value) = env_parse::<f64>("RECOVERY_BACKOFF_MULTIPLIER")? {
            self.retry.backoff_multiplier = value;
        }
        if let Some(value) = env_parse::<u32>("RECOVERY_FAILURE_THRESHOLD")? {
            self.circuit_breaker.failure_threshold = value;
        }
        if let Some(value) = env_duration("RECOVERY_RECOVERY_TIMEOUT")? {
            self.circuit_breaker.recovery_timeout = value;
        }
        if let Some(value) = env_duration("RECOVERY_MONITORING_PERIOD")? {
            self.circuit_breaker.monitoring_period = value;
        }
        if let Some(value) = env_parse::<u32>("RECOVERY_HALF_OPEN_SUCCESS_THRESHOLD")? {
            self.circuit_breaker.half_open_success_threshold = value;
        }
        if let Some(value) = env_duration("RECOVERY_CACHE_TTL")? {
            self.fallback.cache_ttl = value;
        }

        self.validate()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        if self.fallback.cache_ttl.is_zero() {
            return Err(RecoveryError::config("fallback cache_ttl must be non-zero"));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RecoveryError::config(format!("Invalid {key} '{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_duration(key: &str) -> Result<Option<Duration>> {
    match env::var(key) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|e| RecoveryError::config(format!("Invalid {key} '{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RecoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.half_open_success_threshold, 2);
        assert_eq!(config.fallback.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RecoveryConfig::from_toml_str(
            r#"
            [retry]
            max_retries = 5
            base_delay = "200ms"

            [circuit_breaker]
            recovery_timeout = "2m"
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(200));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_invalid_toml_values_rejected() {
        let result = RecoveryConfig::from_toml_str(
            r#"
            [circuit_breaker]
            failure_threshold = 0
            "#,
        );
        assert!(matches!(result, Err(RecoveryError::Config(_))));

        let result = RecoveryConfig::from_toml_str("retry = 7");
        assert!(matches!(result, Err(RecoveryError::Config(_))));
    }
}
