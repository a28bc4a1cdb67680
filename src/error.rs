//! Error types for the recovery engine
//!
//! Every protected operation fails with a [`RecoveryError`]. The classifier only
//! ever looks at two things on an error: its optional numeric status code and its
//! message text, so remote failures should be mapped into the variant that keeps
//! the status code when one is available.

use thiserror::Error;

/// Result type alias for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Errors produced by protected operations and by the recovery engine itself
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Remote call answered with a non-success status code
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Network errors (connection refused, reset, DNS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout errors raised by the wrapped operation
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Failure described only by its message
    #[error("{0}")]
    Operation(String),

    /// Retry attempts exhausted while the failure was still retryable
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last_error: Box<RecoveryError>,
    },

    /// Circuit breaker rejected the call without invoking the operation
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON errors (fallback cache)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl RecoveryError {
    /// Create an error carrying a status code
    pub fn http<S: Into<String>>(status: u16, msg: S) -> Self {
        Self::Http {
            status,
            message: msg.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an error from a bare message
    pub fn operation<S: Into<String>>(msg: S) -> Self {
        Self::Operation(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a circuit-open rejection for the named circuit
    pub fn circuit_open<S: Into<String>>(name: S) -> Self {
        Self::CircuitOpen { name: name.into() }
    }

    /// Numeric status code, if the failure carries one.
    ///
    /// `RetryExhausted` reports the status of the last underlying failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RecoveryError::Http { status, .. } => Some(*status),
            RecoveryError::RetryExhausted { last_error, .. } => last_error.status_code(),
            _ => None,
        }
    }

    /// Message text used for pattern-based classification
    pub fn message(&self) -> String {
        match self {
            RecoveryError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Check if retries were exhausted
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, RecoveryError::RetryExhausted { .. })
    }

    /// Check if a circuit breaker rejected the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RecoveryError::CircuitOpen { .. })
    }

    /// Number of attempts made, for exhausted retries
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RecoveryError::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Last underlying failure, for exhausted retries
    pub fn last_error(&self) -> Option<&RecoveryError> {
        match self {
            RecoveryError::RetryExhausted { last_error, .. } => Some(last_error),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for RecoveryError {
    fn from(err: toml::de::Error) -> Self {
        RecoveryError::Config(format!("Invalid TOML: {err}"))
    }
}

impl From<regex::Error> for RecoveryError {
    fn from(err: regex::Error) -> Self {
        RecoveryError::Config(format!("Regex pattern error: {err}"))
    }
}
