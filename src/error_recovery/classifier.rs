//! Error classification for retry and fallback decisions
//!
//! Failures are mapped into a fixed taxonomy. A numeric status code always wins;
//! without one, the message is tested against an ordered list of
//! case-insensitive patterns and the first matching rule decides.

use crate::error::{RecoveryError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClassification {
    /// Credentials rejected or missing
    Authentication,
    /// Caller is being throttled
    RateLimit,
    /// Request was rejected as malformed
    Validation,
    /// Transport-level failure
    Network,
    /// Remote side failed
    ServerError,
    /// Nothing matched
    Unknown,
}

impl ErrorClassification {
    /// Default retry eligibility for this category
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorClassification::Authentication | ErrorClassification::Validation
        )
    }

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::Authentication => "authentication",
            ErrorClassification::RateLimit => "rate_limit",
            ErrorClassification::Validation => "validation",
            ErrorClassification::Network => "network",
            ErrorClassification::ServerError => "server_error",
            ErrorClassification::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(category, pattern)` pair of the message rule list
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub classification: ErrorClassification,
    pub pattern: Regex,
}

impl ClassificationRule {
    /// Build a rule from a case-insensitive pattern
    pub fn new(classification: ErrorClassification, pattern: &str) -> Result<Self> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            classification,
            pattern,
        })
    }

    /// Check whether the message matches this rule
    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

const DEFAULT_PATTERNS: &[(ErrorClassification, &str)] = &[
    (
        ErrorClassification::Authentication,
        r"unauthori[sz]ed|authentication|forbidden|invalid[_ ]?token|token expired|invalid credentials|access denied|permission denied",
    ),
    (
        ErrorClassification::RateLimit,
        r"rate[_ -]?limit|too many requests|quota exceeded|throttl",
    ),
    (
        ErrorClassification::Validation,
        r"validation|invalid|bad request|malformed|missing (required )?(field|parameter)",
    ),
    (
        ErrorClassification::Network,
        r"network|econnrefused|econnreset|etimedout|enotfound|connection (refused|reset|closed|aborted)|socket hang up|timed out|timeout|dns",
    ),
    (
        ErrorClassification::ServerError,
        r"internal server error|server error|service unavailable|bad gateway|upstream",
    ),
];

fn default_rules() -> &'static [ClassificationRule] {
    static DEFAULT_RULES: OnceLock<Vec<ClassificationRule>> = OnceLock::new();
    DEFAULT_RULES.get_or_init(|| {
        DEFAULT_PATTERNS
            .iter()
            .map(|(classification, pattern)| {
                ClassificationRule::new(*classification, pattern)
                    .expect("built-in classification pattern must compile")
            })
            .collect()
    })
}

/// Maps a failure into an [`ErrorClassification`]
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Classifier using the built-in rule list
    pub fn new() -> Self {
        Self {
            rules: default_rules().to_vec(),
        }
    }

    /// Classifier with an explicit ordered rule list
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Classifier from ordered `(category, pattern)` pairs
    pub fn from_patterns(patterns: &[(ErrorClassification, &str)]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|(classification, pattern)| ClassificationRule::new(*classification, pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Message rules in evaluation order
    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Classify an error
    pub fn classify(&self, error: &RecoveryError) -> ErrorClassification {
        self.classify_parts(error.status_code(), &error.message())
    }

    /// Classify from a raw status code and message
    pub fn classify_parts(&self, status: Option<u16>, message: &str) -> ErrorClassification {
        if let Some(classification) = status.and_then(Self::classify_status) {
            return classification;
        }

        self.rules
            .iter()
            .find(|rule| rule.matches(message))
            .map(|rule| rule.classification)
            .unwrap_or(ErrorClassification::Unknown)
    }

    /// Status-code mapping. Codes outside 4xx/5xx have no opinion.
    pub fn classify_status(status: u16) -> Option<ErrorClassification> {
        match status {
            401 | 403 => Some(ErrorClassification::Authentication),
            429 => Some(ErrorClassification::RateLimit),
            400..=499 => Some(ErrorClassification::Validation),
            500..=599 => Some(ErrorClassification::ServerError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(401, ErrorClassification::Authentication)]
    #[case(403, ErrorClassification::Authentication)]
    #[case(429, ErrorClassification::RateLimit)]
    #[case(400, ErrorClassification::Validation)]
    #[case(404, ErrorClassification::Validation)]
    #[case(422, ErrorClassification::Validation)]
    #[case(500, ErrorClassification::ServerError)]
    #[case(503, ErrorClassification::ServerError)]
    fn test_status_code_mapping(#[case] status: u16, #[case] expected: ErrorClassification) {
        let classifier = ErrorClassifier::new();
        // Status code beats a message that points elsewhere
        let error = RecoveryError::http(status, "connection reset");
        assert_eq!(classifier.classify(&error), expected);
    }

    #[rstest]
    #[case("Unauthorized: token expired", ErrorClassification::Authentication)]
    #[case("invalid_token", ErrorClassification::Authentication)]
    #[case("Rate limit exceeded, slow down", ErrorClassification::RateLimit)]
    #[case("Too Many Requests", ErrorClassification::RateLimit)]
    #[case("Validation failed for field 'date'", ErrorClassification::Validation)]
    #[case("ECONNREFUSED 127.0.0.1:443", ErrorClassification::Network)]
    #[case("request timed out", ErrorClassification::Network)]
    #[case("Internal Server Error", ErrorClassification::ServerError)]
    #[case("Service Unavailable", ErrorClassification::ServerError)]
    #[case("something odd happened", ErrorClassification::Unknown)]
    fn test_message_patterns(#[case] message: &str, #[case] expected: ErrorClassification) {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.classify_parts(None, message), expected);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let classifier = ErrorClassifier::new();
        // Matches both the authentication and validation groups
        assert_eq!(
            classifier.classify_parts(None, "invalid credentials supplied"),
            ErrorClassification::Authentication
        );
    }

    #[test]
    fn test_non_error_status_falls_back_to_message() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify_parts(Some(302), "network unreachable"),
            ErrorClassification::Network
        );
    }

    #[test]
    fn test_custom_rule_order() {
        let classifier = ErrorClassifier::from_patterns(&[
            (ErrorClassification::ServerError, "timeout"),
            (ErrorClassification::Network, "timeout"),
        ])
        .unwrap();

        assert_eq!(classifier.rules().len(), 2);
        assert_eq!(
            classifier.classify(&RecoveryError::operation("gateway timeout")),
            ErrorClassification::ServerError
        );
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = ErrorClassifier::from_patterns(&[(ErrorClassification::Network, "(")]);
        assert!(matches!(result, Err(RecoveryError::Config(_))));
    }

    #[test]
    fn test_default_retryability() {
        assert!(!ErrorClassification::Authentication.is_retryable());
        assert!(!ErrorClassification::Validation.is_retryable());
        assert!(ErrorClassification::RateLimit.is_retryable());
        assert!(ErrorClassification::Network.is_retryable());
        assert!(ErrorClassification::ServerError.is_retryable());
        assert!(ErrorClassification::Unknown.is_retryable());
    }
}
