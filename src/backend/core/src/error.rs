//! Error handling for Apex Sched.
//!
//! This module provides:
//! - A single error type with machine-readable codes and context chaining
//! - User-facing vs internal messages
//! - Severity mapping used when logging
//! - Metrics integration for error tracking
//!
//! Nothing in the scheduling path is fatal: errors raised while arbitrating a
//! tick are logged and degrade to "this tick did not run here". Only job
//! registration surfaces errors to the caller.
//!
//! # Usage
//!
//! ```rust,ignore
//! use apex_sched::error::{ApexError, ErrorCode, ErrorContext, Result};
//!
//! fn parse_limit(raw: &str) -> Result<u32> {
//!     raw.parse::<u32>().with_error_code(ErrorCode::InvalidConfiguration)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Apex Sched operations.
pub type Result<T> = std::result::Result<T, ApexError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Scheduling Errors (1000-1099)
    InvalidCronRule,
    JobNotFound,
    EngineShutdown,
    ScheduleExhausted,

    // Store Errors (2100-2199)
    StoreError,
    StoreConnectionFailed,
    StoreTimeout,
    ScriptFailed,
    InvalidStoredValue,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidCronRule => 1000,
            Self::JobNotFound => 1001,
            Self::EngineShutdown => 1002,
            Self::ScheduleExhausted => 1003,

            Self::StoreError => 2100,
            Self::StoreConnectionFailed => 2101,
            Self::StoreTimeout => 2102,
            Self::ScriptFailed => 2103,
            Self::InvalidStoredValue => 2104,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Check if this error is transient.
    ///
    /// Retryable errors are never retried within a tick; the next natural
    /// tick attempts arbitration again.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreError | Self::StoreConnectionFailed | Self::StoreTimeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "scheduling",
            2100..=2199 => "store",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (malformed rules, unknown jobs)
    Low,
    /// Operational issues (timeouts, shutdown races)
    Medium,
    /// System errors (store failures, bad configuration)
    High,
    /// Errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidCronRule | ErrorCode::JobNotFound | ErrorCode::ScheduleExhausted => {
                Self::Low
            }

            ErrorCode::EngineShutdown | ErrorCode::StoreTimeout => Self::Medium,

            ErrorCode::StoreError
            | ErrorCode::ScriptFailed
            | ErrorCode::InvalidStoredValue
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::StoreConnectionFailed | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Apex Sched.
#[derive(Error, Debug)]
pub struct ApexError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ApexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl ApexError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create an invalid cron rule error.
    pub fn invalid_rule(rule: impl AsRef<str>, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidCronRule,
            format!("Invalid cron rule '{}'", rule.as_ref()),
            reason,
        )
    }

    /// Create a job not found error.
    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", job_id))
    }

    /// Create an error for a job whose rule has no fire time left.
    pub fn schedule_exhausted(job_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ScheduleExhausted,
            format!("Job {} has no upcoming run", job_id),
        )
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "apex_sched_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ApexError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| ApexError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ApexError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| ApexError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for ApexError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (
                ErrorCode::StoreConnectionFailed,
                "Unable to connect to synchronization store",
            )
        } else if error.is_timeout() {
            (
                ErrorCode::StoreTimeout,
                "Synchronization store operation timed out",
            )
        } else if error.kind() == redis::ErrorKind::ExtensionError
            || error.kind() == redis::ErrorKind::ResponseError
        {
            (
                ErrorCode::ScriptFailed,
                "Synchronization store rejected the command",
            )
        } else {
            (
                ErrorCode::StoreError,
                "A synchronization store error occurred",
            )
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<cron::error::Error> for ApexError {
    fn from(error: cron::error::Error) -> Self {
        Self::with_internal(
            ErrorCode::InvalidCronRule,
            "Invalid cron rule",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for ApexError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for ApexError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::StoreTimeout,
            "Operation timed out",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<std::io::Error> for ApexError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::TimedOut => (ErrorCode::StoreTimeout, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::StoreConnectionFailed, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for ApexError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<ApexError>() {
            Ok(apex_error) => apex_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for ApexError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration could not be parsed",
            ),
            config::ConfigError::Type { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration value has the wrong type",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::StoreConnectionFailed.is_retryable());
        assert!(ErrorCode::StoreTimeout.is_retryable());
        assert!(!ErrorCode::InvalidCronRule.is_retryable());
        assert!(!ErrorCode::ScriptFailed.is_retryable());
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::InvalidCronRule.category(), "scheduling");
        assert_eq!(ErrorCode::ScriptFailed.category(), "store");
        assert_eq!(ErrorCode::InvalidConfiguration.category(), "configuration");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_invalid_rule_error() {
        let error = ApexError::invalid_rule("* * *", "expected 6 fields, found 3");
        assert_eq!(error.code(), ErrorCode::InvalidCronRule);
        assert!(error.user_message().contains("* * *"));
        assert_eq!(error.internal_message(), Some("expected 6 fields, found 3"));
        assert_eq!(error.severity(), ErrorSeverity::Low);
    }

    #[test]
    fn test_schedule_exhausted_error() {
        let error = ApexError::schedule_exhausted("job-1");
        assert_eq!(error.code(), ErrorCode::ScheduleExhausted);
        assert_eq!(error.code().numeric_code(), 1003);
        assert_eq!(error.code().category(), "scheduling");
        assert!(!error.code().is_retryable());
        assert!(error.user_message().contains("job-1"));
    }

    #[test]
    fn test_error_context_on_option() {
        let missing: Option<u32> = None;
        let error = missing.with_error_code(ErrorCode::JobNotFound).unwrap_err();
        assert_eq!(error.code(), ErrorCode::JobNotFound);
    }

    #[test]
    fn test_error_context_on_result() {
        let parsed: std::result::Result<i64, _> = "abc".parse::<i64>();
        let error = parsed.with_error_code(ErrorCode::InvalidStoredValue).unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidStoredValue);
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_from_cron_error() {
        let parse = <cron::Schedule as std::str::FromStr>::from_str("not a rule");
        let error: ApexError = parse.unwrap_err().into();
        assert_eq!(error.code(), ErrorCode::InvalidCronRule);
    }

    #[test]
    fn test_error_display() {
        let error = ApexError::with_internal(
            ErrorCode::StoreConnectionFailed,
            "Unable to connect to synchronization store",
            "Connection refused: 127.0.0.1:6379",
        );

        let display = format!("{}", error);
        assert!(display.contains("StoreConnectionFailed"));
        assert!(display.contains("Unable to connect"));
        assert!(display.contains("Connection refused"));
    }
}
