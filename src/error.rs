//! Structured error types for queue operations and task records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic error handling.
///
/// The same codes are persisted on a task's `error_kind` column so that read
/// operations can surface why a task failed without parsing free text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Rejected before enqueue
    ValidationError,

    // Terminal task failures
    SafetyViolation,
    ProviderFailure,
    ProviderRateLimited,
    CrashDetected,

    // Non-fatal or transient
    GitOperationFailure,
    LockDenied,
    DependencyUnsatisfiable,

    // Lookup / state errors
    TaskNotFound,
    InvalidTransition,

    // Internal errors
    DatabaseError,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::SafetyViolation => "SAFETY_VIOLATION",
            ErrorCode::ProviderFailure => "PROVIDER_FAILURE",
            ErrorCode::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            ErrorCode::CrashDetected => "CRASH_DETECTED",
            ErrorCode::GitOperationFailure => "GIT_OPERATION_FAILURE",
            ErrorCode::LockDenied => "LOCK_DENIED",
            ErrorCode::DependencyUnsatisfiable => "DEPENDENCY_UNSATISFIABLE",
            ErrorCode::TaskNotFound => "TASK_NOT_FOUND",
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "VALIDATION_ERROR" => Some(ErrorCode::ValidationError),
            "SAFETY_VIOLATION" => Some(ErrorCode::SafetyViolation),
            "PROVIDER_FAILURE" => Some(ErrorCode::ProviderFailure),
            "PROVIDER_RATE_LIMITED" => Some(ErrorCode::ProviderRateLimited),
            "CRASH_DETECTED" => Some(ErrorCode::CrashDetected),
            "GIT_OPERATION_FAILURE" => Some(ErrorCode::GitOperationFailure),
            "LOCK_DENIED" => Some(ErrorCode::LockDenied),
            "DEPENDENCY_UNSATISFIABLE" => Some(ErrorCode::DependencyUnsatisfiable),
            "TASK_NOT_FOUND" => Some(ErrorCode::TaskNotFound),
            "INVALID_TRANSITION" => Some(ErrorCode::InvalidTransition),
            "DATABASE_ERROR" => Some(ErrorCode::DatabaseError),
            "CONFIG_ERROR" => Some(ErrorCode::ConfigError),
            "INTERNAL_ERROR" => Some(ErrorCode::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error for queue operations.
///
/// Travels through `anyhow::Error` and can be recovered with
/// `err.downcast_ref::<TaskError>()` by callers that need the code.
#[derive(Debug, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::ValidationError, format!("{} is required", field)).with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, reason).with_field(field)
    }

    pub fn task_not_found(task_id: i64) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {}", task_id))
    }

    pub fn invalid_transition(task_id: i64, from: &str, to: &str) -> Self {
        Self::new(
            ErrorCode::InvalidTransition,
            format!("Task {} cannot move from '{}' to '{}'", task_id, from, to),
        )
    }

    pub fn safety_violation(pattern: &str) -> Self {
        Self::new(
            ErrorCode::SafetyViolation,
            format!("Task text matches denylisted pattern '{}'", pattern),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl From<rusqlite::Error> for TaskError {
    fn from(err: rusqlite::Error) -> Self {
        TaskError::database(err)
    }
}

/// Recover the error code carried by an `anyhow::Error`, if any.
pub fn error_code_of(err: &anyhow::Error) -> Option<ErrorCode> {
    err.downcast_ref::<TaskError>().map(|e| e.code)
}

/// Result type for operations that fail with a structured error.
pub type TaskResult<T> = std::result::Result<T, TaskError>;
