//! Core Error Types
//!
//! Defines the foundational error types used across the Convo Tasks workspace.
//! These error types are dependency-free (only thiserror + std) to keep the core
//! crate lightweight.
//!
//! The root crate extends these with storage variants (Database, Sqlite, Io)
//! that require heavier dependencies.

use thiserror::Error;

/// Core error type for the Convo Tasks workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid caller input (empty rejection reason, malformed window, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown run or proposal id
    #[error("Not found: {0}")]
    NotFound(String),

    /// State conflicts (unclosed run exists, invalid transition)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Failures raised by external collaborators while a run executes
    #[error("Execution error: {0}")]
    Execution(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
