//! Error types for the data-access layer.
//!
//! Every driver failure (sqlx, redis) is caught at the boundary where it happens
//! and translated into one of the variants below. Raw driver errors never leave
//! this crate; their details only go to the debug log.

use thiserror::Error;

/// Message rendered to clients for every internal fault.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred, please try again";

#[derive(Error, Debug)]
pub enum DbError {
    /// An accessor was used before the owning manager was connected.
    #[error("{resource} is not connected, was the connect function called?")]
    Unavailable { resource: String },

    #[error("Operation failed: {operation}")]
    OperationFailed { operation: String },

    #[error("A single row query came back empty or with multiple rows (rows: {rows})")]
    EmptyOrAmbiguous { rows: usize },

    #[error("Type mismatch: expected '{expected}' - {message}")]
    TypeMismatch { expected: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create an unavailable error for the given resource.
    pub fn unavailable(resource: impl Into<String>) -> Self {
        Self::Unavailable {
            resource: resource.into(),
        }
    }

    /// Create an operation-failed error.
    pub fn operation_failed(operation: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
        }
    }

    /// Create an empty-or-ambiguous result error.
    pub fn empty_or_ambiguous(rows: usize) -> Self {
        Self::EmptyOrAmbiguous { rows }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only execution failures are retried. Sequencing defects, cardinality
    /// and type errors would come back the same on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OperationFailed { .. })
    }

    /// HTTP status code the web layer should render for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 400,
            _ => 500,
        }
    }

    /// Client-facing message. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput { message } => message.clone(),
            _ => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Result type alias for data-access operations.
pub type DbResult<T> = Result<T, DbError>;
