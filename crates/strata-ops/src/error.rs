//! Error types for cancellable operations

use thiserror::Error;

/// Reasons an operation did not fulfil
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Operation failed: {0}")]
    Failed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation abandoned before settling")]
    Abandoned,

    #[error("Operation outcome already taken")]
    OutcomeTaken,
}

/// Result type for cancellable operations
pub type OperationResult<T> = Result<T, OperationError>;
