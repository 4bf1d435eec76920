//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// The operation was interrupted by a cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// A spawned task panicked or was aborted before producing a result
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a task failure error.
    pub fn task_failed(msg: impl std::fmt::Display) -> Self {
        Self::TaskFailed(msg.to_string())
    }
}
