//! Error type shared by [`ChatModel`](crate::llm::ChatModel) implementations.
//!
//! Concrete [`ChatModel`](crate::llm::ChatModel) adapters live outside this
//! crate (see the `llm` crate's provider implementations); they all report
//! failures through this single enum so callers can classify them the same
//! way regardless of which provider produced them.

use thiserror::Error;

/// Errors a [`ChatModel`](crate::llm::ChatModel) implementation can report.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A request was rejected before or by the provider: bad parameters,
    /// authentication failure, rate limiting, or any other condition the
    /// caller should treat as "this exact request will not succeed".
    #[error("validation error: {0}")]
    Validation(String),

    /// A node or adapter failed while executing.
    #[error("execution error: {0}")]
    Execution(String),

    /// Failed to serialize or deserialize a value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred (subprocess, file, or network plumbing).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation did not complete within its allotted time.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Any other condition that doesn't fit the variants above.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for [`ChatModel`](crate::llm::ChatModel) operations.
pub type Result<T> = std::result::Result<T, GraphError>;
