//! Error taxonomy for the workflow engine.
//!
//! Mirrors [`crate::error::GraphError`] in spirit: one `thiserror` enum per
//! crate boundary, no stringly-typed errors escaping a module.

use thiserror::Error;

/// Errors raised by workflow validation, compilation, and execution.
#[derive(Debug, Error)]
pub enum WorkflowEngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("session busy: a run is already in flight")]
    Busy,

    #[error("session stale: {0}")]
    Stale(String),

    #[error("workflow validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("runaway: exceeded {0} node invocations")]
    Runaway(usize),

    #[error("canceled")]
    Canceled,

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited")]
    RateLimited,

    #[error("overloaded")]
    Overloaded,

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Graph(#[from] crate::error::GraphError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowEngineError>;

impl WorkflowEngineError {
    /// Whether a caller should expect this error to be retried internally
    /// by the resilience layer rather than surfaced immediately.
    ///
    /// See [`crate::workflow_engine::resilience::classify_failure`] for the
    /// mapping from opaque model-adapter failures to [`FailureReason`](super::resilience::FailureReason);
    /// this method instead answers the question for errors already typed as
    /// `WorkflowEngineError` (e.g. after a model adapter has raised one).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WorkflowEngineError::RateLimited
                | WorkflowEngineError::Overloaded
                | WorkflowEngineError::NetworkError(_)
                | WorkflowEngineError::Timeout(_)
        )
    }
}
