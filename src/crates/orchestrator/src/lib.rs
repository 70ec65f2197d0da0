//! The agent orchestrator core: the Session lifecycle, the session registry,
//! and the built-in workflow-graph node library.
//!
//! The workflow graph model, node registry, compiler, runtime, and resilience
//! primitives live in [`langgraph_core::workflow_engine`] — this crate builds
//! the session layer on top of it and supplies the concrete node
//! implementations that a compiled workflow dispatches to.
//!
//! Out of scope here, per this system's specification: the HTTP/REST layer,
//! SSE streaming framing, a persistent key-value store, a configuration-file
//! reader, per-session log sinks, the external assistant CLI process itself,
//! and any memory/retrieval subsystem. Those are external collaborators;
//! this crate only defines the trait boundaries ([`session::store::PersistenceStore`],
//! [`session::store::WorkflowStore`]) they must satisfy.

pub mod nodes;
pub mod session;
pub mod version;

use thiserror::Error;

/// Errors surfaced by the orchestration core (§7 error taxonomy).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Session or workflow id lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent invoke on the same Session.
    #[error("session busy: a run is already in flight")]
    Busy,

    /// Freshness evaluator tripped.
    #[error("session stale: {0}")]
    Stale(String),

    /// Modify/delete attempt on a template workflow.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Model adapter init or irrecoverable session failure.
    #[error("session init failed: {0}")]
    InitFailed(String),

    /// Invalid state transition (e.g. worker-role session used as a manager).
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// General error not otherwise classified.
    #[error("orchestrator error: {0}")]
    General(String),

    /// Serialization error round-tripping a persisted record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A workflow graph engine error surfaced out of a run.
    #[error(transparent)]
    Workflow(#[from] langgraph_core::workflow_engine::WorkflowEngineError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
