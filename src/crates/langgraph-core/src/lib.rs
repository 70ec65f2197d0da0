//! # langgraph-core - the agent-orchestration workflow engine
//!
//! `langgraph-core` provides the data model, typed node registry, resilience
//! primitives, graph compiler, and runtime that back an agent orchestrator:
//!
//! - **Declarative workflows** - nodes and edges described as data
//!   ([`workflow_engine::workflow`]), validated before a single node runs
//! - **Typed node registry** - node types declare their parameter schema and
//!   routing behavior once, then get referenced by name from many workflows
//!   ([`workflow_engine::registry`])
//! - **Resilience primitives** - context-budget tracking, iteration gates,
//!   completion-signal parsing, and retry classification shared by every
//!   compiled workflow ([`workflow_engine::resilience`])
//! - **Compiler and runtime** - turns a validated [`workflow_engine::workflow::Workflow`]
//!   into a [`workflow_engine::compiler::CompiledWorkflow`] that can be
//!   invoked or streamed ([`workflow_engine::compiler`], [`workflow_engine::runtime`])
//! - **Message types** - conversational history shared across nodes and chat
//!   models ([`messages`])
//! - **Chat model trait** - the provider-agnostic seam concrete adapters
//!   (see the `llm` crate) implement ([`llm`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use langgraph_core::workflow_engine::{
//!     compile, registry::NodeRegistry, workflow::Workflow, ExecutionContext,
//! };
//!
//! let mut registry = NodeRegistry::new();
//! // register_all(&mut registry); // from the orchestrator crate's built-in nodes
//!
//! let workflow: Workflow = serde_json::from_str(workflow_json)?;
//! let compiled = compile(&workflow, &registry)?;
//!
//! let context = ExecutionContext::new(model, freshness_config);
//! let result = compiled.invoke(initial_state, context).await?;
//! ```
//!
//! ## Module Organization
//!
//! - [`workflow_engine`] - workflow model, node registry, resilience,
//!   compiler, and runtime
//! - [`messages`] - `Message` and the conversation-history reducers used by
//!   workflow state
//! - [`llm`] - `ChatModel` trait, request/response types, and the streaming
//!   chunk types providers implement against
//! - [`error`] - `GraphError`, the error type `ChatModel` implementations
//!   report through

pub mod error;
pub mod llm;
pub mod messages;
pub mod workflow_engine;

pub use error::{GraphError, Result};
pub use messages::{
    add_message_likes, add_messages, convert_to_messages, filter_by_role, get_last_message,
    get_messages_by_id, merge_consecutive_messages, trim_messages, truncate_messages,
    ContentPart, Message, MessageContent, MessageLike, MessageRole, RemoveMessage, TrimOptions,
    TrimStrategy,
};
