//! LLM provider implementations for acolib.
//!
//! This crate provides concrete implementations of the `ChatModel` trait from
//! `langgraph-core`. The only shipped adapter is [`cli_assistant`], which
//! wraps an external CLI subprocess (a coding-assistant binary) as a
//! `ChatModel` so the orchestrator can drive it the same way it would drive
//! an in-process API client.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::cli_assistant::{CliAssistant, CliAssistantConfig};
//! use langgraph_core::llm::{ChatModel, ChatRequest};
//! use langgraph_core::Message;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CliAssistantConfig::new("claude")
//!         .with_model("claude-sonnet-4-20250514");
//!     let assistant = CliAssistant::new(config);
//!
//!     let request = ChatRequest::new(vec![Message::human("What is Rust?")]);
//!     let response = assistant.chat(request).await?;
//!     println!("Response: {}", response.message.text().unwrap());
//!
//!     Ok(())
//! }
//! ```

pub mod cli_assistant;
pub mod error;

pub use error::{LlmError, Result};

// Re-export langgraph-core types for convenience
pub use langgraph_core::llm::{
    ChatConfig, ChatModel, ChatRequest, ChatResponse, ChatStreamResponse, ReasoningContent,
    ReasoningMode, ToolCall, ToolDefinition, ToolResult, UsageMetadata,
};
pub use langgraph_core::Message;
