//! Response types returned by [`ChatModel::chat`](crate::llm::ChatModel::chat)
//! and [`ChatModel::stream`](crate::llm::ChatModel::stream).

use crate::llm::stream::{MessageChunkStream, TokenStream};
use crate::Message;
use serde_json::Value;
use std::collections::HashMap;

/// Token usage reported by a provider for one `chat()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageMetadata {
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Tokens spent on a thinking model's separated reasoning pass, if any.
    pub reasoning_tokens: Option<usize>,
    pub total_tokens: usize,
}

impl UsageMetadata {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            reasoning_tokens: None,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn with_reasoning(input_tokens: usize, output_tokens: usize, reasoning_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            reasoning_tokens: Some(reasoning_tokens),
            total_tokens: input_tokens + output_tokens + reasoning_tokens,
        }
    }
}

/// The separated reasoning/thinking content of a thinking model's response.
#[derive(Debug, Clone)]
pub struct ReasoningContent {
    pub content: String,
}

impl ReasoningContent {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// A complete response from a [`ChatModel::chat`](crate::llm::ChatModel::chat) call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant's response message.
    pub message: Message,

    /// Token usage, when the provider reports it.
    pub usage: Option<UsageMetadata>,

    /// Separated reasoning content, for thinking models using
    /// `ReasoningMode::Separated`.
    pub reasoning: Option<ReasoningContent>,

    /// Provider-specific metadata (model name, finish reason, etc.).
    pub metadata: HashMap<String, Value>,
}

/// A streaming response from a [`ChatModel::stream`](crate::llm::ChatModel::stream) call.
pub struct ChatStreamResponse {
    /// The stream of message chunks.
    pub stream: MessageChunkStream,

    /// The stream of reasoning tokens, for thinking models, if the provider
    /// separates reasoning from the final answer while streaming.
    pub reasoning_stream: Option<TokenStream>,
}
