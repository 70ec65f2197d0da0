//! CLI-subprocess model adapter.
//!
//! Wraps an external assistant CLI (the way a coding-agent backend wraps a
//! long-lived CLI subprocess) as a [`ChatModel`]. The subprocess keeps its
//! own conversation state across invocations, so this adapter only decides
//! *what to send it*:
//!
//! - First call: replay the whole conversation as a synthetic transcript,
//!   one `[Role]: text` line per message, so the subprocess's own session
//!   starts with full context.
//! - Later calls: the subprocess already remembers everything up to the
//!   previous turn, so only the newest human message is forwarded, with
//!   `--resume` passed to keep it attached to its existing session.
//!
//! Process failures (non-zero exit, timeout, spawn failure) are classified
//! into [`LlmError`] variants so the resilience layer's retry classifier can
//! reason about them the same way it reasons about HTTP provider failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::cli_assistant::{CliAssistant, CliAssistantConfig};
//! use langgraph_core::llm::{ChatModel, ChatRequest};
//! use langgraph_core::Message;
//!
//! let config = CliAssistantConfig::new("claude").with_model("claude-sonnet-4-20250514");
//! let assistant = CliAssistant::new(config);
//!
//! let request = ChatRequest::new(vec![Message::human("Hello!")]);
//! let response = assistant.chat(request).await?;
//! ```

use crate::error::{LlmError, Result};
use async_trait::async_trait;
use langgraph_core::error::Result as GraphResult;
use langgraph_core::llm::{ChatModel, ChatRequest, ChatResponse, ChatStreamResponse};
use langgraph_core::llm::MessageChunk;
use langgraph_core::{Message, MessageRole};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tooling::config::{get_env, get_env_or, get_env_parse_or, ConfigBuilder};

const CHUNK_SIZE: usize = 100;

/// Configuration for a [`CliAssistant`].
#[derive(Debug, Clone)]
pub struct CliAssistantConfig {
    /// Executable to invoke (e.g. `"claude"`).
    pub command: String,

    /// Fixed arguments prepended to every invocation, before the
    /// adapter's own `--model`/`--resume` flags.
    pub args: Vec<String>,

    /// Working directory the subprocess is spawned in.
    pub working_dir: Option<PathBuf>,

    /// Model identifier reported by [`ChatModel::model_name`] and forwarded
    /// as `--model` when set.
    pub model: Option<String>,

    /// System prompt forwarded as `--system-prompt` on every invocation.
    pub system_prompt: Option<String>,

    /// Per-invocation timeout.
    pub timeout: Duration,
}

impl Default for CliAssistantConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            working_dir: None,
            model: None,
            system_prompt: None,
            timeout: Duration::from_secs(300),
        }
    }
}

impl CliAssistantConfig {
    /// Create a configuration invoking the given executable.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set fixed arguments prepended to every invocation.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set the working directory the subprocess runs in.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the model identifier forwarded as `--model`.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the system prompt forwarded as `--system-prompt`.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ConfigBuilder for CliAssistantConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.command.trim().is_empty() {
            return Err(tooling::ToolingError::General(
                "CliAssistantConfig.command must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(tooling::ToolingError::General(
                "CliAssistantConfig.timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> tooling::Result<Self> {
        let command = get_env_or(&format!("{prefix}COMMAND"), "claude")?;
        let model = get_env(&format!("{prefix}MODEL"))?;
        let system_prompt = get_env(&format!("{prefix}SYSTEM_PROMPT"))?;
        let timeout_secs: u64 = get_env_parse_or(&format!("{prefix}TIMEOUT_SECS"), 300)?;

        Ok(Self {
            command,
            args: Vec::new(),
            working_dir: None,
            model,
            system_prompt,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        if !other.command.is_empty() {
            self.command = other.command;
        }
        if !other.args.is_empty() {
            self.args = other.args;
        }
        if other.working_dir.is_some() {
            self.working_dir = other.working_dir;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.system_prompt.is_some() {
            self.system_prompt = other.system_prompt;
        }
        self.timeout = other.timeout;
        self
    }
}

/// A [`ChatModel`] that delegates generation to an external CLI subprocess.
///
/// Cloning a `CliAssistant` shares the underlying invocation counter, the
/// same way cloning a handle to a running session shares that session's
/// process: both clones agree on whether the next call is the first one.
#[derive(Clone)]
pub struct CliAssistant {
    config: CliAssistantConfig,
    execution_count: Arc<AtomicUsize>,
}

impl CliAssistant {
    /// Create a new adapter around the given configuration. No subprocess
    /// is spawned until the first `chat()`/`stream()` call.
    pub fn new(config: CliAssistantConfig) -> Self {
        Self {
            config,
            execution_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of completed invocations so far.
    pub fn execution_count(&self) -> usize {
        self.execution_count.load(Ordering::SeqCst)
    }

    /// Build the prompt to send for this invocation.
    ///
    /// On the first invocation the full conversation is serialized as a
    /// transcript so the subprocess's own session starts with complete
    /// context. On later invocations only the newest human message is sent,
    /// since the subprocess already remembers everything before it.
    fn build_prompt(&self, messages: &[Message]) -> String {
        if messages.is_empty() {
            return String::new();
        }

        if self.execution_count() == 0 {
            return messages
                .iter()
                .filter_map(|msg| {
                    let prefix = match &msg.role {
                        MessageRole::System => "[System]",
                        MessageRole::Human => "[User]",
                        MessageRole::Assistant => "[Assistant]",
                        MessageRole::Tool => "[Tool Result]",
                        MessageRole::Custom(_) => return None,
                    };
                    msg.text().map(|text| format!("{prefix}: {text}"))
                })
                .collect::<Vec<_>>()
                .join("\n\n");
        }

        messages
            .iter()
            .rev()
            .find(|msg| msg.role == MessageRole::Human)
            .or_else(|| messages.last())
            .and_then(|msg| msg.text())
            .unwrap_or_default()
            .to_string()
    }

    /// Assemble the argument vector for one invocation.
    fn build_args(&self) -> Vec<String> {
        let mut args = self.config.args.clone();

        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(system_prompt) = &self.config.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        if self.execution_count() > 0 {
            args.push("--resume".to_string());
        }

        args
    }

    /// Run the subprocess once with the given prompt on stdin, returning its
    /// captured stdout. Classifies spawn, timeout, and non-zero-exit
    /// failures into [`LlmError`] variants.
    async fn run(&self, prompt: &str) -> Result<(String, Duration)> {
        let mut command = Command::new(&self.config.command);
        command
            .args(self.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();

        let mut child = command
            .spawn()
            .map_err(|e| LlmError::ServiceUnavailable(format!("failed to start {}: {e}", self.config.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| LlmError::ProviderError(format!("failed to write prompt to stdin: {e}")))?;
            // `stdin` drops here, closing the pipe so the subprocess sees EOF.
        }

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| LlmError::Timeout(format!("{} did not exit within {:?}", self.config.command, self.config.timeout)))?
            .map_err(|e| LlmError::ProviderError(format!("subprocess I/O error: {e}")))?;

        let duration = started.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(LlmError::ProviderError(format!(
                "{} exited with {}: {}",
                self.config.command, output.status, stderr
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| LlmError::InvalidResponse(format!("subprocess stdout was not UTF-8: {e}")))?;

        Ok((stdout.trim().to_string(), duration))
    }
}

#[async_trait]
impl ChatModel for CliAssistant {
    async fn chat(&self, request: ChatRequest) -> GraphResult<ChatResponse> {
        let prompt = self.build_prompt(&request.messages);
        let execution_count = self.execution_count();

        let (content, duration) = self.run(&prompt).await?;
        self.execution_count.fetch_add(1, Ordering::SeqCst);

        let mut metadata = HashMap::new();
        metadata.insert(
            "execution_count".to_string(),
            serde_json::Value::from(execution_count),
        );
        metadata.insert(
            "duration_ms".to_string(),
            serde_json::Value::from(duration.as_millis() as u64),
        );

        Ok(ChatResponse {
            message: Message::ai(content),
            usage: None,
            reasoning: None,
            metadata,
        })
    }

    async fn stream(&self, request: ChatRequest) -> GraphResult<ChatStreamResponse> {
        // The subprocess returns a complete response; streaming is
        // simulated by chunking it after the fact, the same way a buffered
        // CLI-backed model would.
        let response = self.chat(request).await?;
        let content = response.message.text().unwrap_or_default().to_string();
        let message_id = response.message.id.clone();

        let stream = async_stream::stream! {
            let mut start = 0;
            while start < content.len() {
                let end = (start + CHUNK_SIZE).min(content.len());
                let is_final = end == content.len();
                let mut chunk = MessageChunk::new(&content[start..end]);
                if let Some(id) = &message_id {
                    chunk = chunk.with_message_id(id.clone());
                }
                if is_final {
                    chunk = chunk.final_chunk();
                }
                yield chunk;
                start = end;
            }
        };

        Ok(ChatStreamResponse {
            stream: Box::pin(stream),
            reasoning_stream: None,
        })
    }

    fn model_name(&self) -> &str {
        self.config.model.as_deref().unwrap_or("unknown")
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}
