//! The Session: a live agent identity owning one model adapter and one
//! compiled workflow graph.
//!
//! Grounded on `agent_session_manager.py`'s session lifecycle (starting →
//! running → stopped → permanent/restored) and on `langgraph_core::compiled::execution`'s
//! `invoke`/`invoke_with_config` split between one-shot and streaming runs.

pub mod registry;
pub mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use langgraph_core::llm::ChatModel;
use langgraph_core::workflow_engine::{
    self, compiler::CompiledWorkflow, runtime, CompletionSignal, ExecutionContext, FreshnessConfig,
    RunState, WorkflowEngineError,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Manager,
    Worker,
}

impl Default for SessionRole {
    fn default() -> Self {
        SessionRole::Worker
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

/// Snapshot used for external APIs (§4.B `info()`) and as the persisted
/// metadata record a `PersistenceStore` collaborator stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub session_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub model_name: String,
    pub max_turns: Option<u32>,
    pub timeout: Option<Duration>,
    pub autonomous: bool,
    pub max_iterations: i64,
    pub role: SessionRole,
    pub manager_id: Option<String>,
    pub workflow_id: Option<String>,
    pub storage_path: String,
    pub process_identifier: Option<String>,
}

/// Parameters a caller supplies to create a Session. Kept distinct from
/// `SessionRecord` because creation parameters must be reconstructible from
/// the persisted snapshot for `restore` (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: Option<String>,
    pub session_name: String,
    pub model_name: String,
    pub max_turns: Option<u32>,
    pub timeout: Option<Duration>,
    pub autonomous: bool,
    pub max_iterations: i64,
    pub role: SessionRole,
    pub manager_id: Option<String>,
    pub workflow_id: Option<String>,
    pub storage_path: String,
    #[serde(default)]
    pub freshness: Option<FreshnessConfig>,
}

impl SessionConfig {
    /// Manager sessions default to looser freshness thresholds than worker
    /// sessions (`_build_system_prompt`'s role-based shaping).
    pub fn effective_freshness(&self) -> FreshnessConfig {
        self.freshness.unwrap_or_else(|| match self.role {
            SessionRole::Manager => FreshnessConfig {
                max_age: Duration::from_secs(72 * 3600),
                max_idle: Duration::from_secs(8 * 3600),
                max_iterations_per_session: 2_000,
                max_messages: 8_000,
            },
            SessionRole::Worker => FreshnessConfig::default(),
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            session_name: String::new(),
            model_name: String::new(),
            max_turns: None,
            timeout: None,
            autonomous: false,
            max_iterations: 50,
            role: SessionRole::Worker,
            manager_id: None,
            workflow_id: None,
            storage_path: String::new(),
            freshness: None,
        }
    }
}

impl tooling::config::ConfigBuilder for SessionConfig {
    /// Checks the invariants a caller must satisfy before `Session::create`:
    /// a non-empty model name and storage path, a positive iteration cap,
    /// and a Worker naming a manager (§4.C creation validation).
    fn validate(&self) -> tooling::Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(tooling::ToolingError::General(
                "SessionConfig.model_name must not be empty".to_string(),
            ));
        }
        if self.storage_path.trim().is_empty() {
            return Err(tooling::ToolingError::General(
                "SessionConfig.storage_path must not be empty".to_string(),
            ));
        }
        if self.max_iterations <= 0 {
            return Err(tooling::ToolingError::General(
                "SessionConfig.max_iterations must be positive".to_string(),
            ));
        }
        if self.role == SessionRole::Worker && self.manager_id.is_none() {
            return Err(tooling::ToolingError::General(
                "SessionConfig.manager_id is required for Worker sessions".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the session-wide defaults a deployment tunes once (model name,
    /// storage root, autonomy, iteration cap) from the environment. Per-call
    /// identity (`session_id`, `session_name`, `manager_id`, `workflow_id`)
    /// is always supplied by the caller, not the environment.
    fn from_env(prefix: &str) -> tooling::Result<Self> {
        use tooling::config::{get_env_bool, get_env_or, get_env_parse_or};

        let defaults = Self::default();
        let model_name = get_env_or(&format!("{prefix}MODEL_NAME"), defaults.model_name.clone())?;
        let storage_path = get_env_or(&format!("{prefix}STORAGE_PATH"), defaults.storage_path.clone())?;
        let autonomous = get_env_bool(&format!("{prefix}AUTONOMOUS"))?.unwrap_or(defaults.autonomous);
        let max_iterations: i64 =
            get_env_parse_or(&format!("{prefix}MAX_ITERATIONS"), defaults.max_iterations)?;

        Ok(Self {
            model_name,
            storage_path,
            autonomous,
            max_iterations,
            ..defaults
        })
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        if other.session_id.is_some() {
            self.session_id = other.session_id;
        }
        if !other.session_name.is_empty() {
            self.session_name = other.session_name;
        }
        if !other.model_name.is_empty() {
            self.model_name = other.model_name;
        }
        if other.max_turns.is_some() {
            self.max_turns = other.max_turns;
        }
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
        self.autonomous = other.autonomous;
        self.max_iterations = other.max_iterations;
        self.role = other.role;
        if other.manager_id.is_some() {
            self.manager_id = other.manager_id;
        }
        if other.workflow_id.is_some() {
            self.workflow_id = other.workflow_id;
        }
        if !other.storage_path.is_empty() {
            self.storage_path = other.storage_path;
        }
        if other.freshness.is_some() {
            self.freshness = other.freshness;
        }
        self
    }
}

/// The result of `execute`: a legacy single-shot passthrough to the model
/// adapter, bypassing the graph.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub output: String,
    pub duration: Duration,
    pub tool_call_count: usize,
}

/// A live agent identity: one model adapter + one compiled graph +
/// execution state. Shareable across callers only under the busy-guard
/// discipline (§4.B concurrency).
pub struct Session {
    record: tokio::sync::RwLock<SessionRecord>,
    model: Arc<dyn ChatModel>,
    graph: tokio::sync::RwLock<Option<CompiledWorkflow>>,
    freshness: FreshnessConfig,
    busy: Arc<tokio::sync::Mutex<()>>,
    stopped: AtomicBool,
    created_instant: Instant,
    last_activity_instant: std::sync::Mutex<Instant>,
    last_state: tokio::sync::Mutex<Option<RunState>>,
}

impl Session {
    /// `create(config) -> Session`. Idempotent across retries: building a
    /// Session from the same config twice is side-effect-free on this type
    /// (actual process spawn lives in the model adapter's own constructor).
    pub fn create(config: SessionConfig, model: Arc<dyn ChatModel>, graph: Option<CompiledWorkflow>) -> Self {
        let now = Utc::now();
        let session_id = config.session_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let record = SessionRecord {
            session_id,
            session_name: config.session_name.clone(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Running,
            error_message: None,
            model_name: config.model_name.clone(),
            max_turns: config.max_turns,
            timeout: config.timeout,
            autonomous: config.autonomous,
            max_iterations: config.max_iterations,
            role: config.role,
            manager_id: config.manager_id.clone(),
            workflow_id: config.workflow_id.clone(),
            storage_path: config.storage_path.clone(),
            process_identifier: None,
        };
        Self {
            freshness: config.effective_freshness(),
            record: tokio::sync::RwLock::new(record),
            model,
            graph: tokio::sync::RwLock::new(graph),
            busy: Arc::new(tokio::sync::Mutex::new(())),
            stopped: AtomicBool::new(false),
            created_instant: Instant::now(),
            last_activity_instant: std::sync::Mutex::new(Instant::now()),
            last_state: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn info(&self) -> SessionRecord {
        self.record.read().await.clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    async fn touch(&self) {
        let mut record = self.record.write().await;
        record.last_activity = Utc::now();
        *self.last_activity_instant.lock().unwrap() = Instant::now();
    }

    /// Freshness check, run at the entry of `invoke`/`stream`.
    async fn check_freshness(&self) -> Result<()> {
        let iterations = self
            .last_state
            .lock()
            .await
            .as_ref()
            .map(|s| s.iteration)
            .unwrap_or(0);
        let message_count = self
            .last_state
            .lock()
            .await
            .as_ref()
            .map(|s| s.messages.len())
            .unwrap_or(0);
        let age = self.created_instant.elapsed();
        let idle = self.last_activity_instant.lock().unwrap().elapsed();

        let verdict = workflow_engine::evaluate_freshness(age, idle, iterations, message_count, &self.freshness);
        if verdict.should_reset {
            let reason = verdict.reason.unwrap_or_default();
            let mut record = self.record.write().await;
            record.status = SessionStatus::Error;
            record.error_message = Some(reason.clone());
            return Err(OrchestratorError::Stale(reason));
        }
        Ok(())
    }

    /// `invoke(input_text, max_iterations?, thread_id?) -> string`. Runs the
    /// graph to completion. Node failures never reach here as an `Err`: the
    /// runtime catches them, writes `state.error`, and routes to `end`, so
    /// the only `Err` this can still return is a genuine runtime fault
    /// (`Canceled`, `Runaway`, an unresolvable node) rather than a node's own
    /// failure, and `Busy`/`Stale` from the guards above.
    pub async fn invoke(&self, input_text: &str, max_iterations_override: Option<i64>) -> Result<String> {
        self.check_freshness().await?;
        let _permit = self.busy.clone().try_lock_owned().map_err(|_| OrchestratorError::Busy)?;
        self.touch().await;

        let Some(graph) = self.graph.read().await.clone() else {
            return Err(OrchestratorError::InitFailed(
                "session has no compiled graph; use execute() for raw model access".to_string(),
            ));
        };

        let max_iterations = max_iterations_override.unwrap_or_else(|| self.record.try_read().map(|r| r.max_iterations).unwrap_or(25));
        let mut state = RunState::new(input_text, max_iterations);
        if let Some(prior) = self.last_state.lock().await.clone() {
            state.messages = prior.messages;
        }

        let record = self.record.read().await;
        let session_id = record.session_id.clone();
        drop(record);

        let ctx = ExecutionContext::new(session_id, self.model.clone());
        let final_state = runtime::run(&graph, state, ctx).await?;
        let output = match &final_state.error {
            Some(message) => format!("Error: {message}"),
            None => final_state.final_answer(),
        };
        *self.last_state.lock().await = Some(final_state);
        Ok(output)
    }

    /// `stream(input_text, ...) -> async sequence`: yields one element per
    /// node completion. Folds every yielded delta into `last_state` the same
    /// way `invoke` does, so a node failure mid-stream leaves the same
    /// final-state shape (`error` set, `is_complete` true) behind for a
    /// following `get_state`/`invoke` call to see.
    pub async fn stream(
        &self,
        input_text: &str,
        max_iterations_override: Option<i64>,
    ) -> Result<Vec<runtime::RunStreamEvent>> {
        self.check_freshness().await?;
        let _permit = self.busy.clone().try_lock_owned().map_err(|_| OrchestratorError::Busy)?;
        self.touch().await;

        let Some(graph) = self.graph.read().await.clone() else {
            return Err(OrchestratorError::InitFailed(
                "session has no compiled graph; use execute() for raw model access".to_string(),
            ));
        };

        let max_iterations = max_iterations_override.unwrap_or(25);
        let mut state = RunState::new(input_text, max_iterations);
        if let Some(prior) = self.last_state.lock().await.clone() {
            state.messages = prior.messages;
        }
        let mut final_state = state.clone();

        let record = self.record.read().await;
        let session_id = record.session_id.clone();
        drop(record);

        let ctx = ExecutionContext::new(session_id, self.model.clone());
        let events = runtime::stream(&graph, state, ctx).await?;
        for event in &events {
            final_state.merge(event.state_delta.clone());
        }
        *self.last_state.lock().await = Some(final_state);
        Ok(events)
    }

    /// `execute(prompt, timeout, ...) -> {output, cost, duration, tool_calls}`:
    /// legacy single-shot passthrough to the model adapter, bypassing the
    /// graph entirely.
    pub async fn execute(&self, prompt: &str) -> Result<ExecuteResult> {
        self.touch().await;
        let started = Instant::now();
        let request = langgraph_core::llm::ChatRequest::new(vec![langgraph_core::Message::human(prompt)]);
        let response = self
            .model
            .chat(request)
            .await
            .map_err(|e| OrchestratorError::General(e.to_string()))?;
        Ok(ExecuteResult {
            output: response.message.text().unwrap_or("").to_string(),
            duration: started.elapsed(),
            tool_call_count: 0,
        })
    }

    /// `stop`/`cleanup`: safe to call multiple times.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut record = self.record.write().await;
        record.status = SessionStatus::Stopped;
    }

    /// `upgrade`: convert a bare model-only session into a graph-wrapped one
    /// in place, reusing the same model adapter instance.
    pub async fn upgrade(&self, graph: CompiledWorkflow) {
        *self.graph.write().await = Some(graph);
    }

    pub fn last_completion_signal(&self) -> Option<CompletionSignal> {
        self.last_state.try_lock().ok().and_then(|s| s.as_ref().map(|s| s.completion_signal))
    }

    /// `get_state(thread_id?) -> RunState`: the state left behind by the most
    /// recent `invoke`/`stream` call, or `None` before the first run. A
    /// Session holds exactly one thread of execution, so `thread_id` is
    /// accepted for interface symmetry with a future multi-thread checkpoint
    /// store but otherwise unused here.
    pub async fn get_state(&self, _thread_id: Option<&str>) -> Option<RunState> {
        self.last_state.lock().await.clone()
    }

    /// `get_history(thread_id?) -> [Message]`: the accumulated message
    /// transcript from the most recent run, empty before the first one.
    pub async fn get_history(&self, thread_id: Option<&str>) -> Vec<langgraph_core::Message> {
        self.get_state(thread_id).await.map(|s| s.messages).unwrap_or_default()
    }

    /// `visualize() -> string`: a human-readable node/edge dump of the
    /// compiled graph, one line per edge in declaration order. Not a
    /// rendered diagram — no layout engine is part of this crate's scope.
    pub async fn visualize(&self) -> Option<String> {
        let graph = self.graph.read().await;
        let graph = graph.as_ref()?;
        let workflow = graph.workflow();
        let mut out = format!("workflow {} ({})\n", workflow.name, workflow.id);
        for edge in &workflow.edges {
            out.push_str(&format!(
                "  {} --[{}]--> {}\n",
                edge.source, edge.source_port, edge.target
            ));
        }
        Some(out)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("is_alive", &self.is_alive())
            .finish()
    }
}
