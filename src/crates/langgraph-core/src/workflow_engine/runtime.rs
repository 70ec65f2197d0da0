//! The graph runtime: drives a [`CompiledWorkflow`] to termination on an
//! input, enforcing the global step cap and cancellation, and handing every
//! node an [`ExecutionContext`] through which it reaches the model adapter
//! and the memory collaborator.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::llm::{ChatModel, ChatRequest};

use super::compiler::{CompiledWorkflow, TERMINAL};
use super::error::{WorkflowEngineError, WorkflowResult};
use super::resilience::{classify_failure, plan_retry};
use super::state::RunState;

/// Opaque handle to the memory/retrieval collaborator (interface only; see
/// §1 Non-goals — the core never implements storage/retrieval itself).
#[async_trait::async_trait]
pub trait MemoryManager: Send + Sync {
    async fn append_transcript(&self, session_id: &str, entry: serde_json::Value) -> WorkflowResult<()>;
    async fn inject(&self, session_id: &str, query: &str) -> WorkflowResult<Vec<super::state::MemoryRef>>;
}

/// A cooperative cancellation flag shared between the caller and an
/// in-flight run. Checked between node invocations only — an in-flight model
/// call is not preempted.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handed to every node's `execute` function. Bundles the model adapter, the
/// memory collaborator, and per-run identity the node may want for transcript
/// entries or template substitution beyond state fields.
#[derive(Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub model: Arc<dyn ChatModel>,
    pub memory: Option<Arc<dyn MemoryManager>>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            session_id: session_id.into(),
            model,
            memory: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The underlying model adapter's model identifier, for context-budget
    /// lookups (§4.F).
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Call the model with the resilience layer's retry-with-classified-errors
    /// policy: non-recoverable failures rethrow immediately, recoverable ones
    /// retry with reason-specific backoff up to `MAX_RETRIES`.
    #[tracing::instrument(skip(self, request), fields(session_id = %self.session_id))]
    pub async fn invoke_model(&self, request: ChatRequest) -> WorkflowResult<crate::llm::ChatResponse> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.model.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let reason = classify_failure(&err.to_string());
                    let plan = plan_retry(reason, attempt);
                    if !plan.should_retry {
                        tracing::error!(?reason, attempt, "model call failed, not retrying");
                        return Err(map_failure(reason, err.to_string(), plan.delay));
                    }
                    tracing::warn!(?reason, attempt, delay = ?plan.delay, "model call failed, retrying");
                    tokio::time::sleep(plan.delay).await;
                }
            }
        }
    }
}

fn map_failure(
    reason: super::resilience::FailureReason,
    message: String,
    elapsed_budget: std::time::Duration,
) -> WorkflowEngineError {
    use super::resilience::FailureReason as F;
    match reason {
        F::RateLimited => WorkflowEngineError::RateLimited,
        F::Overloaded => WorkflowEngineError::Overloaded,
        F::Timeout => WorkflowEngineError::Timeout(elapsed_budget),
        F::NetworkError => WorkflowEngineError::NetworkError(message),
        F::Auth => WorkflowEngineError::Auth(message),
        F::InvalidInput => WorkflowEngineError::InvalidInput(message),
        F::Internal | F::Unknown => WorkflowEngineError::Internal(message),
    }
}

/// One element of a streaming run: the node that just completed and the
/// delta it produced.
#[derive(Debug, Clone)]
pub struct RunStreamEvent {
    pub node_id: String,
    pub state_delta: serde_json::Value,
}

/// A run in progress; returned by [`stream`] so the caller can drive it
/// without pinning the whole future by hand.
pub struct RunHandle<'a> {
    inner: Pin<Box<dyn Future<Output = WorkflowResult<Vec<RunStreamEvent>>> + Send + 'a>>,
}

impl<'a> RunHandle<'a> {
    pub async fn collect(self) -> WorkflowResult<Vec<RunStreamEvent>> {
        self.inner.await
    }
}

/// Run a compiled workflow to completion. §4.H: single-threaded cooperative,
/// topological walk driven by edges/routing, shallow state merge, global step
/// cap `max_iterations * 4`.
pub async fn run(
    compiled: &CompiledWorkflow,
    mut state: RunState,
    ctx: ExecutionContext,
) -> WorkflowResult<RunState> {
    let max_steps = (state.max_iterations.max(1) as usize) * 4;
    let mut node_id = compiled.entry.clone();
    let mut steps = 0usize;

    while node_id != TERMINAL {
        if ctx.cancellation().is_canceled() {
            return Err(WorkflowEngineError::Canceled);
        }
        steps += 1;
        if steps > max_steps {
            return Err(WorkflowEngineError::Runaway(max_steps));
        }

        let node_type = compiled.node_type(&node_id).ok_or_else(|| {
            WorkflowEngineError::Internal(format!("node {node_id} has no resolvable node type"))
        })?;
        let instance = compiled
            .workflow()
            .node(&node_id)
            .expect("node_type resolved implies instance exists");

        match (node_type.execute)(
            state.clone(),
            ctx.clone(),
            serde_json::Value::Object(instance.config.clone()),
        )
        .await
        {
            Ok(delta) => {
                state.merge(delta);
                // Termination rules: even when is_complete/error is set, the
                // runtime still consults outgoing wiring so "ended by node"
                // and "ended by routing" share code.
                node_id = compiled.next(&node_id, &state)?;
            }
            Err(err) => {
                tracing::error!(node_id, %err, "node execution failed, short-circuiting to end");
                state.merge(serde_json::json!({"error": err.to_string(), "is_complete": true}));
                node_id = TERMINAL.to_string();
            }
        }
    }

    Ok(state)
}

/// Streaming variant of [`run`]: yields `(node_id, state_delta)` after every
/// node completion instead of returning only the final state.
pub async fn stream(
    compiled: &CompiledWorkflow,
    mut state: RunState,
    ctx: ExecutionContext,
) -> WorkflowResult<Vec<RunStreamEvent>> {
    let max_steps = (state.max_iterations.max(1) as usize) * 4;
    let mut node_id = compiled.entry.clone();
    let mut steps = 0usize;
    let mut events = Vec::new();

    while node_id != TERMINAL {
        if ctx.cancellation().is_canceled() {
            return Err(WorkflowEngineError::Canceled);
        }
        steps += 1;
        if steps > max_steps {
            return Err(WorkflowEngineError::Runaway(max_steps));
        }

        let node_type = compiled.node_type(&node_id).ok_or_else(|| {
            WorkflowEngineError::Internal(format!("node {node_id} has no resolvable node type"))
        })?;
        let instance = compiled
            .workflow()
            .node(&node_id)
            .expect("node_type resolved implies instance exists");

        match (node_type.execute)(
            state.clone(),
            ctx.clone(),
            serde_json::Value::Object(instance.config.clone()),
        )
        .await
        {
            Ok(delta) => {
                events.push(RunStreamEvent {
                    node_id: node_id.clone(),
                    state_delta: delta.clone(),
                });
                state.merge(delta);
                node_id = compiled.next(&node_id, &state)?;
            }
            Err(err) => {
                tracing::error!(node_id, %err, "node execution failed, short-circuiting to end");
                let error_delta = serde_json::json!({"error": err.to_string(), "is_complete": true});
                events.push(RunStreamEvent {
                    node_id: node_id.clone(),
                    state_delta: error_delta.clone(),
                });
                state.merge(error_delta);
                node_id = TERMINAL.to_string();
            }
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use crate::workflow_engine::registry::{ExecuteFn, NodeRegistry, NodeType, OutputPort};
    use crate::workflow_engine::workflow::{Edge, NodeInstance, Workflow, END_NODE_TYPE, START_NODE_TYPE};
    use crate::workflow_engine::compiler::compile;
    use crate::Message;
    use serde_json::json;

    struct StubModel {
        reply: String,
    }

    #[async_trait::async_trait]
    impl ChatModel for StubModel {
        async fn chat(&self, _request: ChatRequest) -> crate::error::Result<ChatResponse> {
            Ok(ChatResponse {
                message: Message::ai(self.reply.clone()),
                usage: None,
                reasoning: None,
                metadata: Default::default(),
            })
        }

        async fn stream(&self, _request: ChatRequest) -> crate::error::Result<crate::llm::ChatStreamResponse> {
            unimplemented!("not exercised by this test")
        }
    }

    fn node(id: &str, node_type: &str) -> NodeInstance {
        NodeInstance {
            id: id.to_string(),
            node_type: node_type.to_string(),
            label: String::new(),
            config: Default::default(),
            position: (0.0, 0.0),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_port: "default".to_string(),
            label: None,
        }
    }

    fn echo_node() -> ExecuteFn {
        Arc::new(|state, _ctx, _config| {
            Box::pin(async move { Ok(json!({"last_output": format!("echo:{}", state.input)})) })
        })
    }

    #[tokio::test]
    async fn trivial_run_reaches_terminal_and_merges_state() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType {
            node_type: "echo".into(),
            label: "Echo".into(),
            description: String::new(),
            category: "test".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: OutputPort::default_set(),
            execute: echo_node(),
            routing: None,
            dynamic_ports: None,
        });
        let registry = Arc::new(registry);

        let wf = Workflow {
            id: "wf".into(),
            name: "trivial".into(),
            description: String::new(),
            nodes: vec![node("s", START_NODE_TYPE), node("n", "echo"), node("e", END_NODE_TYPE)],
            edges: vec![edge("e1", "s", "n"), edge("e2", "n", "e")],
            is_template: false,
            template_name: None,
        };
        let compiled = compile(wf, registry).unwrap();

        let state = RunState::new("Hello", 3);
        let model: Arc<dyn ChatModel> = Arc::new(StubModel { reply: "Hi".into() });
        let ctx = ExecutionContext::new("session-1", model);

        let final_state = run(&compiled, state, ctx).await.unwrap();
        assert_eq!(final_state.last_output, "echo:Hello");
    }

    #[tokio::test]
    async fn runaway_cap_is_enforced() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType {
            node_type: "loop_forever".into(),
            label: "Loop".into(),
            description: String::new(),
            category: "test".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: OutputPort::default_set(),
            execute: Arc::new(|_state, _ctx, _config| Box::pin(async { Ok(json!({})) })),
            routing: None,
            dynamic_ports: None,
        });
        let registry = Arc::new(registry);

        let wf = Workflow {
            id: "wf".into(),
            name: "loop".into(),
            description: String::new(),
            nodes: vec![node("s", START_NODE_TYPE), node("n", "loop_forever"), node("e", END_NODE_TYPE)],
            edges: vec![edge("e1", "s", "n"), edge("e2", "n", "n")],
            is_template: false,
            template_name: None,
        };
        let compiled = compile(wf, registry).unwrap();

        let state = RunState::new("x", 2);
        let model: Arc<dyn ChatModel> = Arc::new(StubModel { reply: "x".into() });
        let ctx = ExecutionContext::new("session-1", model);

        let err = run(&compiled, state, ctx).await.unwrap_err();
        assert!(matches!(err, WorkflowEngineError::Runaway(8)));
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_nodes() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType {
            node_type: "echo".into(),
            label: "Echo".into(),
            description: String::new(),
            category: "test".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: OutputPort::default_set(),
            execute: echo_node(),
            routing: None,
            dynamic_ports: None,
        });
        let registry = Arc::new(registry);

        let wf = Workflow {
            id: "wf".into(),
            name: "trivial".into(),
            description: String::new(),
            nodes: vec![node("s", START_NODE_TYPE), node("n", "echo"), node("e", END_NODE_TYPE)],
            edges: vec![edge("e1", "s", "n"), edge("e2", "n", "e")],
            is_template: false,
            template_name: None,
        };
        let compiled = compile(wf, registry).unwrap();

        let state = RunState::new("Hello", 3);
        let model: Arc<dyn ChatModel> = Arc::new(StubModel { reply: "Hi".into() });
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::new("session-1", model).with_cancellation(token);

        let err = run(&compiled, state, ctx).await.unwrap_err();
        assert!(matches!(err, WorkflowEngineError::Canceled));
    }

    #[tokio::test]
    async fn node_failure_short_circuits_to_end_with_error_set() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType {
            node_type: "boom".into(),
            label: "Boom".into(),
            description: String::new(),
            category: "test".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: OutputPort::default_set(),
            execute: Arc::new(|_state, _ctx, _config| {
                Box::pin(async { Err(WorkflowEngineError::Internal("boom".into())) })
            }),
            routing: None,
            dynamic_ports: None,
        });
        let registry = Arc::new(registry);

        let wf = Workflow {
            id: "wf".into(),
            name: "failing".into(),
            description: String::new(),
            nodes: vec![node("s", START_NODE_TYPE), node("n", "boom"), node("e", END_NODE_TYPE)],
            edges: vec![edge("e1", "s", "n"), edge("e2", "n", "e")],
            is_template: false,
            template_name: None,
        };
        let compiled = compile(wf, registry).unwrap();

        let state = RunState::new("x", 3);
        let model: Arc<dyn ChatModel> = Arc::new(StubModel { reply: "x".into() });
        let ctx = ExecutionContext::new("session-1", model);

        let final_state = run(&compiled, state, ctx).await.unwrap();
        assert!(final_state.is_complete);
        assert_eq!(final_state.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn stream_reports_node_failure_as_final_event() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType {
            node_type: "boom".into(),
            label: "Boom".into(),
            description: String::new(),
            category: "test".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: OutputPort::default_set(),
            execute: Arc::new(|_state, _ctx, _config| {
                Box::pin(async { Err(WorkflowEngineError::Internal("boom".into())) })
            }),
            routing: None,
            dynamic_ports: None,
        });
        let registry = Arc::new(registry);

        let wf = Workflow {
            id: "wf".into(),
            name: "failing".into(),
            description: String::new(),
            nodes: vec![node("s", START_NODE_TYPE), node("n", "boom"), node("e", END_NODE_TYPE)],
            edges: vec![edge("e1", "s", "n"), edge("e2", "n", "e")],
            is_template: false,
            template_name: None,
        };
        let compiled = compile(wf, registry).unwrap();

        let state = RunState::new("x", 3);
        let model: Arc<dyn ChatModel> = Arc::new(StubModel { reply: "x".into() });
        let ctx = ExecutionContext::new("session-1", model);

        let events = stream(&compiled, state, ctx).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.node_id, "n");
        assert_eq!(last.state_delta["error"], json!("boom"));
    }
}
