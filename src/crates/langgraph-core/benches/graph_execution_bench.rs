use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use langgraph_core::llm::{ChatModel, ChatRequest, ChatResponse, ChatStreamResponse};
use langgraph_core::workflow_engine::registry::{ExecuteFn, NodeRegistry, NodeType, OutputPort};
use langgraph_core::workflow_engine::workflow::{Edge, NodeInstance, Workflow, END_NODE_TYPE, START_NODE_TYPE};
use langgraph_core::workflow_engine::{compile, runtime, ExecutionContext, RunState};
use langgraph_core::Message;
use serde_json::json;

#[derive(Clone)]
struct EchoModel;

#[async_trait::async_trait]
impl ChatModel for EchoModel {
    async fn chat(&self, request: ChatRequest) -> langgraph_core::Result<ChatResponse> {
        Ok(ChatResponse {
            message: Message::ai(request.messages.last().and_then(|m| m.text()).unwrap_or("").to_string()),
            usage: None,
            reasoning: None,
            metadata: Default::default(),
        })
    }

    async fn stream(&self, _request: ChatRequest) -> langgraph_core::Result<ChatStreamResponse> {
        unimplemented!("not exercised by this benchmark")
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
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

/// `start -> echo -> echo -> echo -> end`: a small linear chain, enough to
/// exercise the compiler's edge-grouping and the runtime's merge-then-route
/// loop without a model call on the hot path.
fn chained_echo_workflow() -> (Workflow, Arc<NodeRegistry>) {
    let echo: ExecuteFn = Arc::new(|state, _ctx, _config| {
        Box::pin(async move { Ok(json!({"last_output": format!("echo:{}", state.input)})) })
    });

    let mut registry = NodeRegistry::new();
    registry.register(NodeType {
        node_type: "echo".into(),
        label: "Echo".into(),
        description: String::new(),
        category: "bench".into(),
        icon: String::new(),
        color: String::new(),
        parameters: vec![],
        static_output_ports: OutputPort::default_set(),
        execute: echo,
        routing: None,
        dynamic_ports: None,
    });

    let wf = Workflow {
        id: "bench".into(),
        name: "chained echo".into(),
        description: String::new(),
        nodes: vec![
            node("s", START_NODE_TYPE),
            node("n1", "echo"),
            node("n2", "echo"),
            node("n3", "echo"),
            node("e", END_NODE_TYPE),
        ],
        edges: vec![
            edge("e1", "s", "n1"),
            edge("e2", "n1", "n2"),
            edge("e3", "n2", "n3"),
            edge("e4", "n3", "e"),
        ],
        is_template: false,
        template_name: None,
    };
    (wf, Arc::new(registry))
}

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("compile chained echo workflow", |b| {
        b.iter(|| {
            let (wf, registry) = chained_echo_workflow();
            black_box(compile(wf, registry).unwrap());
        });
    });
}

fn run_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (wf, registry) = chained_echo_workflow();
    let compiled = compile(wf, registry).unwrap();
    let model: Arc<dyn ChatModel> = Arc::new(EchoModel);

    c.bench_function("run chained echo workflow", |b| {
        b.to_async(&rt).iter(|| {
            let compiled = compiled.clone();
            let model = model.clone();
            async move {
                let state = RunState::new("hello", 5);
                let ctx = ExecutionContext::new("bench-session", model);
                black_box(runtime::run(&compiled, state, ctx).await.unwrap());
            }
        });
    });
}

criterion_group!(benches, compile_benchmark, run_benchmark);
criterion_main!(benches);
