//! `memory_inject` and `transcript_record`: the two nodes that talk to the
//! [`MemoryManager`](langgraph_core::workflow_engine::runtime::MemoryManager)
//! collaborator. Both are no-ops when no memory manager is wired into the
//! [`ExecutionContext`] — memory/retrieval is an interface the core treats as
//! optional (§1 Non-goals).

use std::sync::Arc;

use langgraph_core::workflow_engine::registry::{ExecuteFn, NodeType, OutputPort, ParameterSpec};
use langgraph_core::workflow_engine::state::format_template;
use serde_json::json;

use super::util::cfg_str;

fn memory_inject_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let query_template = cfg_str(&config, "query_template", "{input}");
            let Some(memory) = &ctx.memory else {
                return Ok(json!({}));
            };
            let query = format_template(&query_template, &state);
            let refs = memory.inject(&ctx.session_id, &query).await?;
            Ok(json!({ "memory_refs": refs }))
        })
    })
}

pub fn memory_inject_node_type() -> NodeType {
    NodeType {
        node_type: "memory_inject".to_string(),
        label: "Memory Inject".to_string(),
        description: "Query the memory collaborator and append its results to memory_refs."
            .to_string(),
        category: "memory".to_string(),
        icon: "database".to_string(),
        color: "#8b5cf6".to_string(),
        parameters: vec![ParameterSpec::string("query_template", "Query Template").with_default(json!("{input}"))],
        static_output_ports: OutputPort::default_set(),
        execute: memory_inject_execute(),
        routing: None,
        dynamic_ports: None,
    }
}

fn transcript_record_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let source_field = cfg_str(&config, "source_field", "last_output");
            if source_field.is_empty() {
                return Ok(json!({}));
            }
            let Some(memory) = &ctx.memory else {
                return Ok(json!({}));
            };
            let text = if source_field == "last_output" {
                state.last_output.clone()
            } else {
                state
                    .extra
                    .get(source_field.as_str())
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            };
            let entry = json!({
                "step": state.current_step,
                "iteration": state.iteration,
                "text": text,
            });
            memory.append_transcript(&ctx.session_id, entry).await?;
            Ok(json!({}))
        })
    })
}

pub fn transcript_record_node_type() -> NodeType {
    NodeType {
        node_type: "transcript_record".to_string(),
        label: "Transcript Record".to_string(),
        description: "Append the current step's output to the memory collaborator's transcript."
            .to_string(),
        category: "memory".to_string(),
        icon: "file-text".to_string(),
        color: "#8b5cf6".to_string(),
        parameters: vec![ParameterSpec::string("source_field", "Source Field").with_default(json!("last_output"))],
        static_output_ports: OutputPort::default_set(),
        execute: transcript_record_execute(),
        routing: None,
        dynamic_ports: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use langgraph_core::llm::{ChatModel, ChatRequest, ChatResponse};
    use langgraph_core::workflow_engine::runtime::{ExecutionContext, MemoryManager};
    use langgraph_core::workflow_engine::state::MemoryRef;
    use langgraph_core::workflow_engine::RunState;
    use langgraph_core::Message;
    use std::sync::Mutex;

    struct StubModel;
    #[async_trait::async_trait]
    impl ChatModel for StubModel {
        async fn chat(&self, _r: ChatRequest) -> langgraph_core::error::Result<ChatResponse> {
            unimplemented!()
        }
        async fn stream(
            &self,
            _r: ChatRequest,
        ) -> langgraph_core::error::Result<langgraph_core::llm::ChatStreamResponse> {
            unimplemented!()
        }

        fn clone_box(&self) -> Box<dyn ChatModel> {
            Box::new(StubModel)
        }
    }

    struct StubMemory {
        recorded: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait::async_trait]
    impl MemoryManager for StubMemory {
        async fn append_transcript(
            &self,
            _session_id: &str,
            entry: serde_json::Value,
        ) -> langgraph_core::workflow_engine::error::WorkflowResult<()> {
            self.recorded.lock().unwrap().push(entry);
            Ok(())
        }

        async fn inject(
            &self,
            _session_id: &str,
            query: &str,
        ) -> langgraph_core::workflow_engine::error::WorkflowResult<Vec<MemoryRef>> {
            Ok(vec![MemoryRef {
                id: "ref1".to_string(),
                kind: "note".to_string(),
                summary: Some(query.to_string()),
            }])
        }
    }

    #[tokio::test]
    async fn memory_inject_is_noop_without_memory_manager() {
        let nt = memory_inject_node_type();
        let state = RunState::new("hi", 5);
        let ctx = ExecutionContext::new("s1", Arc::new(StubModel));
        let delta = (nt.execute)(state, ctx, json!({})).await.unwrap();
        assert_eq!(delta, json!({}));
    }

    #[tokio::test]
    async fn memory_inject_appends_refs() {
        let nt = memory_inject_node_type();
        let state = RunState::new("weather today", 5);
        let memory = Arc::new(StubMemory { recorded: Mutex::new(Vec::new()) });
        let ctx = ExecutionContext::new("s1", Arc::new(StubModel)).with_memory(memory);
        let delta = (nt.execute)(state, ctx, json!({})).await.unwrap();
        assert_eq!(delta["memory_refs"][0]["id"], json!("ref1"));
    }

    #[tokio::test]
    async fn transcript_record_appends_entry() {
        let nt = transcript_record_node_type();
        let mut state = RunState::new("hi", 5);
        state.last_output = "done".to_string();
        let memory = Arc::new(StubMemory { recorded: Mutex::new(Vec::new()) });
        let ctx = ExecutionContext::new("s1", Arc::new(StubModel)).with_memory(memory.clone());
        (nt.execute)(state, ctx, json!({})).await.unwrap();
        assert_eq!(memory.recorded.lock().unwrap().len(), 1);
    }
}
