//! `post_model`: bookkeeping that runs immediately after a model call —
//! increments the iteration counter, optionally parses the completion signal
//! out of the model's last output, and optionally appends a transcript entry.

use std::sync::Arc;

use langgraph_core::workflow_engine::registry::{ExecuteFn, NodeType, OutputPort, ParameterSpec};
use langgraph_core::workflow_engine::resilience::{parse_completion_signal, CompletionSignal};
use serde_json::{json, Value};

use super::util::{cfg_bool, cfg_str};

fn execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let increment_field = cfg_str(&config, "increment_field", "iteration");
            let detect_completion = cfg_bool(&config, "detect_completion", true);
            let source_field = cfg_str(&config, "source_field", "last_output");
            let record_transcript = cfg_bool(&config, "record_transcript", false);

            let mut delta = serde_json::Map::new();

            let current = if increment_field == "iteration" {
                state.iteration
            } else {
                state
                    .extra
                    .get(increment_field.as_str())
                    .and_then(Value::as_i64)
                    .unwrap_or(0)
            };
            delta.insert(increment_field.clone(), json!(current + 1));

            if detect_completion {
                if source_field.is_empty() {
                    delta.insert("completion_signal".to_string(), json!(CompletionSignal::None));
                } else {
                    let text = if source_field == "last_output" {
                        state.last_output.clone()
                    } else {
                        state
                            .extra
                            .get(source_field.as_str())
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string()
                    };
                    let (signal, detail) = parse_completion_signal(&text);
                    delta.insert("completion_signal".to_string(), json!(signal));
                    if let Some(detail) = detail {
                        delta.insert("completion_detail".to_string(), json!(detail));
                    }
                    if matches!(
                        signal,
                        CompletionSignal::Complete | CompletionSignal::Blocked | CompletionSignal::Error
                    ) {
                        delta.insert("is_complete".to_string(), json!(true));
                    }
                }
            }

            if record_transcript {
                if let Some(memory) = &ctx.memory {
                    let entry = json!({
                        "step": state.current_step,
                        "iteration": current + 1,
                        "text": state.last_output,
                    });
                    memory.append_transcript(&ctx.session_id, entry).await?;
                }
            }

            Ok(Value::Object(delta))
        })
    })
}

pub fn node_type() -> NodeType {
    NodeType {
        node_type: "post_model".to_string(),
        label: "Post-Model".to_string(),
        description: "Increment iteration count, parse completion signal, record transcript."
            .to_string(),
        category: "control".to_string(),
        icon: "check-circle".to_string(),
        color: "#6366f1".to_string(),
        parameters: vec![
            ParameterSpec::string("increment_field", "Increment Field").with_default(json!("iteration")),
            ParameterSpec::string("detect_completion", "Detect Completion").with_default(json!(true)),
            ParameterSpec::string("source_field", "Source Field").with_default(json!("last_output")),
            ParameterSpec::string("record_transcript", "Record Transcript").with_default(json!(false)),
        ],
        static_output_ports: OutputPort::default_set(),
        execute: execute(),
        routing: None,
        dynamic_ports: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use langgraph_core::workflow_engine::runtime::ExecutionContext;
    use langgraph_core::workflow_engine::RunState;
    use langgraph_core::llm::ChatModel;

    struct StubModel;
    #[async_trait::async_trait]
    impl ChatModel for StubModel {
        async fn chat(
            &self,
            _r: langgraph_core::llm::ChatRequest,
        ) -> langgraph_core::error::Result<langgraph_core::llm::ChatResponse> {
            unimplemented!()
        }
        async fn stream(
            &self,
            _r: langgraph_core::llm::ChatRequest,
        ) -> langgraph_core::error::Result<langgraph_core::llm::ChatStreamResponse> {
            unimplemented!()
        }

        fn clone_box(&self) -> Box<dyn ChatModel> {
            Box::new(StubModel)
        }
    }

    #[tokio::test]
    async fn increments_iteration_and_detects_completion() {
        let nt = node_type();
        let mut state = RunState::new("hi", 5);
        state.last_output = "all done [TASK_COMPLETE]".to_string();
        let ctx = ExecutionContext::new("s1", std::sync::Arc::new(StubModel));
        let delta = (nt.execute)(state, ctx, json!({})).await.unwrap();
        assert_eq!(delta["iteration"], json!(1));
        assert_eq!(delta["completion_signal"], json!("complete"));
        assert_eq!(delta["is_complete"], json!(true));
    }

    #[tokio::test]
    async fn no_signal_leaves_is_complete_unset() {
        let nt = node_type();
        let mut state = RunState::new("hi", 5);
        state.last_output = "still working".to_string();
        let ctx = ExecutionContext::new("s1", std::sync::Arc::new(StubModel));
        let delta = (nt.execute)(state, ctx, json!({})).await.unwrap();
        assert_eq!(delta["completion_signal"], json!("none"));
        assert!(delta.get("is_complete").is_none());
    }
}
