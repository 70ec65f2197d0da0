//! `context_guard`: computes a [`ContextBudget`](langgraph_core::workflow_engine::ContextBudget)
//! for the run's messages and writes it to state. No routing — always a
//! single default port.

use std::sync::Arc;

use langgraph_core::workflow_engine::registry::{ExecuteFn, NodeType, OutputPort, ParameterSpec};
use langgraph_core::workflow_engine::resilience::estimate_context_budget;
use serde_json::{json, Value};

use super::util::cfg_str;

fn execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let position_label = cfg_str(&config, "position_label", "");
            let messages_field = cfg_str(&config, "messages_field", "messages");

            let messages = if messages_field == "messages" {
                state.messages.clone()
            } else {
                state
                    .extra
                    .get(messages_field.as_str())
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| serde_json::from_value(v.clone()).ok())
                            .collect()
                    })
                    .unwrap_or_default()
            };

            let prior_compaction = state
                .context_budget
                .as_ref()
                .map(|b| b.compaction_count)
                .unwrap_or(0);
            let mut budget = estimate_context_budget(&messages, ctx.model_name(), prior_compaction);

            use langgraph_core::workflow_engine::resilience::BudgetStatus;
            if matches!(budget.status, BudgetStatus::Block | BudgetStatus::Overflow) {
                budget.compaction_count += 1;
            }

            let mut delta = json!({ "context_budget": budget });
            if !position_label.is_empty() {
                delta["current_step"] = json!(position_label);
            }
            Ok(delta)
        })
    })
}

pub fn node_type() -> NodeType {
    NodeType {
        node_type: "context_guard".to_string(),
        label: "Context Guard".to_string(),
        description: "Estimate context-window usage and write a context_budget to state."
            .to_string(),
        category: "control".to_string(),
        icon: "gauge".to_string(),
        color: "#6366f1".to_string(),
        parameters: vec![
            ParameterSpec::string("position_label", "Position Label"),
            ParameterSpec::string("messages_field", "Messages Field").with_default(json!("messages")),
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
    use langgraph_core::{llm::ChatModel, Message};

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
    async fn writes_ok_budget_for_short_history() {
        let nt = node_type();
        let mut state = RunState::new("hi", 5);
        state.messages.push(Message::human("hello"));
        let ctx = ExecutionContext::new("s1", std::sync::Arc::new(StubModel));
        let delta = (nt.execute)(state, ctx, json!({})).await.unwrap();
        let budget = delta.get("context_budget").unwrap();
        assert_eq!(budget["status"], json!("ok"));
    }
}
