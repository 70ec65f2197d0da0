//! `direct_answer`, `answer`, and `review`: the three single-model-turn nodes
//! that produce or gate a user-visible answer.

use std::sync::Arc;

use langgraph_core::llm::ChatRequest;
use langgraph_core::workflow_engine::registry::{
    DynamicPortsFn, ExecuteFn, NodeType, OutputPort, ParameterSpec, RoutingFn,
};
use langgraph_core::workflow_engine::state::format_template;
use langgraph_core::workflow_engine::RunState;
use langgraph_core::Message;
use serde_json::{json, Value};

use super::util::{cfg_i64, cfg_str};

fn direct_answer_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(&config, "prompt_template", "{input}");
            let prompt = format_template(&prompt_template, &state);
            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default().to_string();
            Ok(json!({
                "last_output": text,
                "is_complete": true,
            }))
        })
    })
}

pub fn direct_answer_node_type() -> NodeType {
    NodeType {
        node_type: "direct_answer".to_string(),
        label: "Direct Answer".to_string(),
        description: "Answer the input in a single model call, with no further review.".to_string(),
        category: "model".to_string(),
        icon: "message-circle".to_string(),
        color: "#10b981".to_string(),
        parameters: vec![ParameterSpec::string("prompt_template", "Prompt Template").required()],
        static_output_ports: OutputPort::default_set(),
        execute: direct_answer_execute(),
        routing: None,
        dynamic_ports: None,
    }
}

fn answer_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(&config, "prompt_template", "{input}");
            let output_field = cfg_str(&config, "output_field", "answer");
            let prompt = format_template(&prompt_template, &state);
            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default().to_string();
            Ok(json!({
                output_field: text.clone(),
                "last_output": text,
            }))
        })
    })
}

pub fn answer_node_type() -> NodeType {
    NodeType {
        node_type: "answer".to_string(),
        label: "Answer".to_string(),
        description: "Produce a candidate answer for a downstream review stage.".to_string(),
        category: "model".to_string(),
        icon: "edit-3".to_string(),
        color: "#10b981".to_string(),
        parameters: vec![
            ParameterSpec::string("prompt_template", "Prompt Template").required(),
            ParameterSpec::string("output_field", "Output Field").with_default(json!("answer")),
        ],
        static_output_ports: OutputPort::default_set(),
        execute: answer_execute(),
        routing: None,
        dynamic_ports: None,
    }
}

fn review_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(&config, "prompt_template", "Review this answer: {answer}");
            let max_retries = cfg_i64(&config, "max_retries", 2);
            let approval_marker = cfg_str(&config, "approval_marker", "[approved]");

            let review_count = state
                .extra
                .get("review_count")
                .and_then(Value::as_i64)
                .unwrap_or(0);

            let prompt = format_template(&prompt_template, &state);
            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default().to_string();

            let approved = text.to_lowercase().contains(&approval_marker.to_lowercase())
                || review_count >= max_retries;

            let mut delta = serde_json::Map::new();
            delta.insert("review_count".to_string(), json!(review_count + 1));
            delta.insert("last_output".to_string(), json!(text));

            if approved {
                delta.insert("final_answer".to_string(), state.extra.get("answer").cloned().unwrap_or(json!(text)));
                delta.insert("is_complete".to_string(), json!(true));
            }

            Ok(Value::Object(delta))
        })
    })
}

fn review_routing() -> RoutingFn {
    Arc::new(|config| {
        let max_retries = cfg_i64(&config, "max_retries", 2);
        Arc::new(move |state: &RunState| {
            if state.error.is_some() {
                return "end".to_string();
            }
            if state.is_complete {
                return "approved".to_string();
            }
            let review_count = state.extra.get("review_count").and_then(Value::as_i64).unwrap_or(0);
            if review_count >= max_retries {
                "end".to_string()
            } else {
                "retry".to_string()
            }
        })
    })
}

pub fn review_node_type() -> NodeType {
    NodeType {
        node_type: "review".to_string(),
        label: "Review".to_string(),
        description: "Gate an answer through a model review, forcing approval after max_retries."
            .to_string(),
        category: "control".to_string(),
        icon: "check-square".to_string(),
        color: "#f59e0b".to_string(),
        parameters: vec![
            ParameterSpec::string("prompt_template", "Prompt Template").required(),
            ParameterSpec::string("max_retries", "Max Retries").with_default(json!(2)),
            ParameterSpec::string("approval_marker", "Approval Marker").with_default(json!("[approved]")),
        ],
        static_output_ports: vec![
            OutputPort::new("approved"),
            OutputPort::new("retry"),
            OutputPort::new("end"),
        ],
        execute: review_execute(),
        routing: Some(review_routing()),
        dynamic_ports: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use langgraph_core::llm::{ChatModel, ChatResponse};
    use langgraph_core::workflow_engine::runtime::ExecutionContext;

    #[derive(Clone)]
    struct StubModel {
        reply: String,
    }

    #[async_trait::async_trait]
    impl ChatModel for StubModel {
        async fn chat(&self, _r: ChatRequest) -> langgraph_core::error::Result<ChatResponse> {
            Ok(ChatResponse {
                message: Message::ai(self.reply.clone()),
                usage: None,
                reasoning: None,
                metadata: Default::default(),
            })
        }
        async fn stream(
            &self,
            _r: ChatRequest,
        ) -> langgraph_core::error::Result<langgraph_core::llm::ChatStreamResponse> {
            unimplemented!()
        }
    

        fn clone_box(&self) -> Box<dyn ChatModel> {
            Box::new(self.clone())
        }
    }

    #[tokio::test]
    async fn direct_answer_writes_last_output_and_completes() {
        let nt = direct_answer_node_type();
        let state = RunState::new("hi", 5);
        let model = std::sync::Arc::new(StubModel { reply: "42".into() });
        let ctx = ExecutionContext::new("s1", model);
        let delta = (nt.execute)(state, ctx, json!({"prompt_template": "{input}"})).await.unwrap();
        assert_eq!(delta["last_output"], json!("42"));
        assert_eq!(delta["is_complete"], json!(true));
    }

    #[tokio::test]
    async fn review_forces_approval_after_max_retries() {
        let nt = review_node_type();
        let mut state = RunState::new("hi", 5);
        state.extra.insert("review_count".to_string(), json!(2));
        state.extra.insert("answer".to_string(), json!("draft answer"));
        let model = std::sync::Arc::new(StubModel { reply: "needs work".into() });
        let ctx = ExecutionContext::new("s1", model);
        let config = json!({"prompt_template": "{answer}", "max_retries": 2});
        let delta = (nt.execute)(state.clone(), ctx, config.clone()).await.unwrap();
        assert_eq!(delta["review_count"], json!(3));
        assert_eq!(delta["is_complete"], json!(true));

        state.merge(delta);
        let route = review_routing()(config);
        assert_eq!(route(&state), "approved");
    }

    #[tokio::test]
    async fn review_retries_when_not_approved() {
        let nt = review_node_type();
        let state = RunState::new("hi", 5);
        let model = std::sync::Arc::new(StubModel { reply: "needs more work".into() });
        let ctx = ExecutionContext::new("s1", model);
        let config = json!({"prompt_template": "{answer}", "max_retries": 3});
        let mut state2 = state.clone();
        let delta = (nt.execute)(state, ctx, config.clone()).await.unwrap();
        state2.merge(delta);
        let route = review_routing()(config);
        assert_eq!(route(&state2), "retry");
    }
}
