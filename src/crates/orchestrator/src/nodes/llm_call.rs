//! `llm_call`: the generic single-model-call node. Supports an optional
//! condition that picks between two prompt templates, and can fan its
//! response text out to several state fields at once.

use std::sync::Arc;

use langgraph_core::llm::ChatRequest;
use langgraph_core::workflow_engine::registry::{ExecuteFn, NodeType, OutputPort, ParameterSpec};
use langgraph_core::workflow_engine::state::format_template;
use langgraph_core::workflow_engine::RunState;
use langgraph_core::Message;
use serde_json::{json, Value};

use super::util::{cfg_opt_str, cfg_str, cfg_str_list};

/// Whether the alt template should be used instead of the primary one.
fn condition_selects_alt(state: &RunState, config: &Value) -> bool {
    let Some(condition_field) = cfg_opt_str(config, "condition_field") else {
        return false;
    };
    let mode = cfg_str(config, "condition_mode", "truthy");
    let value = state.get(&condition_field).or_else(|| state.extra.get(&condition_field).cloned());

    let truthy = match value {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Null) | None => false,
        Some(Value::Object(o)) => !o.is_empty(),
    };

    match mode.as_str() {
        "falsy" => !truthy,
        "gt_zero" => matches!(value_as_f64(state, &condition_field), Some(n) if n > 0.0),
        _ => truthy,
    }
}

fn value_as_f64(state: &RunState, field: &str) -> Option<f64> {
    state
        .get(field)
        .or_else(|| state.extra.get(field).cloned())
        .and_then(|v| v.as_f64())
}

fn execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(&config, "prompt_template", "{input}");
            let prompt_template_alt = cfg_str(&config, "prompt_template_alt", &prompt_template);
            let output_fields = cfg_str_list(&config, "output_fields");

            let template = if condition_selects_alt(&state, &config) {
                &prompt_template_alt
            } else {
                &prompt_template
            };
            let prompt = format_template(template, &state);

            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default().to_string();

            let mut delta = serde_json::Map::new();
            delta.insert("last_output".to_string(), json!(text));
            for field in output_fields {
                delta.insert(field, json!(text));
            }
            Ok(Value::Object(delta))
        })
    })
}

pub fn node_type() -> NodeType {
    NodeType {
        node_type: "llm_call".to_string(),
        label: "LLM Call".to_string(),
        description: "Call the model with one of two prompt templates, fanning the result out to configured fields."
            .to_string(),
        category: "model".to_string(),
        icon: "cpu".to_string(),
        color: "#10b981".to_string(),
        parameters: vec![
            ParameterSpec::string("prompt_template", "Prompt Template").required(),
            ParameterSpec::string("prompt_template_alt", "Alternate Prompt Template"),
            ParameterSpec::string("condition_field", "Condition Field"),
            ParameterSpec::string("condition_mode", "Condition Mode").with_default(json!("truthy")),
            ParameterSpec::string("output_fields", "Output Fields"),
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
    async fn writes_last_output_and_extra_output_fields() {
        let nt = node_type();
        let state = RunState::new("hi", 5);
        let model = std::sync::Arc::new(StubModel { reply: "the answer".into() });
        let ctx = ExecutionContext::new("s1", model);
        let config = json!({
            "prompt_template": "{input}",
            "output_fields": ["answer", "draft"],
        });
        let delta = (nt.execute)(state, ctx, config).await.unwrap();
        assert_eq!(delta["last_output"], json!("the answer"));
        assert_eq!(delta["answer"], json!("the answer"));
        assert_eq!(delta["draft"], json!("the answer"));
    }

    #[tokio::test]
    async fn picks_alt_template_when_condition_truthy() {
        let mut state = RunState::new("hi", 5);
        state.extra.insert("needs_detail".to_string(), json!(true));
        let config = json!({
            "prompt_template": "short: {input}",
            "prompt_template_alt": "detailed: {input}",
            "condition_field": "needs_detail",
        });
        assert!(condition_selects_alt(&state, &config));

        state.extra.insert("needs_detail".to_string(), json!(false));
        assert!(!condition_selects_alt(&state, &config));
    }
}
