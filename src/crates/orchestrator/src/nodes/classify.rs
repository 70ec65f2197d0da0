//! `classify`: asks the model to pick one of a configured set of categories,
//! then matches its answer against that set by case-insensitive substring.
//! A dynamic port per category plus an `end` port for model failures.

use std::sync::Arc;

use langgraph_core::llm::ChatRequest;
use langgraph_core::workflow_engine::registry::{
    DynamicPortsFn, ExecuteFn, NodeType, OutputPort, ParameterSpec, RoutingFn,
};
use langgraph_core::workflow_engine::state::format_template;
use langgraph_core::workflow_engine::RunState;
use langgraph_core::Message;
use serde_json::{json, Value};

use super::util::{cfg_str, cfg_str_list};

fn categories(config: &Value) -> Vec<String> {
    cfg_str_list(config, "categories")
}

fn execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(&config, "prompt_template", "{input}");
            let output_field = cfg_str(&config, "output_field", "category");
            let default_category = cfg_str(&config, "default_category", "end");
            let cats = categories(&config);

            let prompt = format_template(&prompt_template, &state);
            let response = match ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await {
                Ok(response) => response,
                Err(err) => {
                    return Ok(json!({ "error": err.to_string() }));
                }
            };
            let text = response.message.text().unwrap_or_default().to_lowercase();

            let matched = cats
                .iter()
                .find(|c| text.contains(&c.to_lowercase()))
                .cloned()
                .unwrap_or(default_category);

            Ok(json!({
                output_field: matched,
                "last_output": response.message.text().unwrap_or_default(),
            }))
        })
    })
}

fn routing() -> RoutingFn {
    Arc::new(|config| {
        let output_field = cfg_str(&config, "output_field", "category");
        let default_category = cfg_str(&config, "default_category", "end");
        Arc::new(move |state: &RunState| {
            if state.error.is_some() {
                return "end".to_string();
            }
            state
                .extra
                .get(output_field.as_str())
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| default_category.clone())
        })
    })
}

fn dynamic_ports() -> DynamicPortsFn {
    Arc::new(|config| {
        let mut ports: Vec<OutputPort> = categories(config).into_iter().map(|c| OutputPort::new(&c)).collect();
        if !ports.iter().any(|p| p.id == "end") {
            ports.push(OutputPort::new("end"));
        }
        ports
    })
}

pub fn node_type() -> NodeType {
    NodeType {
        node_type: "classify".to_string(),
        label: "Classify".to_string(),
        description: "Ask the model to pick one of a configured set of categories.".to_string(),
        category: "model".to_string(),
        icon: "tag".to_string(),
        color: "#10b981".to_string(),
        parameters: vec![
            ParameterSpec::string("prompt_template", "Prompt Template").required(),
            ParameterSpec::string("categories", "Categories").required().generates_ports(),
            ParameterSpec::string("output_field", "Output Field").with_default(json!("category")),
            ParameterSpec::string("default_category", "Default Category").with_default(json!("end")),
        ],
        static_output_ports: vec![OutputPort::new("end")],
        execute: execute(),
        routing: Some(routing()),
        dynamic_ports: Some(dynamic_ports()),
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
    async fn matches_configured_category() {
        let nt = node_type();
        let state = RunState::new("what is 2+2", 5);
        let model = std::sync::Arc::new(StubModel { reply: "This is EASY".into() });
        let ctx = ExecutionContext::new("s1", model);
        let config = json!({
            "prompt_template": "{input}",
            "categories": ["easy", "hard"],
        });
        let delta = (nt.execute)(state, ctx, config.clone()).await.unwrap();
        assert_eq!(delta["category"], json!("easy"));

        let mut state2 = RunState::new("x", 5);
        state2.merge(delta);
        let route = routing()(config);
        assert_eq!(route(&state2), "easy");
    }

    #[tokio::test]
    async fn falls_back_to_default_category_when_unmatched() {
        let nt = node_type();
        let state = RunState::new("hi", 5);
        let model = std::sync::Arc::new(StubModel { reply: "unrelated text".into() });
        let ctx = ExecutionContext::new("s1", model);
        let config = json!({
            "prompt_template": "{input}",
            "categories": ["easy", "hard"],
            "default_category": "end",
        });
        let delta = (nt.execute)(state, ctx, config).await.unwrap();
        assert_eq!(delta["category"], json!("end"));
    }
}
