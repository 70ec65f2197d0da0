//! The todo-list loop: `create_todos`, `execute_todo`, `check_progress`,
//! `final_review`, `final_answer`. Together they drive the plan-execute
//! pattern described in the review-retry and multi-step scenarios: break the
//! input into a todo list, execute each item one at a time (relying on the
//! runtime's replace-at-index merge for `todos`), then review and synthesize.

use std::sync::Arc;

use langgraph_core::llm::ChatRequest;
use langgraph_core::workflow_engine::registry::{ExecuteFn, NodeType, OutputPort, ParameterSpec, RoutingFn};
use langgraph_core::workflow_engine::state::format_template;
use langgraph_core::workflow_engine::RunState;
use langgraph_core::Message;
use serde_json::{json, Value};

use super::util::{cfg_i64, cfg_str};

fn parse_todo_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

fn create_todos_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template =
                cfg_str(&config, "prompt_template", "Break this task into a numbered list of steps:\n{input}");
            let prompt = format_template(&prompt_template, &state);
            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default();
            let todos = parse_todo_list(text);
            Ok(json!({
                "todos": todos,
                "current_todo_index": 0,
                "todo_results": Vec::<String>::new(),
            }))
        })
    })
}

pub fn create_todos_node_type() -> NodeType {
    NodeType {
        node_type: "create_todos".to_string(),
        label: "Create Todos".to_string(),
        description: "Ask the model to break the input into a numbered list of steps.".to_string(),
        category: "model".to_string(),
        icon: "list".to_string(),
        color: "#10b981".to_string(),
        parameters: vec![ParameterSpec::string("prompt_template", "Prompt Template")],
        static_output_ports: OutputPort::default_set(),
        execute: create_todos_execute(),
        routing: None,
        dynamic_ports: None,
    }
}

fn current_todo(state: &RunState) -> Option<String> {
    let todos = state.extra.get("todos")?.as_array()?;
    let idx = state.extra.get("current_todo_index")?.as_u64()? as usize;
    todos.get(idx)?.as_str().map(str::to_string)
}

fn execute_todo_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(&config, "prompt_template", "Execute this step: {current_todo}");
            let Some(todo) = current_todo(&state) else {
                return Ok(json!({ "error": "execute_todo called with no remaining todo" }));
            };

            let mut templating_state = state.clone();
            templating_state.extra.insert("current_todo".to_string(), json!(todo));
            let prompt = format_template(&prompt_template, &templating_state);

            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default().to_string();

            let idx = state.extra.get("current_todo_index").and_then(Value::as_i64).unwrap_or(0);
            let mut results: Vec<Value> = state
                .extra
                .get("todo_results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            results.push(json!(text.clone()));

            Ok(json!({
                "todos": [format!("{todo} [done]")],
                "todo_results": results,
                "current_todo_index": idx + 1,
                "last_output": text,
            }))
        })
    })
}

pub fn execute_todo_node_type() -> NodeType {
    NodeType {
        node_type: "execute_todo".to_string(),
        label: "Execute Todo".to_string(),
        description: "Run one model call against the current todo item and advance the index."
            .to_string(),
        category: "model".to_string(),
        icon: "play".to_string(),
        color: "#10b981".to_string(),
        parameters: vec![ParameterSpec::string("prompt_template", "Prompt Template")],
        static_output_ports: OutputPort::default_set(),
        execute: execute_todo_execute(),
        routing: None,
        dynamic_ports: None,
    }
}

fn check_progress_execute() -> ExecuteFn {
    Arc::new(|_state, _ctx, _config| Box::pin(async { Ok(json!({})) }))
}

fn check_progress_routing() -> RoutingFn {
    Arc::new(|_config| {
        Arc::new(|state: &RunState| {
            if state.error.is_some() {
                return "complete".to_string();
            }
            let total = state.extra.get("todos").and_then(Value::as_array).map(|t| t.len()).unwrap_or(0);
            let idx = state.extra.get("current_todo_index").and_then(Value::as_u64).unwrap_or(0) as usize;
            if idx < total {
                "continue".to_string()
            } else {
                "complete".to_string()
            }
        })
    })
}

pub fn check_progress_node_type() -> NodeType {
    NodeType {
        node_type: "check_progress".to_string(),
        label: "Check Progress".to_string(),
        description: "Route back to execute_todo until every todo has a result.".to_string(),
        category: "control".to_string(),
        icon: "list-checks".to_string(),
        color: "#f59e0b".to_string(),
        parameters: vec![],
        static_output_ports: vec![OutputPort::new("continue"), OutputPort::new("complete")],
        execute: check_progress_execute(),
        routing: Some(check_progress_routing()),
        dynamic_ports: None,
    }
}

fn final_review_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(
                &config,
                "prompt_template",
                "Review these step results for the task {input}:\n{todo_results}",
            );
            let max_retries = cfg_i64(&config, "max_retries", 1);
            let approval_marker = cfg_str(&config, "approval_marker", "[approved]");

            let review_count = state.extra.get("final_review_count").and_then(Value::as_i64).unwrap_or(0);

            let prompt = format_template(&prompt_template, &state);
            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default().to_string();

            let approved = text.to_lowercase().contains(&approval_marker.to_lowercase())
                || review_count >= max_retries;

            Ok(json!({
                "final_review_count": review_count + 1,
                "last_output": text,
                "final_review_approved": approved,
            }))
        })
    })
}

fn final_review_routing() -> RoutingFn {
    Arc::new(|config| {
        let max_retries = cfg_i64(&config, "max_retries", 1);
        Arc::new(move |state: &RunState| {
            if state.error.is_some() {
                return "end".to_string();
            }
            if state.extra.get("final_review_approved").and_then(Value::as_bool) == Some(true) {
                return "approved".to_string();
            }
            let review_count = state.extra.get("final_review_count").and_then(Value::as_i64).unwrap_or(0);
            if review_count >= max_retries {
                "end".to_string()
            } else {
                "retry".to_string()
            }
        })
    })
}

pub fn final_review_node_type() -> NodeType {
    NodeType {
        node_type: "final_review".to_string(),
        label: "Final Review".to_string(),
        description: "Review the aggregated todo results before synthesizing a final answer."
            .to_string(),
        category: "control".to_string(),
        icon: "check-square".to_string(),
        color: "#f59e0b".to_string(),
        parameters: vec![
            ParameterSpec::string("prompt_template", "Prompt Template"),
            ParameterSpec::string("max_retries", "Max Retries").with_default(json!(1)),
            ParameterSpec::string("approval_marker", "Approval Marker").with_default(json!("[approved]")),
        ],
        static_output_ports: vec![
            OutputPort::new("approved"),
            OutputPort::new("retry"),
            OutputPort::new("end"),
        ],
        execute: final_review_execute(),
        routing: Some(final_review_routing()),
        dynamic_ports: None,
    }
}

fn final_answer_execute() -> ExecuteFn {
    Arc::new(|state, ctx, config| {
        Box::pin(async move {
            let prompt_template = cfg_str(
                &config,
                "prompt_template",
                "Synthesize a final answer for {input} from these step results:\n{todo_results}",
            );
            let prompt = format_template(&prompt_template, &state);
            let response = ctx.invoke_model(ChatRequest::new(vec![Message::human(prompt)])).await?;
            let text = response.message.text().unwrap_or_default().to_string();
            Ok(json!({
                "final_answer": text.clone(),
                "last_output": text,
                "is_complete": true,
            }))
        })
    })
}

pub fn final_answer_node_type() -> NodeType {
    NodeType {
        node_type: "final_answer".to_string(),
        label: "Final Answer".to_string(),
        description: "Synthesize the run's final_answer from the accumulated todo results."
            .to_string(),
        category: "model".to_string(),
        icon: "flag".to_string(),
        color: "#10b981".to_string(),
        parameters: vec![ParameterSpec::string("prompt_template", "Prompt Template")],
        static_output_ports: OutputPort::default_set(),
        execute: final_answer_execute(),
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

    #[test]
    fn parses_numbered_and_bulleted_lists() {
        let text = "1. First step\n- Second step\n* Third step\n\n";
        let todos = parse_todo_list(text);
        assert_eq!(todos, vec!["First step", "Second step", "Third step"]);
    }

    #[tokio::test]
    async fn execute_todo_advances_index_and_marks_done() {
        let nt = execute_todo_node_type();
        let mut state = RunState::new("hi", 5);
        state.merge(json!({"todos": ["a", "b"], "current_todo_index": 0}));
        let model = std::sync::Arc::new(StubModel { reply: "result a".into() });
        let ctx = ExecutionContext::new("s1", model);
        let delta = (nt.execute)(state.clone(), ctx, json!({})).await.unwrap();
        assert_eq!(delta["current_todo_index"], json!(1));
        state.merge(delta);
        assert_eq!(state.extra["todos"], json!(["a [done]", "b"]));
    }

    #[test]
    fn check_progress_routes_continue_then_complete() {
        let route = check_progress_routing()(json!({}));
        let mut state = RunState::new("hi", 5);
        state.merge(json!({"todos": ["a", "b"], "current_todo_index": 1}));
        assert_eq!(route(&state), "continue");
        state.merge(json!({"current_todo_index": 2}));
        assert_eq!(route(&state), "complete");
    }

    #[tokio::test]
    async fn final_review_forces_approval_after_max_retries() {
        let nt = final_review_node_type();
        let mut state = RunState::new("hi", 5);
        state.extra.insert("final_review_count".to_string(), json!(1));
        let model = std::sync::Arc::new(StubModel { reply: "needs work".into() });
        let ctx = ExecutionContext::new("s1", model);
        let config = json!({"max_retries": 1});
        let delta = (nt.execute)(state.clone(), ctx, config.clone()).await.unwrap();
        assert_eq!(delta["final_review_count"], json!(2));
        assert_eq!(delta["final_review_approved"], json!(true));

        state.merge(delta);
        let route = final_review_routing()(config);
        assert_eq!(route(&state), "approved");
    }
}
