//! `iteration_gate`: the conditional node that decides whether a loop keeps
//! going. Checks, in order, the iteration cap, the context budget, the
//! completion signal, and an optional custom stop field; the first one that
//! trips sets `is_complete` and a reason, and `stop` is the winning port.

use std::sync::Arc;

use langgraph_core::workflow_engine::registry::{
    DynamicPortsFn, ExecuteFn, NodeType, OutputPort, ParameterSpec, RoutingFn,
};
use langgraph_core::workflow_engine::resilience::{BudgetStatus, CompletionSignal};
use langgraph_core::workflow_engine::RunState;
use serde_json::{json, Value};

use super::util::{cfg_bool, cfg_i64, cfg_str};

/// The per-instance `stop_field` parameter, falling back to the legacy
/// `stop_field` name when `custom_stop_field` is unset (both configure the
/// same check; `custom_stop_field` is the name the parameter schema exposes).
fn stop_field_name(config: &Value) -> String {
    let custom = cfg_str(config, "custom_stop_field", "");
    if !custom.is_empty() {
        custom
    } else {
        cfg_str(config, "stop_field", "")
    }
}

fn stop_reason(state: &RunState, config: &Value) -> Option<String> {
    if cfg_bool(config, "check_iteration", true) {
        let max_iterations_override = cfg_i64(config, "max_iterations_override", 0);
        let max_iterations = if max_iterations_override > 0 {
            max_iterations_override
        } else {
            state.max_iterations
        };
        if state.iteration >= max_iterations {
            return Some(format!(
                "iteration {} reached max_iterations {}",
                state.iteration, max_iterations
            ));
        }
    }
    if cfg_bool(config, "check_budget", true) {
        if let Some(budget) = &state.context_budget {
            if matches!(budget.status, BudgetStatus::Block | BudgetStatus::Overflow) {
                return Some(format!("context budget status {:?}", budget.status));
            }
        }
    }
    if cfg_bool(config, "check_completion", true)
        && matches!(
            state.completion_signal,
            CompletionSignal::Complete | CompletionSignal::Blocked | CompletionSignal::Error
        )
    {
        return Some(format!("completion signal {:?}", state.completion_signal));
    }
    let stop_field = stop_field_name(config);
    if !stop_field.is_empty() {
        if let Some(true) = state.extra.get(stop_field.as_str()).and_then(Value::as_bool) {
            return Some(format!("custom stop field {stop_field} is true"));
        }
    }
    if state.error.is_some() {
        return Some("run error set".to_string());
    }
    None
}

fn execute() -> ExecuteFn {
    Arc::new(|state, _ctx, config| {
        Box::pin(async move {
            match stop_reason(&state, &config) {
                Some(reason) => Ok(json!({
                    "is_complete": true,
                    "gate_stop_reason": reason,
                })),
                None => Ok(json!({})),
            }
        })
    })
}

fn routing() -> RoutingFn {
    Arc::new(|config| {
        Arc::new(move |state: &RunState| {
            if state.is_complete || state.error.is_some() || stop_reason(state, &config).is_some() {
                "stop".to_string()
            } else {
                "continue".to_string()
            }
        })
    })
}

fn dynamic_ports() -> DynamicPortsFn {
    Arc::new(|_config| vec![OutputPort::new("continue"), OutputPort::new("stop")])
}

pub fn node_type() -> NodeType {
    NodeType {
        node_type: "iteration_gate".to_string(),
        label: "Iteration Gate".to_string(),
        description: "Stop the loop on iteration cap, context budget, completion signal, or a custom field."
            .to_string(),
        category: "control".to_string(),
        icon: "repeat".to_string(),
        color: "#f59e0b".to_string(),
        parameters: vec![
            ParameterSpec::string("stop_field", "Stop Field"),
            ParameterSpec::string("custom_stop_field", "Custom Stop Field"),
            ParameterSpec::string("max_iterations_override", "Max Iterations Override").with_default(json!(0)),
            ParameterSpec::string("check_iteration", "Check Iteration Cap").with_default(json!(true)),
            ParameterSpec::string("check_budget", "Check Context Budget").with_default(json!(true)),
            ParameterSpec::string("check_completion", "Check Completion Signal").with_default(json!(true)),
        ],
        static_output_ports: vec![OutputPort::new("continue"), OutputPort::new("stop")],
        execute: execute(),
        routing: Some(routing()),
        dynamic_ports: Some(dynamic_ports()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use langgraph_core::workflow_engine::resilience::ContextBudget;

    #[test]
    fn stops_at_max_iterations() {
        let mut state = RunState::new("hi", 3);
        state.iteration = 3;
        assert!(stop_reason(&state, &json!({})).unwrap().contains("max_iterations"));
    }

    #[test]
    fn stops_on_blocked_budget() {
        let mut state = RunState::new("hi", 10);
        state.context_budget = Some(ContextBudget {
            estimated_tokens: 9000,
            context_limit: 10000,
            usage_ratio: 0.9,
            status: BudgetStatus::Block,
            compaction_count: 0,
        });
        assert!(stop_reason(&state, &json!({})).is_some());
    }

    #[test]
    fn continues_when_nothing_trips() {
        let state = RunState::new("hi", 10);
        assert!(stop_reason(&state, &json!({})).is_none());
        let routing = routing()(json!({}));
        assert_eq!(routing(&state), "continue");
    }

    #[test]
    fn check_iteration_false_disables_the_cap() {
        let mut state = RunState::new("hi", 3);
        state.iteration = 5;
        assert!(stop_reason(&state, &json!({"check_iteration": false})).is_none());
    }

    #[test]
    fn max_iterations_override_replaces_state_cap() {
        let mut state = RunState::new("hi", 100);
        state.iteration = 5;
        assert!(stop_reason(&state, &json!({})).is_none());
        let reason = stop_reason(&state, &json!({"max_iterations_override": 5})).unwrap();
        assert!(reason.contains("max_iterations 5"));
    }

    #[test]
    fn check_completion_false_ignores_completion_signal() {
        let mut state = RunState::new("hi", 10);
        state.completion_signal = CompletionSignal::Complete;
        assert!(stop_reason(&state, &json!({"check_completion": false})).is_none());
        assert!(stop_reason(&state, &json!({})).is_some());
    }

    #[test]
    fn custom_stop_field_takes_precedence_over_legacy_stop_field() {
        let mut state = RunState::new("hi", 10);
        state.extra.insert("new_flag".to_string(), json!(true));
        state.extra.insert("old_flag".to_string(), json!(true));
        let config = json!({"stop_field": "old_flag", "custom_stop_field": "new_flag"});
        let reason = stop_reason(&state, &config).unwrap();
        assert!(reason.contains("new_flag"));
    }
}
