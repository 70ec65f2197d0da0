//! `conditional_router`: a pure routing node. Its port set and routing
//! decision both come from the instance's `route_map` config; `execute`
//! itself never touches state.

use std::collections::HashSet;
use std::sync::Arc;

use langgraph_core::workflow_engine::registry::{
    DynamicPortsFn, ExecuteFn, NodeType, OutputPort, ParameterSpec, RoutingFn,
};
use langgraph_core::workflow_engine::RunState;
use serde_json::{json, Value};

use super::util::cfg_str;

fn route_map(config: &Value) -> Vec<(String, String)> {
    config
        .get("route_map")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|port| (k.clone(), port.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn execute() -> ExecuteFn {
    Arc::new(|_state, _ctx, _config| Box::pin(async { Ok(json!({})) }))
}

fn routing() -> RoutingFn {
    Arc::new(|config| {
        let routing_field = cfg_str(&config, "routing_field", "last_output");
        let default_port = cfg_str(&config, "default_port", "default");
        let map = route_map(&config);
        Arc::new(move |state: &RunState| {
            let value = if routing_field == "last_output" {
                state.last_output.clone()
            } else {
                state
                    .extra
                    .get(routing_field.as_str())
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            };
            map.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(&value))
                .map(|(_, port)| port.clone())
                .unwrap_or_else(|| default_port.clone())
        })
    })
}

fn dynamic_ports() -> DynamicPortsFn {
    Arc::new(|config| {
        let mut seen: HashSet<String> = HashSet::new();
        let mut ports: Vec<OutputPort> = Vec::new();
        for (_, port) in route_map(config) {
            if seen.insert(port.clone()) {
                ports.push(OutputPort::new(&port).optional());
            }
        }
        let default_port = config
            .get("default_port")
            .and_then(Value::as_str)
            .unwrap_or("default");
        if !ports.iter().any(|p| p.id == default_port) {
            ports.push(OutputPort::new(default_port));
        }
        ports
    })
}

pub fn node_type() -> NodeType {
    NodeType {
        node_type: "conditional_router".to_string(),
        label: "Conditional Router".to_string(),
        description: "Route on a state field's value via a configured key -> port map."
            .to_string(),
        category: "control".to_string(),
        icon: "git-branch".to_string(),
        color: "#f59e0b".to_string(),
        parameters: vec![
            ParameterSpec::string("routing_field", "Routing Field").with_default(json!("last_output")),
            ParameterSpec::string("route_map", "Route Map").required(),
            ParameterSpec::string("default_port", "Default Port").with_default(json!("default")),
        ],
        static_output_ports: OutputPort::default_set(),
        execute: execute(),
        routing: Some(routing()),
        dynamic_ports: Some(dynamic_ports()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_matching_key() {
        let config = json!({
            "routing_field": "difficulty",
            "route_map": {"easy": "direct", "hard": "deep_dive"},
            "default_port": "deep_dive",
        });
        let route = routing()(config);
        let mut state = RunState::new("hi", 5);
        state.extra.insert("difficulty".to_string(), json!("easy"));
        assert_eq!(route(&state), "direct");
    }

    #[test]
    fn unmatched_value_falls_back_to_default() {
        let config = json!({
            "routing_field": "difficulty",
            "route_map": {"easy": "direct"},
            "default_port": "deep_dive",
        });
        let route = routing()(config);
        let mut state = RunState::new("hi", 5);
        state.extra.insert("difficulty".to_string(), json!("medium"));
        assert_eq!(route(&state), "deep_dive");
    }

    #[test]
    fn dynamic_ports_dedups_non_adjacent_duplicate_targets() {
        let config = json!({
            "route_map": {"a": "x", "b": "y", "c": "x"},
            "default_port": "x",
        });
        let ports = dynamic_ports()(&config);
        let xs = ports.iter().filter(|p| p.id == "x").count();
        assert_eq!(xs, 1);
        assert_eq!(ports.iter().filter(|p| p.id == "y").count(), 1);
    }

    proptest::proptest! {
        #[test]
        fn dynamic_ports_never_has_duplicate_ids(targets in proptest::collection::vec("[a-c]", 1..6)) {
            let map: serde_json::Map<String, Value> = targets
                .iter()
                .enumerate()
                .map(|(i, t)| (format!("key{i}"), json!(t)))
                .collect();
            let config = json!({"route_map": Value::Object(map)});
            let ports = dynamic_ports()(&config);
            let ids: std::collections::HashSet<&str> = ports.iter().map(|p| p.id.as_str()).collect();
            proptest::prop_assert_eq!(ids.len(), ports.len());
        }
    }
}
