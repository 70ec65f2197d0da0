//! The graph compiler: turns a [`Workflow`] + [`NodeRegistry`] into a
//! [`CompiledWorkflow`] state machine, grouping edges by source the way
//! `WorkflowExecutor.compile()` does in the teacher's workflow service —
//! direct-edge for single-target sources, conditional-edge (with
//! fallback-to-first-edge-port routing) for multi-target sources, and a
//! pass-through optimization when a conditional node's edges all converge on
//! one target.

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{WorkflowEngineError, WorkflowResult};
use super::registry::{NodeRegistry, NodeType, RoutingFn};
use super::state::RunState;
use super::workflow::{self, Edge, Workflow, END_NODE_TYPE, START_NODE_TYPE};

/// Sentinel target id meaning "the run terminates".
pub const TERMINAL: &str = "__end__";

enum Wiring {
    Direct(String),
    Conditional {
        routing: Arc<dyn Fn(&RunState) -> String + Send + Sync>,
        port_to_target: HashMap<String, String>,
    },
}

/// A compiled, executable workflow. Cheap to clone (internals are `Arc`'d);
/// build once per `Workflow` and reuse across runs.
#[derive(Clone)]
pub struct CompiledWorkflow {
    pub(crate) workflow: Arc<Workflow>,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) entry: String,
    wiring: Arc<HashMap<String, Wiring>>,
}

impl CompiledWorkflow {
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub(crate) fn node_type(&self, instance_id: &str) -> Option<&NodeType> {
        let instance = self.workflow.node(instance_id)?;
        self.registry.get(&instance.node_type)
    }

    /// Determine the next node (or [`TERMINAL`]) after `node_id` finished
    /// executing with the resulting `state`.
    pub(crate) fn next(&self, node_id: &str, state: &RunState) -> WorkflowResult<String> {
        match self.wiring.get(node_id) {
            Some(Wiring::Direct(target)) => Ok(target.clone()),
            Some(Wiring::Conditional {
                routing,
                port_to_target,
            }) => {
                let port = routing(state);
                port_to_target.get(&port).cloned().ok_or_else(|| {
                    WorkflowEngineError::Internal(format!(
                        "routing function for node {node_id} returned unknown port {port}"
                    ))
                })
            }
            None => Err(WorkflowEngineError::Internal(format!(
                "node {node_id} has no outbound wiring"
            ))),
        }
    }
}

fn map_to_terminal(workflow: &Workflow, target: &str) -> String {
    match workflow.node(target) {
        Some(n) if n.node_type == END_NODE_TYPE => TERMINAL.to_string(),
        _ => target.to_string(),
    }
}

/// Fallback routing used when a conditional node's type does not declare a
/// `routing` function: always returns the port of the first outgoing edge.
fn fallback_routing(first_port: String) -> Arc<dyn Fn(&RunState) -> String + Send + Sync> {
    Arc::new(move |_state| first_port.clone())
}

fn build_routing(
    node_type: &NodeType,
    config: &serde_json::Map<String, serde_json::Value>,
    edges: &[&Edge],
) -> Arc<dyn Fn(&RunState) -> String + Send + Sync> {
    if let Some(routing_fn) = &node_type.routing {
        let routing_fn: RoutingFn = routing_fn.clone();
        return routing_fn(serde_json::Value::Object(config.clone()));
    }
    let first_port = edges
        .first()
        .map(|e| e.source_port.clone())
        .unwrap_or_else(|| workflow::DEFAULT_PORT.to_string());
    fallback_routing(first_port)
}

/// Compile a workflow. Runs the §4.D validator first and returns
/// `Validation` on any error.
pub fn compile(workflow: Workflow, registry: Arc<NodeRegistry>) -> WorkflowResult<CompiledWorkflow> {
    let errors = workflow::validate(&workflow, &registry);
    if !errors.is_empty() {
        return Err(WorkflowEngineError::Validation(errors));
    }

    let workflow = Arc::new(workflow);

    let start = workflow
        .nodes
        .iter()
        .find(|n| n.node_type == START_NODE_TYPE)
        .expect("validator guarantees exactly one start node");

    let mut wiring: HashMap<String, Wiring> = HashMap::new();

    // Root edge: start -> its single target.
    let start_edges: Vec<&Edge> = workflow.edges_from(&start.id).collect();
    let entry = start_edges
        .first()
        .map(|e| map_to_terminal(&workflow, &e.target))
        .unwrap_or_else(|| TERMINAL.to_string());

    // Wire every non-start, non-end instance.
    for instance in workflow
        .nodes
        .iter()
        .filter(|n| n.node_type != START_NODE_TYPE && n.node_type != END_NODE_TYPE)
    {
        let outgoing: Vec<&Edge> = workflow.edges_from(&instance.id).collect();
        let distinct_targets: std::collections::HashSet<&str> =
            outgoing.iter().map(|e| e.target.as_str()).collect();

        if distinct_targets.len() <= 1 {
            // Pass-through: single distinct target (or none), regardless of
            // port count — register a plain edge.
            let target = outgoing
                .first()
                .map(|e| map_to_terminal(&workflow, &e.target))
                .unwrap_or_else(|| TERMINAL.to_string());
            wiring.insert(instance.id.clone(), Wiring::Direct(target));
            continue;
        }

        // Multiple distinct targets: conditional wiring.
        let node_type = registry
            .get(&instance.node_type)
            .expect("validator guarantees node type resolves");
        let routing = build_routing(node_type, &instance.config, &outgoing);

        let mut port_to_target = HashMap::new();
        for edge in &outgoing {
            port_to_target.insert(edge.source_port.clone(), map_to_terminal(&workflow, &edge.target));
        }
        wiring.insert(
            instance.id.clone(),
            Wiring::Conditional {
                routing,
                port_to_target,
            },
        );
    }

    Ok(CompiledWorkflow {
        workflow,
        registry,
        entry,
        wiring: Arc::new(wiring),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow_engine::registry::{ExecuteFn, OutputPort};
    use serde_json::json;
    use std::sync::Arc;

    fn noop_execute() -> ExecuteFn {
        Arc::new(|_state, _ctx, _config| Box::pin(async { Ok(json!({})) }))
    }

    fn registry_with(types: Vec<NodeType>) -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::new();
        for t in types {
            registry.register(t);
        }
        Arc::new(registry)
    }

    fn node(id: &str, node_type: &str) -> workflow::NodeInstance {
        workflow::NodeInstance {
            id: id.to_string(),
            node_type: node_type.to_string(),
            label: String::new(),
            config: Default::default(),
            position: (0.0, 0.0),
        }
    }

    fn edge(id: &str, source: &str, target: &str, port: &str) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_port: port.to_string(),
            label: None,
        }
    }

    #[test]
    fn zero_edge_workflow_compiles_direct_to_terminal() {
        let wf = Workflow {
            id: "wf".into(),
            name: "trivial".into(),
            description: String::new(),
            nodes: vec![node("s", START_NODE_TYPE), node("e", END_NODE_TYPE)],
            edges: vec![edge("e1", "s", "e", "default")],
            is_template: false,
            template_name: None,
        };
        let registry = registry_with(vec![]);
        let compiled = compile(wf, registry).unwrap();
        assert_eq!(compiled.entry, TERMINAL);
    }

    #[test]
    fn converging_conditional_ports_compile_as_pass_through() {
        let mut llm = NodeType {
            node_type: "llm_call".into(),
            label: "LLM Call".into(),
            description: String::new(),
            category: "model".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: vec![OutputPort::new("approved"), OutputPort::new("retry")],
            execute: noop_execute(),
            routing: None,
            dynamic_ports: None,
        };
        llm.node_type = "review".to_string();
        let registry = registry_with(vec![llm]);

        let wf = Workflow {
            id: "wf".into(),
            name: "converge".into(),
            description: String::new(),
            nodes: vec![
                node("s", START_NODE_TYPE),
                node("r", "review"),
                node("e", END_NODE_TYPE),
            ],
            edges: vec![
                edge("e1", "s", "r", "default"),
                edge("e2", "r", "e", "approved"),
                edge("e3", "r", "e", "retry"),
            ],
            is_template: false,
            template_name: None,
        };
        let compiled = compile(wf, registry).unwrap();
        let state = RunState::new("x", 1);
        assert_eq!(compiled.next("r", &state).unwrap(), TERMINAL);
    }

    #[test]
    fn conditional_node_uses_fallback_routing_when_no_routing_fn() {
        let router = NodeType {
            node_type: "conditional_router".into(),
            label: "Router".into(),
            description: String::new(),
            category: "control".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: vec![OutputPort::new("a"), OutputPort::new("b")],
            execute: noop_execute(),
            routing: None,
            dynamic_ports: None,
        };
        let registry = registry_with(vec![router]);

        let wf = Workflow {
            id: "wf".into(),
            name: "branch".into(),
            description: String::new(),
            nodes: vec![
                node("s", START_NODE_TYPE),
                node("c", "conditional_router"),
                node("ea", END_NODE_TYPE),
                node("eb", END_NODE_TYPE),
            ],
            edges: vec![
                edge("e1", "s", "c", "default"),
                edge("e2", "c", "ea", "a"),
                edge("e3", "c", "eb", "b"),
            ],
            is_template: false,
            template_name: None,
        };
        let compiled = compile(wf, registry).unwrap();
        let state = RunState::new("x", 1);
        // fallback always returns the first edge's port, "a" here.
        assert_eq!(compiled.next("c", &state).unwrap(), TERMINAL);
    }
}
