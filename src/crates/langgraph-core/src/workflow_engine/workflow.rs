//! Declarative workflow definitions: [`Workflow`], [`NodeInstance`], [`Edge`],
//! and the structural validator.
//!
//! These types are the serializable form users author and the form persisted
//! by a `WorkflowStore` collaborator (out of scope here; see `orchestrator`).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::registry::NodeRegistry;

/// Default output port id used when a node type declares a single port.
pub const DEFAULT_PORT: &str = "default";
pub const START_NODE_TYPE: &str = "start";
pub const END_NODE_TYPE: &str = "end";

/// A single node occurrence inside a [`Workflow`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInstance {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub position: (f64, f64),
}

/// A directed connection between two [`NodeInstance`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default = "default_port")]
    pub source_port: String,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

/// A declarative, directed workflow graph.
///
/// Templates (`is_template: true`) are immutable: any caller attempting to
/// mutate or delete one must be rejected with `Forbidden` before this type is
/// touched (see `WorkflowStore` in the `orchestrator` crate, which owns that
/// check — this type itself carries no mutation methods, so misuse can only
/// happen at the collaborator boundary).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeInstance>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub template_name: Option<String>,
}

impl Workflow {
    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edges_from(&self, source: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source == source)
    }

    pub fn edges_into(&self, target: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target == target)
    }
}

/// Run all eight validator rules from the workflow model. Returns an empty
/// vec when the workflow is valid.
pub fn validate(workflow: &Workflow, registry: &NodeRegistry) -> Vec<String> {
    let mut errors = Vec::new();

    let starts: Vec<&NodeInstance> = workflow
        .nodes
        .iter()
        .filter(|n| n.node_type == START_NODE_TYPE)
        .collect();
    let ends: Vec<&NodeInstance> = workflow
        .nodes
        .iter()
        .filter(|n| n.node_type == END_NODE_TYPE)
        .collect();

    // Rule 1: exactly one start node.
    if starts.len() != 1 {
        errors.push(format!(
            "expected exactly one start node, found {}",
            starts.len()
        ));
    }
    // Rule 2: at least one end node.
    if ends.is_empty() {
        errors.push("expected at least one end node".to_string());
    }

    let node_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();

    // Rule 3: every edge's endpoints resolve.
    for edge in &workflow.edges {
        if !node_ids.contains(edge.source.as_str()) {
            errors.push(format!(
                "edge {} references unknown source node {}",
                edge.id, edge.source
            ));
        }
        if !node_ids.contains(edge.target.as_str()) {
            errors.push(format!(
                "edge {} references unknown target node {}",
                edge.id, edge.target
            ));
        }
    }

    // Rule 4: no `end` node is an edge source; no `start` node is an edge target.
    for edge in &workflow.edges {
        if let Some(src) = workflow.node(&edge.source) {
            if src.node_type == END_NODE_TYPE {
                errors.push(format!("end node {} cannot be an edge source", src.id));
            }
        }
        if let Some(tgt) = workflow.node(&edge.target) {
            if tgt.node_type == START_NODE_TYPE {
                errors.push(format!("start node {} cannot be an edge target", tgt.id));
            }
        }
    }

    // Rule 5: every non-end node has at least one outgoing edge.
    for node in &workflow.nodes {
        if node.node_type == END_NODE_TYPE {
            continue;
        }
        if workflow.edges_from(&node.id).next().is_none() {
            errors.push(format!(
                "node {} ({}) has no outgoing edge",
                node.id, node.node_type
            ));
        }
    }

    // Rule 6: every node type (except start/end) resolves in the registry.
    let mut resolved_types: HashMap<&str, &super::registry::NodeType> = HashMap::new();
    for node in &workflow.nodes {
        if node.node_type == START_NODE_TYPE || node.node_type == END_NODE_TYPE {
            continue;
        }
        match registry.get(&node.node_type) {
            Some(node_type) => {
                resolved_types.insert(node.id.as_str(), node_type);
            }
            None => errors.push(format!(
                "node {} has unknown node_type {}",
                node.id, node.node_type
            )),
        }
    }

    // Rule 7: conditional-node port coverage.
    for node in &workflow.nodes {
        let Some(node_type) = resolved_types.get(node.id.as_str()) else {
            continue;
        };
        let ports = node_type.output_ports(&node.config);
        if ports.len() <= 1 {
            continue;
        }
        let port_ids: HashSet<&str> = ports.iter().map(|p| p.id.as_str()).collect();
        let outgoing: Vec<&Edge> = workflow.edges_from(&node.id).collect();

        for edge in &outgoing {
            if !port_ids.contains(edge.source_port.as_str()) {
                errors.push(format!(
                    "edge {} uses unknown source_port {} on node {}",
                    edge.id, edge.source_port, node.id
                ));
            }
        }
        let covered: HashSet<&str> = outgoing.iter().map(|e| e.source_port.as_str()).collect();
        for port in &ports {
            if !covered.contains(port.id.as_str()) && !port.optional {
                errors.push(format!(
                    "node {} port {} has no outgoing edge and default_port is unset",
                    node.id, port.id
                ));
            }
        }
    }

    // Rule 8: every non-start node is either reachable from the start node by
    // following edges, or has at least one incoming edge of its own (a node
    // wired only from something not (yet) reachable is still flagged, since
    // the BFS below already accounts for every edge transitively reachable
    // from start).
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: Vec<&str> = starts.iter().map(|n| n.id.as_str()).collect();
    while let Some(id) = queue.pop() {
        if !reachable.insert(id) {
            continue;
        }
        for edge in workflow.edges_from(id) {
            queue.push(edge.target.as_str());
        }
    }
    for node in &workflow.nodes {
        if node.node_type == START_NODE_TYPE {
            continue;
        }
        if reachable.contains(node.id.as_str()) {
            continue;
        }
        if workflow.edges_into(&node.id).next().is_some() {
            continue;
        }
        errors.push(format!(
            "node {} ({}) is unreachable from start and has no incoming edge",
            node.id, node.node_type
        ));
    }

    errors
}
