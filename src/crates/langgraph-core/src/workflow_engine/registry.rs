//! The node registry: the global catalog of node *types*.
//!
//! A [`NodeType`] is a compile-time-constant descriptor (label, parameter
//! schema, output ports) plus three runtime hooks: `execute`, an optional
//! `routing` function, and an optional `dynamic_ports` function. The
//! `Arc<dyn Fn(...) -> Pin<Box<dyn Future<...>>>>` shape mirrors the
//! teacher's node-executor registration, generalized to the three hook
//! kinds a workflow node needs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::error::WorkflowResult;
use super::runtime::ExecutionContext;
use super::state::RunState;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `execute(state, ctx, config) -> state_delta`.
pub type ExecuteFn = Arc<
    dyn Fn(RunState, ExecutionContext, Value) -> BoxFuture<'static, WorkflowResult<Value>>
        + Send
        + Sync,
>;

/// `routing(config) -> (state -> port_id)`. Declared once per node type, and
/// itself produces the per-instance routing closure (so it can capture the
/// instance's config, e.g. `conditional_router`'s `route_map`).
pub type RoutingFn = Arc<dyn Fn(Value) -> Arc<dyn Fn(&RunState) -> String + Send + Sync> + Send + Sync>;

/// `dynamic_ports(config) -> [OutputPort]`.
pub type DynamicPortsFn = Arc<dyn Fn(&Value) -> Vec<OutputPort> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Select,
    Textarea,
    Json,
    PromptTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub group: Option<String>,
    /// This parameter's value determines the instance's concrete output port
    /// set; catalog serialization must compute ports from config when set.
    #[serde(default)]
    pub generates_ports: bool,
}

impl ParameterSpec {
    pub fn string(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            param_type: ParameterType::String,
            default: None,
            required: false,
            description: String::new(),
            options: Vec::new(),
            min: None,
            max: None,
            group: None,
            generates_ports: false,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn generates_ports(mut self) -> Self {
        self.generates_ports = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputPort {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Producers may omit an outgoing edge for this port; missing-port
    /// routing falls back to the node's `default_port` parameter.
    #[serde(default)]
    pub optional: bool,
}

impl OutputPort {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: String::new(),
            description: String::new(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn default_set() -> Vec<OutputPort> {
        vec![OutputPort::new(super::workflow::DEFAULT_PORT)]
    }
}

/// A registered node type: its schema plus its runtime hooks.
#[derive(Clone)]
pub struct NodeType {
    pub node_type: String,
    pub label: String,
    pub description: String,
    pub category: String,
    pub icon: String,
    pub color: String,
    pub parameters: Vec<ParameterSpec>,
    pub static_output_ports: Vec<OutputPort>,
    pub execute: ExecuteFn,
    pub routing: Option<RoutingFn>,
    pub dynamic_ports: Option<DynamicPortsFn>,
}

impl std::fmt::Debug for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeType")
            .field("node_type", &self.node_type)
            .field("label", &self.label)
            .field("is_conditional", &(self.static_output_ports.len() > 1 || self.dynamic_ports.is_some()))
            .finish()
    }
}

impl NodeType {
    /// Concrete output ports for a given instance config, computing dynamic
    /// ports when this type declares them.
    pub fn output_ports(&self, config: &serde_json::Map<String, Value>) -> Vec<OutputPort> {
        if let Some(dynamic) = &self.dynamic_ports {
            dynamic(&Value::Object(config.clone()))
        } else {
            self.static_output_ports.clone()
        }
    }

    pub fn is_conditional(&self, config: &serde_json::Map<String, Value>) -> bool {
        self.output_ports(config).len() > 1
    }
}

/// Serializable catalog entry: the §6 node-catalog wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub node_type: String,
    pub label: String,
    pub description: String,
    pub category: String,
    pub icon: String,
    pub color: String,
    pub is_conditional: bool,
    pub parameters: Vec<ParameterSpec>,
    pub output_ports: Vec<OutputPort>,
}

/// The canonical `node_type -> NodeType` mapping plus an `alias -> canonical`
/// table. Thread-safe via the caller wrapping it (the registry itself is
/// typically built once at process start and shared behind an `Arc`).
#[derive(Clone, Default)]
pub struct NodeRegistry {
    types: HashMap<String, NodeType>,
    aliases: HashMap<String, String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Re-registering the same `node_type` is allowed
    /// (last writer wins) and logs a warning.
    pub fn register(&mut self, node_type: NodeType) {
        if self.types.contains_key(&node_type.node_type) {
            tracing::warn!(node_type = %node_type.node_type, "re-registering node type, last writer wins");
        }
        self.types.insert(node_type.node_type.clone(), node_type);
    }

    /// Record an `alias -> canonical` redirection so a renamed type keeps
    /// old templates resolvable.
    pub fn register_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases.insert(alias.to_string(), canonical.to_string());
    }

    fn resolve<'a>(&self, node_type: &'a str) -> &'a str {
        self.aliases
            .get(node_type)
            .map(|s| s.as_str())
            .unwrap_or(node_type)
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeType> {
        self.types.get(self.resolve(node_type))
    }

    pub fn list_all(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Produce a deterministic catalog export, used by the external editor
    /// collaborator (out of scope; format is part of the public interface).
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self
            .types
            .values()
            .map(|nt| {
                let default_config = serde_json::Map::new();
                let ports = nt.output_ports(&default_config);
                CatalogEntry {
                    node_type: nt.node_type.clone(),
                    label: nt.label.clone(),
                    description: nt.description.clone(),
                    category: nt.category.clone(),
                    icon: nt.icon.clone(),
                    color: nt.color.clone(),
                    is_conditional: ports.len() > 1 || nt.dynamic_ports.is_some(),
                    parameters: nt.parameters.clone(),
                    output_ports: ports,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_execute() -> ExecuteFn {
        Arc::new(|_state, _ctx, _config| Box::pin(async { Ok(Value::Null) }))
    }

    #[test]
    fn alias_resolves_to_canonical() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType {
            node_type: "llm_call".into(),
            label: "LLM Call".into(),
            description: String::new(),
            category: "model".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: OutputPort::default_set(),
            execute: dummy_execute(),
            routing: None,
            dynamic_ports: None,
        });
        registry.register_alias("call_model", "llm_call");
        assert!(registry.get("call_model").is_some());
        assert_eq!(registry.get("call_model").unwrap().node_type, "llm_call");
    }

    #[test]
    fn re_registration_is_last_writer_wins() {
        let mut registry = NodeRegistry::new();
        for label in ["first", "second"] {
            registry.register(NodeType {
                node_type: "answer".into(),
                label: label.into(),
                description: String::new(),
                category: "model".into(),
                icon: String::new(),
                color: String::new(),
                parameters: vec![],
                static_output_ports: OutputPort::default_set(),
                execute: dummy_execute(),
                routing: None,
                dynamic_ports: None,
            });
        }
        assert_eq!(registry.get("answer").unwrap().label, "second");
    }

    #[test]
    fn catalog_is_deterministic() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeType {
            node_type: "review".into(),
            label: "Review".into(),
            description: String::new(),
            category: "control".into(),
            icon: String::new(),
            color: String::new(),
            parameters: vec![],
            static_output_ports: vec![
                OutputPort::new("approved"),
                OutputPort::new("retry"),
                OutputPort::new("end"),
            ],
            execute: dummy_execute(),
            routing: None,
            dynamic_ports: None,
        });
        let first = registry.catalog();
        let second = registry.catalog();
        assert_eq!(first.len(), second.len());
        assert!(first[0].is_conditional);
    }
}
