//! The single [`RunState`] record threaded through every node invocation of
//! one workflow run, and the shallow per-field merge discipline nodes'
//! returned deltas are folded into.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::resilience::{CompletionSignal, ContextBudget};
use crate::messages::Message;

/// A reference into the memory/retrieval collaborator (interface only; the
/// core treats the referenced content as opaque).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRef {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub summary: Option<String>,
}

/// List-valued fields that append on merge instead of overwriting.
const APPEND_FIELDS: &[&str] = &["messages", "memory_refs"];

/// The runtime graph state threaded through a single workflow run.
///
/// Known fields are typed; everything else a node config writes (`answer`,
/// `difficulty`, `review_count`, `todos`, ...) lives in `extra` and is merged
/// with the same shallow-per-field discipline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunState {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_output: String,
    #[serde(default)]
    pub iteration: i64,
    #[serde(default)]
    pub max_iterations: i64,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub completion_signal: CompletionSignal,
    #[serde(default)]
    pub completion_detail: Option<String>,
    #[serde(default)]
    pub context_budget: Option<ContextBudget>,
    #[serde(default)]
    pub memory_refs: Vec<MemoryRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunState {
    pub fn new(input: impl Into<String>, max_iterations: i64) -> Self {
        Self {
            input: input.into(),
            max_iterations,
            ..Default::default()
        }
    }

    /// The `invoke` text result: `final_answer` if set, else `last_output`.
    pub fn final_answer(&self) -> String {
        match self.extra.get("final_answer") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => self.last_output.clone(),
        }
    }

    /// Merge a node's returned delta into this state by field, per the
    /// runtime's state-merge discipline: `messages`/`memory_refs` append;
    /// a single-element list under `current_todo_index` replaces that
    /// element; every other field overwrites.
    pub fn merge(&mut self, delta: Value) {
        let Value::Object(delta) = delta else {
            return;
        };

        let mut fields = delta;

        if let Some(Value::Array(new_messages)) = fields.remove("messages") {
            for raw in new_messages {
                if let Ok(msg) = serde_json::from_value::<Message>(raw) {
                    self.messages.push(msg);
                }
            }
        }
        if let Some(Value::Array(new_refs)) = fields.remove("memory_refs") {
            for raw in new_refs {
                if let Ok(r) = serde_json::from_value::<MemoryRef>(raw) {
                    self.memory_refs.push(r);
                }
            }
        }

        // Snapshot the pre-merge index: a single node's delta commonly carries
        // both a todo-list update and the advanced `current_todo_index` in the
        // same call, and `Map`'s alphabetical key order would otherwise let
        // the index update apply before the list replace-at-index reads it.
        let pre_merge_todo_index = self.extra.get("current_todo_index").and_then(Value::as_u64);

        for (key, value) in fields {
            self.merge_scalar_field(&key, value, pre_merge_todo_index);
        }
    }

    fn merge_scalar_field(&mut self, key: &str, value: Value, pre_merge_todo_index: Option<u64>) {
        match key {
            "input" => { /* set once at run start, never mutated */ }
            "last_output" => {
                if let Value::String(s) = value {
                    self.last_output = s;
                }
            }
            "iteration" => {
                if let Some(n) = value.as_i64() {
                    self.iteration = n;
                }
            }
            "max_iterations" => {
                if let Some(n) = value.as_i64() {
                    self.max_iterations = n;
                }
            }
            "is_complete" => {
                if let Some(b) = value.as_bool() {
                    self.is_complete = b;
                }
            }
            "error" => {
                self.error = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                };
            }
            "current_step" => {
                if let Value::String(s) = value {
                    self.current_step = s;
                }
            }
            "completion_signal" => {
                if let Ok(sig) = serde_json::from_value::<CompletionSignal>(value) {
                    self.completion_signal = sig;
                }
            }
            "completion_detail" => {
                self.completion_detail = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                };
            }
            "context_budget" => {
                if let Ok(budget) = serde_json::from_value::<ContextBudget>(value) {
                    self.context_budget = Some(budget);
                }
            }
            _ => self.merge_extra_field(key, value, pre_merge_todo_index),
        }
    }

    /// Replace-at-index semantics for todo-like list fields: when the delta
    /// for an already-list-valued extra field is a single-element list and
    /// `current_todo_index` is set, replace that element rather than
    /// appending. Otherwise overwrite the whole field (list-replace or
    /// scalar-replace, per the runtime's declared per-field semantics).
    fn merge_extra_field(&mut self, key: &str, value: Value, pre_merge_todo_index: Option<u64>) {
        if let Value::Array(ref new_items) = value {
            if new_items.len() == 1 {
                if let Some(existing) = self.extra.get(key).cloned() {
                    if let Value::Array(mut existing_items) = existing {
                        if let Some(idx) = pre_merge_todo_index {
                            let idx = idx as usize;
                            if idx < existing_items.len() {
                                existing_items[idx] = new_items[0].clone();
                                self.extra.insert(key.to_string(), Value::Array(existing_items));
                                return;
                            }
                        }
                    }
                }
            }
        }
        self.extra.insert(key.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "input" => Some(Value::String(self.input.clone())),
            "last_output" => Some(Value::String(self.last_output.clone())),
            "iteration" => Some(Value::from(self.iteration)),
            "max_iterations" => Some(Value::from(self.max_iterations)),
            "is_complete" => Some(Value::from(self.is_complete)),
            "error" => self.error.clone().map(Value::String),
            "current_step" => Some(Value::String(self.current_step.clone())),
            _ => self.extra.get(field).cloned(),
        }
    }
}

/// Whether `messages`/`memory_refs` append on merge (exposed for node
/// implementations that want to check before writing).
pub fn is_append_field(field: &str) -> bool {
    APPEND_FIELDS.contains(&field)
}

/// `{field_name}` substitution from state. Missing keys produce the literal
/// template; non-string values are stringified; null becomes empty string.
pub fn format_template(template: &str, state: &RunState) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i + 1..].find('}') {
                let field = &template[i + 1..i + 1 + end];
                if !field.is_empty() && field.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    match state.get(field) {
                        Some(Value::String(s)) => out.push_str(&s),
                        Some(Value::Null) | None => {
                            if state.extra.contains_key(field) || field_is_known(field) {
                                // known-but-null field: empty string
                            } else {
                                out.push_str(&template[i..=i + 1 + end]);
                                i += end + 2;
                                continue;
                            }
                        }
                        Some(other) => out.push_str(&other.to_string()),
                    }
                    i += end + 2;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn field_is_known(field: &str) -> bool {
    matches!(
        field,
        "input" | "last_output" | "iteration" | "max_iterations" | "is_complete" | "error" | "current_step"
    )
}
