//! Small config-reading helpers shared by the built-in node implementations.
//!
//! Node `config` arrives as a `serde_json::Value::Object` (the instance's
//! `NodeInstance.config` map). These accessors apply the node type's
//! declared default when a key is absent, the same pattern every built-in
//! node uses to pull typed fields out of a loosely-typed JSON blob.

use serde_json::Value;

pub fn cfg_str(config: &Value, key: &str, default: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

pub fn cfg_opt_str(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn cfg_bool(config: &Value, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub fn cfg_i64(config: &Value, key: &str, default: i64) -> i64 {
    config.get(key).and_then(Value::as_i64).unwrap_or(default)
}

pub fn cfg_str_list(config: &Value, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
