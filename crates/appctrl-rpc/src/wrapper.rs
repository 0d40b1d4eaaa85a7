//! Response wrapping for frontend compatibility.
//!
//! The shell expects list responses as `{success: true, <key>: [...]}`;
//! the core API returns raw data. Methods not listed pass through.

use serde_json::{json, Value};

fn list_key(method: &str) -> Option<&'static str> {
    match method {
        "get_processes" => Some("processes"),
        "get_process_groups" => Some("groups"),
        "get_listening_ports" => Some("ports"),
        "kill_process_by_name" => Some("results"),
        _ => None,
    }
}

/// Wrap API responses to match the frontend's expected format.
pub fn wrap_response(method: &str, result: Value) -> Value {
    match list_key(method) {
        Some(key) => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert("success".into(), json!(true));
            wrapped.insert(
                key.into(),
                if result.is_null() { json!([]) } else { result },
            );
            Value::Object(wrapped)
        }
        None => result,
    }
}
