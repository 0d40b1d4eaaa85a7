//! JSON-RPC request handlers, split by domain.

mod apps;
mod system;

use crate::server::AppState;
use crate::wrapper::wrap_response;
use appctrl_core::AppCtrlError;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

fn get_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    params.get(snake).or_else(|| params.get(camel))
}

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    get_param(params, snake, camel).and_then(|v| v.as_str())
}

fn missing(name: &str) -> AppCtrlError {
    AppCtrlError::InvalidParams {
        message: format!("Missing required parameter: {}", name),
    }
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> appctrl_core::Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| missing(snake))
}

/// Extract a required unsigned integer parameter that fits in `T`.
pub(crate) fn require_uint_param<T: TryFrom<u64>>(
    params: &Value,
    snake: &str,
    camel: &str,
) -> appctrl_core::Result<T> {
    let raw = get_param(params, snake, camel)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| missing(snake))?;
    T::try_from(raw).map_err(|_| AppCtrlError::InvalidParams {
        message: format!("Parameter {} out of range: {}", snake, raw),
    })
}

/// Deserialize a required parameter into `T`.
pub(crate) fn require_typed_param<T: serde::de::DeserializeOwned>(
    params: &Value,
    snake: &str,
    camel: &str,
) -> appctrl_core::Result<T> {
    let raw = get_param(params, snake, camel).ok_or_else(|| missing(snake))?;
    serde_json::from_value(raw.clone()).map_err(|e| AppCtrlError::InvalidParams {
        message: format!("Invalid parameter {}: {}", snake, e),
    })
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(
                id,
                json!({
                    "status": "ok",
                    "platform": appctrl_core::platform::current_platform(),
                    "running_apps": state.api.running_apps().len(),
                }),
            )),
        );
    }

    match dispatch_method(&state, method, &params).await {
        Ok(value) => {
            let wrapped = wrap_response(method, value);
            (StatusCode::OK, Json(JsonRpcResponse::success(id, wrapped)))
        }
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> appctrl_core::Result<Value> {
    match method {
        // App lifecycle
        "start_app" => apps::start_app(state, params).await,
        "stop_app" => apps::stop_app(state, params).await,
        "is_app_running" => apps::is_app_running(state, params).await,
        "check_process_running" => apps::check_process_running(state, params).await,
        "watch_apps" => apps::watch_apps(state, params).await,
        "reconcile_records" => apps::reconcile_records(state, params).await,

        // Task manager
        "get_processes" => system::get_processes(state, params).await,
        "get_process_groups" => system::get_process_groups(state, params).await,
        "kill_process_by_pid" => system::kill_process_by_pid(state, params).await,
        "kill_process_by_name" => system::kill_process_by_name(state, params).await,

        // Port manager
        "get_listening_ports" => system::get_listening_ports(state, params).await,
        "kill_port" => system::kill_port(state, params).await,

        // Icons
        "extract_exe_icon" => system::extract_exe_icon(state, params).await,

        _ => Err(AppCtrlError::MethodNotFound {
            method: method.to_string(),
        }),
    }
}
