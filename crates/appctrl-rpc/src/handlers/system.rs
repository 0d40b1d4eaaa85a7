//! Task manager, port manager and icon handlers.

use super::{require_str_param, require_uint_param};
use crate::server::AppState;
use serde_json::{json, Value};

pub async fn get_processes(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let include_system = params
        .get("include_system")
        .or_else(|| params.get("includeSystem"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let rows = if include_system {
        state.api.list_tasks().await?
    } else {
        state.api.list_user_tasks().await?
    };
    Ok(serde_json::to_value(rows)?)
}

pub async fn get_process_groups(state: &AppState, _params: &Value) -> appctrl_core::Result<Value> {
    Ok(serde_json::to_value(state.api.list_task_groups().await?)?)
}

pub async fn kill_process_by_pid(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let pid: u32 = require_uint_param(params, "pid", "pid")?;
    state.api.kill_task(pid).await?;
    Ok(json!(true))
}

pub async fn kill_process_by_name(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let name = require_str_param(params, "image_name", "imageName")?;
    Ok(serde_json::to_value(state.api.kill_task_group(&name).await?)?)
}

pub async fn get_listening_ports(state: &AppState, _params: &Value) -> appctrl_core::Result<Value> {
    Ok(serde_json::to_value(state.api.list_ports().await?)?)
}

pub async fn kill_port(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let port: u16 = require_uint_param(params, "port", "port")?;
    let pids = state.api.kill_port(port).await?;
    Ok(json!({ "success": true, "pids": pids }))
}

pub async fn extract_exe_icon(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let exe_path = require_str_param(params, "exe_path", "exePath")?;
    Ok(json!(state.api.extract_icon_data_url(exe_path).await?))
}
