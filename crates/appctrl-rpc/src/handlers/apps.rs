//! App lifecycle handlers.

use super::{get_str_param, require_str_param, require_typed_param};
use crate::server::AppState;
use appctrl_core::{AppKind, AppRecord, LaunchSpec, WatchTarget};
use serde_json::{json, Value};
use tracing::info;

pub async fn start_app(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let app_id = require_str_param(params, "app_id", "appId")?;
    let command = get_str_param(params, "executable_path", "executablePath")
        .or_else(|| get_str_param(params, "command_path", "commandPath"))
        .map(String::from)
        .ok_or_else(|| appctrl_core::AppCtrlError::InvalidParams {
            message: "Missing required parameter: executable_path".into(),
        })?;
    let kind = get_str_param(params, "app_type", "appType")
        .and_then(AppKind::parse)
        .unwrap_or_else(|| AppKind::infer(&command));

    let spec = LaunchSpec::new(kind, command)
        .with_arguments(get_str_param(params, "arguments", "arguments").unwrap_or_default())
        .with_working_dir(
            get_str_param(params, "working_directory", "workingDirectory").unwrap_or_default(),
        )
        .with_env_lines(
            get_str_param(params, "environment_vars", "environmentVars").unwrap_or_default(),
        );

    let pid = state.api.start_app(&app_id, spec).await?;
    info!(app_id = %app_id, pid, "Started via RPC");
    Ok(json!({ "success": true, "pid": pid }))
}

pub async fn stop_app(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let app_id = require_str_param(params, "app_id", "appId")?;
    let hint = get_str_param(params, "executable_path", "executablePath");
    let outcome = state.api.stop_app(&app_id, hint).await?;
    Ok(serde_json::to_value(outcome)?)
}

pub async fn is_app_running(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let app_id = require_str_param(params, "app_id", "appId")?;
    Ok(json!(state.api.is_app_running(&app_id)))
}

pub async fn check_process_running(
    state: &AppState,
    params: &Value,
) -> appctrl_core::Result<Value> {
    let exe_path = require_str_param(params, "exe_path", "exePath")?;
    Ok(json!(state.api.is_running(&exe_path).await?))
}

pub async fn watch_apps(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let apps: Vec<AppRecord> = require_typed_param(params, "apps", "apps")?;
    let count = apps.len();
    state.api.watch_apps(apps.iter().map(WatchTarget::from));
    Ok(json!({ "success": true, "watching": count }))
}

pub async fn reconcile_records(state: &AppState, params: &Value) -> appctrl_core::Result<Value> {
    let mut records: Vec<AppRecord> = require_typed_param(params, "records", "records")?;
    let changed = state.api.reconcile_records(&mut records).await?;
    Ok(json!({ "records": records, "changed": changed }))
}
