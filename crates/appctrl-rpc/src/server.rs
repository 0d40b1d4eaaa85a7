//! HTTP server implementation using Axum.

use crate::events::handle_events;
use crate::handlers::{handle_health, handle_rpc};
use appctrl_core::AppCtrlApi;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Core API (supervision, inventories, icons)
    pub api: Arc<AppCtrlApi>,
}

/// Build the router; separate from binding so tests can drive it in-process.
pub fn build_router(api: Arc<AppCtrlApi>) -> Router {
    let state = Arc::new(AppState { api });

    // Configure CORS for the shell's dev server
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .route("/events", get(handle_events))
        .layer(cors)
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    api: Arc<AppCtrlApi>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(api);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn rpc(router: Router, method: &str, params: Value) -> Value {
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
        let request = Request::post("/rpc")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = build_router(Arc::new(AppCtrlApi::new()));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rpc_dispatch_and_errors() {
        let api = Arc::new(AppCtrlApi::new());

        let ok = rpc(build_router(api.clone()), "health_check", json!({})).await;
        assert_eq!(ok["result"]["status"], "ok");

        let running = rpc(build_router(api.clone()), "is_app_running", json!({"appId": "x"})).await;
        assert_eq!(running["result"], false);

        let unknown = rpc(build_router(api.clone()), "stop_app", json!({"app_id": "x"})).await;
        assert_eq!(unknown["error"]["code"], -32001);

        let bad = rpc(build_router(api.clone()), "kill_port", json!({})).await;
        assert_eq!(bad["error"]["code"], -32602);

        let missing = rpc(build_router(api), "no_such_method", json!({})).await;
        assert_eq!(missing["error"]["code"], -32601);
        assert!(missing["error"]["message"].as_str().unwrap().contains("no_such_method"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_and_stop_over_rpc() {
        let api = Arc::new(AppCtrlApi::new());
        let started = rpc(
            build_router(api.clone()),
            "start_app",
            json!({"appId": "s1", "appType": "shell", "executablePath": "sleep 30"}),
        )
        .await;
        assert_eq!(started["result"]["success"], true);
        assert!(started["result"]["pid"].as_u64().unwrap() > 0);

        let stopped = rpc(build_router(api.clone()), "stop_app", json!({"app_id": "s1"})).await;
        assert_eq!(stopped["result"]["status"], "stopped");
        assert!(!api.is_app_running("s1"));
    }

    #[tokio::test]
    async fn test_server_starts() {
        let api = Arc::new(AppCtrlApi::new());
        let addr = start_server(api, "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }
}
