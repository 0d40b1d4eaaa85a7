//! AppCtrl RPC Server - JSON-RPC backend for the desktop shell.
//!
//! This binary provides a JSON-RPC 2.0 server that wraps the appctrl-core
//! library, plus a Server-Sent-Events stream of app notifications.

mod events;
mod handlers;
mod server;
mod wrapper;

use anyhow::Result;
use appctrl_core::config::LivenessConfig;
use appctrl_core::AppCtrlApi;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "appctrl-rpc")]
#[command(about = "JSON-RPC server for AppCtrl")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Liveness polling period in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins when set
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting AppCtrl RPC Server");

    let api = Arc::new(AppCtrlApi::new());
    let interval = args
        .poll_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(LivenessConfig::POLL_INTERVAL);
    api.start_liveness_monitor(interval).await;

    // Start the server
    let addr = server::start_server(api.clone(), &args.host, args.port).await?;

    // Print port for the shell to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping apps");
    api.shutdown().await;

    Ok(())
}
