//! AppCtrl Core - Headless process supervision and system introspection.
//!
//! This crate launches and tracks user-registered executables and scripts,
//! streams their output, reconciles their running state against the OS
//! process table, and offers task/port inventories and icon extraction.
//! It can be used programmatically without any HTTP/RPC layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use appctrl_core::{AppCtrlApi, AppKind, LaunchSpec};
//!
//! #[tokio::main]
//! async fn main() -> appctrl_core::Result<()> {
//!     let api = AppCtrlApi::new();
//!     let mut events = api.subscribe();
//!
//!     let spec = LaunchSpec::new(AppKind::Exe, "/usr/bin/ping").with_arguments("-c 4 localhost");
//!     let pid = api.start_app("a1", spec).await?;
//!     println!("started pid {pid}");
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {}", event.name(), event.payload());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod icon;
pub mod inventory;
pub mod models;
pub mod platform;
pub mod process;
pub mod registry;

mod api;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::SupervisorOptions;
pub use error::{AppCtrlError, Result};
pub use events::{
    AppEvent, EventChannel, EventSubscription, OutputEvent, OutputStream, StateChangedEvent,
    TerminationEvent, TerminationReason,
};
pub use icon::{icon_data_url, IconBitmap, IconExtractor};
pub use inventory::{
    KillOutcome, KillStatus, PortInfo, PortInventory, ProcessEntry, ProcessTable, Protocol,
    SocketEntry, SocketTable, TaskGroup, TaskInfo, TaskInventory,
};
pub use models::{AppKind, AppRecord, LaunchSpec};
pub use process::{LivenessMonitor, ProcessSupervisor, StopOutcome, WatchTarget};
pub use registry::{ProcessRegistry, ProcessSnapshot, ProcessState};

// Re-export builder from api module
pub use api::AppCtrlApiBuilder;

use process::LivenessHandle;
use std::sync::Arc;

/// Main API struct for AppCtrl operations.
///
/// Owns one registry, one event channel and one process-table capability,
/// shared by the supervisor, the liveness monitor and the inventories so
/// that every component sees the same state.
pub struct AppCtrlApi {
    registry: Arc<ProcessRegistry>,
    events: Arc<EventChannel>,
    supervisor: ProcessSupervisor,
    liveness: Arc<LivenessMonitor>,
    liveness_task: tokio::sync::Mutex<Option<LivenessHandle>>,
    tasks: TaskInventory,
    ports: PortInventory,
    icons: IconExtractor,
    table: Arc<dyn ProcessTable>,
}

impl std::fmt::Debug for AppCtrlApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCtrlApi")
            .field("registry", &self.registry)
            .field("liveness", &self.liveness)
            .finish_non_exhaustive()
    }
}

impl AppCtrlApi {
    /// Create a builder for AppCtrlApi.
    ///
    /// Use the builder to substitute the OS process or socket table, or to
    /// tune supervisor options.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let api = AppCtrlApi::builder()
    ///     .with_options(SupervisorOptions::default())
    ///     .build();
    /// ```
    pub fn builder() -> AppCtrlApiBuilder {
        AppCtrlApiBuilder::new()
    }

    /// Create an instance backed by the real OS tables.
    pub fn new() -> Self {
        AppCtrlApiBuilder::new().build()
    }

    /// Subscribe to output, termination and state-change notifications.
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn liveness(&self) -> &Arc<LivenessMonitor> {
        &self.liveness
    }
}

impl Default for AppCtrlApi {
    fn default() -> Self {
        Self::new()
    }
}
