//! Builder for configuring AppCtrlApi initialization.

use std::sync::Arc;

use crate::config::SupervisorOptions;
use crate::events::EventChannel;
use crate::icon::IconExtractor;
use crate::inventory::{
    NetstatSocketTable, PortInventory, ProcessTable, SocketTable, SystemProcessTable,
    TaskInventory,
};
use crate::process::{LivenessMonitor, ProcessSupervisor};
use crate::registry::ProcessRegistry;
use crate::AppCtrlApi;

/// Builder for configuring AppCtrlApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use appctrl_core::AppCtrlApi;
///
/// let api = AppCtrlApi::builder()
///     .with_process_table(Arc::new(MyTable::default()))
///     .build();
/// ```
pub struct AppCtrlApiBuilder {
    process_table: Option<Arc<dyn ProcessTable>>,
    socket_table: Option<Arc<dyn SocketTable>>,
    options: SupervisorOptions,
}

impl AppCtrlApiBuilder {
    pub fn new() -> Self {
        Self {
            process_table: None,
            socket_table: None,
            options: SupervisorOptions::default(),
        }
    }

    /// Use a custom process table for scans and external termination.
    ///
    /// Default: [`SystemProcessTable`]
    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.process_table = Some(table);
        self
    }

    /// Use a custom socket table for the port inventory.
    ///
    /// Default: [`NetstatSocketTable`]
    pub fn with_socket_table(mut self, table: Arc<dyn SocketTable>) -> Self {
        self.socket_table = Some(table);
        self
    }

    /// Supervisor tuning (grace period, UTF-8 env hints).
    pub fn with_options(mut self, options: SupervisorOptions) -> Self {
        self.options = options;
        self
    }

    /// Wire the components together. Starts no background tasks; see
    /// [`AppCtrlApi::start_liveness_monitor`].
    pub fn build(self) -> AppCtrlApi {
        let table = self
            .process_table
            .unwrap_or_else(|| Arc::new(SystemProcessTable::new()));
        let sockets = self
            .socket_table
            .unwrap_or_else(|| Arc::new(NetstatSocketTable));

        let registry = Arc::new(ProcessRegistry::new());
        let events = Arc::new(EventChannel::new());
        let supervisor = ProcessSupervisor::new(
            registry.clone(),
            events.clone(),
            table.clone(),
            self.options,
        );
        let liveness = Arc::new(
            LivenessMonitor::new(table.clone(), events.clone()).with_registry(registry.clone()),
        );

        AppCtrlApi {
            registry,
            events,
            supervisor,
            liveness,
            liveness_task: tokio::sync::Mutex::new(None),
            tasks: TaskInventory::new(table.clone()),
            ports: PortInventory::new(table.clone(), sockets),
            icons: IconExtractor::new(),
            table,
        }
    }
}

impl Default for AppCtrlApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}
