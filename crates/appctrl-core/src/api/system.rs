//! Inventory and icon methods on AppCtrlApi.
//!
//! Scans are syscall-bound, so each one runs on the blocking pool.

use std::path::PathBuf;

use crate::error::{AppCtrlError, Result};
use crate::icon::IconBitmap;
use crate::inventory::{group_tasks, KillOutcome, PortInfo, TaskGroup, TaskInfo};
use crate::AppCtrlApi;

async fn blocking<T, F>(what: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppCtrlError::Other(format!("{what} failed: {e}")))?
}

impl AppCtrlApi {
    // ========================================
    // Process Table Methods
    // ========================================

    /// Whether any live process matches `exe_path` (full path, then name).
    pub async fn is_running(&self, exe_path: &str) -> Result<bool> {
        let liveness = self.liveness.clone();
        let exe_path = exe_path.to_string();
        blocking("process scan", move || liveness.is_running(&exe_path)).await
    }

    /// Every OS process.
    pub async fn list_tasks(&self) -> Result<Vec<TaskInfo>> {
        let tasks = self.tasks.clone();
        blocking("process scan", move || tasks.list()).await
    }

    /// Every OS process except OS-core ones.
    pub async fn list_user_tasks(&self) -> Result<Vec<TaskInfo>> {
        let tasks = self.tasks.clone();
        blocking("process scan", move || tasks.list_user_tasks()).await
    }

    /// User processes grouped by image name.
    pub async fn list_task_groups(&self) -> Result<Vec<TaskGroup>> {
        Ok(group_tasks(&self.list_user_tasks().await?))
    }

    pub async fn kill_task(&self, pid: u32) -> Result<()> {
        let tasks = self.tasks.clone();
        blocking("terminate", move || tasks.kill(pid)).await
    }

    /// Terminate every process named `image_name`; outcomes per pid.
    pub async fn kill_task_group(&self, image_name: &str) -> Result<Vec<KillOutcome>> {
        let tasks = self.tasks.clone();
        let image_name = image_name.to_string();
        blocking("terminate", move || tasks.kill_group(&image_name)).await
    }

    // ========================================
    // Port Methods
    // ========================================

    pub async fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = self.ports.clone();
        blocking("port scan", move || ports.list()).await
    }

    /// Terminate whatever currently owns `port`. Returns the pids killed.
    pub async fn kill_port(&self, port: u16) -> Result<Vec<u32>> {
        let ports = self.ports.clone();
        blocking("terminate", move || ports.kill(port)).await
    }

    // ========================================
    // Icon Methods
    // ========================================

    /// Highest-resolution icon of an executable, as PNG.
    pub async fn extract_icon(&self, exe_path: impl Into<PathBuf>) -> Result<IconBitmap> {
        let icons = self.icons;
        let path = exe_path.into();
        blocking("icon extraction", move || icons.extract(&path)).await
    }

    /// [`Self::extract_icon`] as a `data:image/png;base64,...` URL.
    pub async fn extract_icon_data_url(&self, exe_path: impl Into<PathBuf>) -> Result<String> {
        Ok(self.extract_icon(exe_path).await?.to_data_url())
    }
}
