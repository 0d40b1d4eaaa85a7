//! App lifecycle methods on AppCtrlApi.

use std::time::Duration;

use crate::error::{AppCtrlError, Result};
use crate::inventory::any_matches;
use crate::models::{AppRecord, LaunchSpec};
use crate::process::{StopOutcome, WatchTarget};
use crate::registry::ProcessSnapshot;
use crate::AppCtrlApi;
use tracing::{debug, info};

impl AppCtrlApi {
    // ========================================
    // Supervision Methods
    // ========================================

    /// Launch an app under supervision. Returns the OS pid.
    ///
    /// Output lines, exit and stop notices arrive on [`Self::subscribe`].
    pub async fn start_app(&self, app_id: &str, spec: LaunchSpec) -> Result<u32> {
        let pid = self.supervisor.start(app_id, spec).await?;
        // Keep the liveness view in step without waiting for a tick.
        if self.liveness.last_known(app_id) == Some(false) {
            self.liveness.refresh();
        }
        Ok(pid)
    }

    /// Launch the app described by a persisted record.
    pub async fn start_record(&self, record: &AppRecord) -> Result<u32> {
        self.start_app(&record.id, LaunchSpec::from_record(record)).await
    }

    /// Stop an app.
    ///
    /// `exe_hint` lets an app that was started outside this session be
    /// found in the process table by its executable.
    pub async fn stop_app(&self, app_id: &str, exe_hint: Option<&str>) -> Result<StopOutcome> {
        let outcome = self.supervisor.stop(app_id, exe_hint).await?;
        if matches!(outcome, StopOutcome::StoppedExternal { .. }) {
            self.liveness.refresh();
        }
        Ok(outcome)
    }

    /// Whether `app_id` has an active supervised lifetime.
    pub fn is_app_running(&self, app_id: &str) -> bool {
        self.supervisor.is_app_running(app_id)
    }

    /// Snapshots of every supervised app.
    pub fn running_apps(&self) -> Vec<ProcessSnapshot> {
        self.registry.snapshot()
    }

    // ========================================
    // Liveness Methods
    // ========================================

    /// Replace the set of apps the liveness monitor re-checks and trigger
    /// an immediate check.
    pub fn watch_apps(&self, targets: impl IntoIterator<Item = WatchTarget>) {
        self.liveness.set_watch_list(targets);
        self.liveness.refresh();
    }

    /// Start the periodic liveness timer. Replaces a running timer.
    pub async fn start_liveness_monitor(&self, interval: Duration) {
        let mut slot = self.liveness_task.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        *slot = Some(self.liveness.spawn(interval));
        info!("Liveness monitor running every {:?}", interval);
    }

    /// Stop the liveness timer, if running.
    pub async fn stop_liveness_monitor(&self) -> bool {
        let handle = self.liveness_task.lock().await.take();
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Re-verify the persisted `is_running` hints of `records` in place.
    ///
    /// Supervised apps count as running. Executables are looked up in one
    /// process-table scan; anything else cannot be observed from outside
    /// and is reset to stopped. Returns the ids whose flag changed.
    pub async fn reconcile_records(&self, records: &mut [AppRecord]) -> Result<Vec<String>> {
        let needs_scan = records.iter().any(|r| {
            !self.is_app_running(&r.id) && WatchTarget::from(&*r).is_checkable()
        });
        let entries = if needs_scan {
            let table = self.table.clone();
            tokio::task::spawn_blocking(move || table.snapshot())
                .await
                .map_err(|e| AppCtrlError::Other(format!("process scan failed: {e}")))??
        } else {
            Vec::new()
        };

        let mut changed = Vec::new();
        for record in records.iter_mut() {
            let running = self.is_app_running(&record.id)
                || (WatchTarget::from(&*record).is_checkable()
                    && any_matches(&entries, &record.executable_path));
            if record.is_running != running {
                debug!("{}: running hint {} -> {}", record.id, record.is_running, running);
                record.is_running = running;
                changed.push(record.id.clone());
            }
        }
        Ok(changed)
    }

    // ========================================
    // Teardown
    // ========================================

    /// Stop the liveness timer and every supervised app.
    pub async fn shutdown(&self) {
        self.stop_liveness_monitor().await;
        self.supervisor.stop_all().await;
        info!("AppCtrl shut down");
    }
}
