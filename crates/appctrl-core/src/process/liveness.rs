//! Liveness reconciliation for apps not under direct supervision.
//!
//! Apps may already be running when the session starts, or get killed from
//! outside. The monitor re-checks the OS process table on a timer (and on
//! demand) and emits a state-changed notice only when the observed running
//! flag differs from the last known one.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::events::{EventChannel, StateChangedEvent};
use crate::inventory::{any_matches, ProcessTable};
use crate::models::{AppKind, AppRecord};
use crate::registry::ProcessRegistry;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// An app the monitor keeps an eye on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchTarget {
    pub app_id: String,
    pub kind: AppKind,
    pub exe_path: String,
    /// Last known running flag (the persisted hint).
    #[serde(default)]
    pub is_running: bool,
}

impl From<&AppRecord> for WatchTarget {
    fn from(record: &AppRecord) -> Self {
        Self {
            app_id: record.id.clone(),
            kind: record.app_type,
            exe_path: record.executable_path.clone(),
            is_running: record.is_running,
        }
    }
}

impl WatchTarget {
    /// Only executables can be found in the process table by image name.
    pub(crate) fn is_checkable(&self) -> bool {
        self.kind == AppKind::Exe || self.exe_path.trim().to_lowercase().ends_with(".exe")
    }
}

/// Periodic and reactive process-table reconciliation.
pub struct LivenessMonitor {
    table: Arc<dyn ProcessTable>,
    events: Arc<EventChannel>,
    registry: Option<Arc<ProcessRegistry>>,
    watched: Mutex<BTreeMap<String, WatchTarget>>,
    /// Watched ids whose flag was last set from a supervised lifetime.
    supervised: Mutex<BTreeSet<String>>,
    wake: Notify,
}

impl std::fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("watched", &self.watched_ids())
            .finish_non_exhaustive()
    }
}

impl LivenessMonitor {
    pub fn new(table: Arc<dyn ProcessTable>, events: Arc<EventChannel>) -> Self {
        Self {
            table,
            events,
            registry: None,
            watched: Mutex::new(BTreeMap::new()),
            supervised: Mutex::new(BTreeSet::new()),
            wake: Notify::new(),
        }
    }

    /// Treat apps with an active registry entry as running without scanning.
    pub fn with_registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn watched(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, WatchTarget>> {
        self.watched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn supervised(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.supervised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a live process matches `exe_path` (full path, then file name).
    pub fn is_running(&self, exe_path: &str) -> Result<bool> {
        let entries = self.table.snapshot()?;
        Ok(any_matches(&entries, exe_path))
    }

    /// Replace the watch list.
    pub fn set_watch_list(&self, targets: impl IntoIterator<Item = WatchTarget>) {
        let mut watched = self.watched();
        watched.clear();
        self.supervised().clear();
        for target in targets {
            watched.insert(target.app_id.clone(), target);
        }
        debug!("Liveness watch list: {} apps", watched.len());
    }

    /// Add or replace one watched app.
    pub fn watch(&self, target: WatchTarget) {
        self.watched().insert(target.app_id.clone(), target);
    }

    pub fn unwatch(&self, app_id: &str) -> bool {
        self.supervised().remove(app_id);
        self.watched().remove(app_id).is_some()
    }

    pub fn watched_ids(&self) -> Vec<String> {
        self.watched().keys().cloned().collect()
    }

    /// Last known running flag of a watched app.
    pub fn last_known(&self, app_id: &str) -> Option<bool> {
        self.watched().get(app_id).map(|t| t.is_running)
    }

    /// Ask the running timer for an immediate tick.
    pub fn refresh(&self) {
        self.wake.notify_one();
    }

    /// Re-check every watched executable once and emit changes.
    ///
    /// Performs one process-table scan. Returns the changes it emitted.
    pub fn tick(&self) -> Result<Vec<StateChangedEvent>> {
        let targets: Vec<WatchTarget> = self
            .watched()
            .values()
            .filter(|t| t.is_checkable())
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.table.snapshot()?;
        let mut changes = Vec::new();
        {
            let mut watched = self.watched();
            let mut held = self.supervised();
            for target in targets {
                let supervised = self
                    .registry
                    .as_ref()
                    .and_then(|r| r.get(&target.app_id))
                    .is_some_and(|p| p.state().is_active());
                let running = supervised || any_matches(&entries, &target.exe_path);

                // The list may have been replaced while scanning.
                let Some(current) = watched.get_mut(&target.app_id) else {
                    continue;
                };
                // The supervisor reports its own starts and exits; only
                // external changes are news.
                let quiet = if supervised {
                    held.insert(target.app_id.clone());
                    true
                } else {
                    held.remove(&target.app_id) && !running
                };
                if current.is_running == running {
                    continue;
                }
                current.is_running = running;
                if quiet {
                    debug!(app_id = %target.app_id, running, "Supervised flag updated");
                    continue;
                }
                changes.push(StateChangedEvent {
                    app_id: target.app_id.clone(),
                    is_running: running,
                });
            }
        }

        for change in &changes {
            info!(app_id = %change.app_id, running = change.is_running, "Liveness changed");
            self.events
                .emit_state_changed(&change.app_id, change.is_running);
        }
        Ok(changes)
    }

    /// Run [`Self::tick`] every `interval` and whenever [`Self::refresh`] is
    /// called, until the returned handle is stopped.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> LivenessHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let monitor = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("Liveness monitor started ({:?})", interval);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = monitor.wake.notified() => {}
                }

                let m = Arc::clone(&monitor);
                match tokio::task::spawn_blocking(move || m.tick()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Liveness tick failed: {}", e),
                    Err(e) => warn!("Liveness tick panicked: {}", e),
                }
            }
            debug!("Liveness monitor stopped");
        });

        LivenessHandle { cancel, task }
    }
}

/// Handle to a running liveness timer.
#[derive(Debug)]
pub struct LivenessHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LivenessHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the timer and wait for it to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Liveness task ended abnormally: {}", e);
        }
    }
}
