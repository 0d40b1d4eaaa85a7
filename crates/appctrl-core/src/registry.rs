//! Registry of supervised processes.
//!
//! The registry is the single source of truth for which apps this tool is
//! currently supervising. Map mutations are short and atomic under one lock;
//! operations on a single app are serialized by that entry's operation lock,
//! so different apps proceed fully concurrently.

use crate::cancel::CancellationToken;
use crate::error::{AppCtrlError, Result};
use crate::models::{AppKind, LaunchSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Exited,
}

impl ProcessState {
    /// Whether the entry still owns a live (or about to be live) OS process.
    pub fn is_active(&self) -> bool {
        !matches!(self, ProcessState::Exited)
    }
}

/// Requests sent from the stop path to the task that owns the child handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildControl {
    Terminate,
    Kill,
}

/// Exit status as published by the waiter: `None` until the process is gone,
/// then `Some(exit_code)`.
pub(crate) type ExitStatus = Option<Option<i32>>;

/// Live OS handle of a managed process.
///
/// The child itself is owned by its waiter task; this handle talks to it.
#[derive(Debug)]
pub(crate) struct ProcessHandle {
    pid: u32,
    control: mpsc::UnboundedSender<ChildControl>,
    exit: watch::Receiver<ExitStatus>,
}

impl ProcessHandle {
    pub(crate) fn new(
        pid: u32,
        control: mpsc::UnboundedSender<ChildControl>,
        exit: watch::Receiver<ExitStatus>,
    ) -> Self {
        Self { pid, control, exit }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Ask the waiter to signal the child. Returns false if the waiter is gone.
    pub(crate) fn send(&self, request: ChildControl) -> bool {
        self.control.send(request).is_ok()
    }

    pub(crate) fn exit_status(&self) -> ExitStatus {
        *self.exit.borrow()
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// Returns `Some(exit_code)` once exited, `None` on timeout.
    pub(crate) async fn wait_exit(&self, timeout: Duration) -> ExitStatus {
        let mut rx = self.exit.clone();
        let status = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(status)) => *status,
            _ => self.exit_status(),
        };
        status
    }
}

/// One supervised application lifetime.
///
/// A new instance is created for every start; instances are never reused
/// across distinct OS process lifetimes.
#[derive(Debug)]
pub struct ManagedProcess {
    app_id: String,
    spec: LaunchSpec,
    generation: u64,
    started_at: DateTime<Utc>,
    state: Mutex<ProcessState>,
    op: Arc<tokio::sync::Mutex<()>>,
    handle: OnceLock<ProcessHandle>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ManagedProcess {
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn kind(&self) -> AppKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Registration counter, unique per lifetime.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("{}: {:?} -> {:?}", self.app_id, *current, state);
        *current = state;
    }

    /// OS pid, once spawned.
    pub fn pid(&self) -> Option<u32> {
        self.handle.get().map(ProcessHandle::pid)
    }

    pub(crate) fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.get()
    }

    pub(crate) fn attach(&self, handle: ProcessHandle) {
        if self.handle.set(handle).is_err() {
            tracing::warn!("{}: process handle attached twice", self.app_id);
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn add_reader(&self, task: JoinHandle<()>) {
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    pub(crate) fn take_readers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.readers.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Serialize an operation (start, stop, exit handling) on this entry.
    pub(crate) async fn lock_op(&self) -> OwnedMutexGuard<()> {
        self.op.clone().lock_owned().await
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            app_id: self.app_id.clone(),
            kind: self.spec.kind,
            pid: self.pid(),
            state: self.state(),
            started_at: self.started_at,
        }
    }
}

/// Serializable view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub app_id: String,
    pub kind: AppKind,
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Arc<ManagedProcess>>,
    /// Apps whose last lifetime ended while supervised and were not restarted.
    exited: HashSet<String>,
}

/// Concurrent map of `app_id` to its live managed process.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: RwLock<Inner>,
    next_generation: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new lifetime for `app_id` in the `Starting` state.
    ///
    /// The returned guard holds the entry's operation lock, so no stop or exit
    /// handling for this app can run until the caller finishes starting it.
    ///
    /// # Errors
    ///
    /// [`AppCtrlError::Conflict`] if the app already has an active entry.
    pub fn register(
        &self,
        app_id: &str,
        spec: LaunchSpec,
    ) -> Result<(Arc<ManagedProcess>, OwnedMutexGuard<()>)> {
        let mut inner = self.write();
        if inner.entries.contains_key(app_id) {
            return Err(AppCtrlError::Conflict {
                app_id: app_id.to_string(),
            });
        }

        let op = Arc::new(tokio::sync::Mutex::new(()));
        let guard = op
            .clone()
            .try_lock_owned()
            .map_err(|e| AppCtrlError::Other(format!("fresh entry lock busy: {e}")))?;

        let process = Arc::new(ManagedProcess {
            app_id: app_id.to_string(),
            spec,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed) + 1,
            started_at: Utc::now(),
            state: Mutex::new(ProcessState::Starting),
            op,
            handle: OnceLock::new(),
            readers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        inner.exited.remove(app_id);
        inner.entries.insert(app_id.to_string(), process.clone());
        debug!("Registered {} (generation {})", app_id, process.generation);
        Ok((process, guard))
    }

    pub fn get(&self, app_id: &str) -> Option<Arc<ManagedProcess>> {
        self.read().entries.get(app_id).cloned()
    }

    pub fn contains(&self, app_id: &str) -> bool {
        self.read().entries.contains_key(app_id)
    }

    /// Remove whatever entry `app_id` currently has.
    pub fn remove(&self, app_id: &str) -> Option<Arc<ManagedProcess>> {
        self.write().entries.remove(app_id)
    }

    /// Remove `process` after its lifetime ended and remember that it exited.
    ///
    /// Only removes the entry if it is still this lifetime; returns false if a
    /// newer lifetime (or nothing) is registered under the id.
    pub(crate) fn retire(&self, process: &ManagedProcess) -> bool {
        let mut inner = self.write();
        let current = inner
            .entries
            .get(&process.app_id)
            .is_some_and(|p| p.generation == process.generation);
        if current {
            inner.entries.remove(&process.app_id);
            inner.exited.insert(process.app_id.clone());
        }
        current
    }

    /// Undo a registration whose spawn failed. No exit is recorded.
    pub(crate) fn rollback(&self, process: &ManagedProcess) {
        let mut inner = self.write();
        if inner
            .entries
            .get(&process.app_id)
            .is_some_and(|p| p.generation == process.generation)
        {
            inner.entries.remove(&process.app_id);
        }
    }

    /// Whether the last supervised lifetime of `app_id` already ended.
    pub fn was_exited(&self, app_id: &str) -> bool {
        self.read().exited.contains(app_id)
    }

    /// All active entries, ordered by app id.
    pub fn list(&self) -> Vec<Arc<ManagedProcess>> {
        let mut entries: Vec<_> = self.read().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        entries
    }

    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        self.list().iter().map(|p| p.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec::new(AppKind::Exe, "/bin/true")
    }

    #[tokio::test]
    async fn test_register_conflict() {
        let registry = ProcessRegistry::new();
        let (first, _guard) = registry.register("a1", spec()).unwrap();
        assert_eq!(first.state(), ProcessState::Starting);

        let err = registry.register("a1", spec()).unwrap_err();
        assert!(matches!(err, AppCtrlError::Conflict { .. }));
        assert_eq!(registry.len(), 1);

        // Different ids are independent.
        assert!(registry.register("a2", spec()).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_register_holds_operation_lock() {
        let registry = ProcessRegistry::new();
        let (process, guard) = registry.register("a1", spec()).unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), process.lock_op()).await;
        assert!(blocked.is_err(), "op lock should be held by the starter");

        drop(guard);
        let _relocked = process.lock_op().await;
    }

    #[tokio::test]
    async fn test_retire_only_removes_same_generation() {
        let registry = ProcessRegistry::new();
        let (old, guard) = registry.register("a1", spec()).unwrap();
        drop(guard);
        assert!(registry.retire(&old));
        assert!(registry.was_exited("a1"));

        let (new, _guard) = registry.register("a1", spec()).unwrap();
        assert!(new.generation() > old.generation());
        assert!(!registry.was_exited("a1"));

        // A late retire from the old lifetime must not evict the new one.
        assert!(!registry.retire(&old));
        assert!(registry.contains("a1"));
    }

    #[tokio::test]
    async fn test_rollback_does_not_mark_exited() {
        let registry = ProcessRegistry::new();
        let (process, _guard) = registry.register("a1", spec()).unwrap();
        registry.rollback(&process);
        assert!(registry.is_empty());
        assert!(!registry.was_exited("a1"));
    }

    #[tokio::test]
    async fn test_wait_exit_reports_status_or_times_out() {
        let (control, _control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = ProcessHandle::new(7, control, exit_rx);

        assert_eq!(handle.wait_exit(Duration::from_millis(20)).await, None);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            exit_tx.send_replace(Some(Some(3)));
        });
        assert_eq!(handle.wait_exit(Duration::from_secs(5)).await, Some(Some(3)));
        assert_eq!(handle.exit_status(), Some(Some(3)));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let registry = ProcessRegistry::new();
        for id in ["c", "a", "b"] {
            let _ = registry.register(id, spec()).unwrap();
        }
        let ids: Vec<_> = registry
            .list()
            .iter()
            .map(|p| p.app_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(registry.snapshot()[0].state, ProcessState::Starting);
    }
}
