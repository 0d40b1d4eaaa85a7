//! Process supervisor: start, stop, output capture and exit detection.
//!
//! Each started app gets two reader tasks (stdout, stderr) and one waiter
//! task that owns the child. The waiter and the stop path both finish a
//! lifetime under the entry's operation lock; whichever gets there first while
//! the entry is `Running` emits the termination notice, the other stays quiet.

use super::launcher::build_command;
use crate::cancel::CancellationToken;
use crate::config::{SupervisorConfig, SupervisorOptions};
use crate::error::{AppCtrlError, Result};
use crate::events::{EventChannel, OutputStream, TerminationReason};
use crate::inventory::{find_by_image, ProcessTable};
use crate::models::LaunchSpec;
use crate::platform;
use crate::registry::{
    ChildControl, ExitStatus, ManagedProcess, ProcessHandle, ProcessRegistry, ProcessState,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How a stop request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StopOutcome {
    /// A supervised process was terminated.
    Stopped,
    /// The supervised process had already exited on its own.
    AlreadyExited,
    /// An unsupervised process matching the image path was terminated.
    StoppedExternal { pid: u32 },
}

/// Spawns and stops managed processes.
pub struct ProcessSupervisor {
    registry: Arc<ProcessRegistry>,
    events: Arc<EventChannel>,
    table: Arc<dyn ProcessTable>,
    options: SupervisorOptions,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        events: Arc<EventChannel>,
        table: Arc<dyn ProcessTable>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            registry,
            events,
            table,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Start `app_id`. Returns the OS pid once the spawn succeeded.
    ///
    /// # Errors
    ///
    /// - [`AppCtrlError::Conflict`] if the app is already active
    /// - [`AppCtrlError::Spawn`] if the OS refused to create the process; the
    ///   registry entry is rolled back
    pub async fn start(&self, app_id: &str, spec: LaunchSpec) -> Result<u32> {
        let (process, _op) = self.registry.register(app_id, spec)?;

        let plan = match build_command(app_id, process.spec(), &self.options) {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail_start(&process, e)),
        };

        if plan.working_dir_explicit {
            if let Some(dir) = &plan.working_dir {
                self.events
                    .emit_info(app_id, format!("📁 Working dir: {}", dir.display()));
            }
        }

        let mut child = match tokio::process::Command::from(plan.command).spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = AppCtrlError::Spawn {
                    app_id: app_id.to_string(),
                    message: e.to_string(),
                };
                return Err(self.fail_start(&process, err));
            }
        };

        let Some(pid) = child.id() else {
            let err = AppCtrlError::Spawn {
                app_id: app_id.to_string(),
                message: "process exited before its pid could be read".into(),
            };
            return Err(self.fail_start(&process, err));
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        process.attach(ProcessHandle::new(pid, control_tx, exit_rx));
        process.set_state(ProcessState::Running);

        info!(app_id, pid, "Started {}", process.spec().command_path);
        self.events
            .emit_info(app_id, format!("✓ Started: {}", process.spec().command_path));

        if let Some(stdout) = child.stdout.take() {
            process.add_reader(tokio::spawn(read_lines(
                stdout,
                app_id.to_string(),
                OutputStream::Stdout,
                self.events.clone(),
                process.cancel_token().clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            process.add_reader(tokio::spawn(read_lines(
                stderr,
                app_id.to_string(),
                OutputStream::Stderr,
                self.events.clone(),
                process.cancel_token().clone(),
            )));
        }

        tokio::spawn(supervise_child(
            child,
            control_rx,
            exit_tx,
            process.clone(),
            self.registry.clone(),
            self.events.clone(),
        ));

        Ok(pid)
    }

    fn fail_start(&self, process: &ManagedProcess, err: AppCtrlError) -> AppCtrlError {
        self.registry.rollback(process);
        process.set_state(ProcessState::Exited);
        error!(app_id = process.app_id(), "Failed to start: {}", err);
        let detail = match &err {
            AppCtrlError::Spawn { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.events
            .emit_info(process.app_id(), format!("❌ Failed to start: {detail}"));
        err
    }

    /// Stop `app_id`.
    ///
    /// A supervised app is asked to exit, then force-killed after the grace
    /// period. An unsupervised app is located by `exe_hint` (full path first,
    /// then file name) and the first match is terminated.
    ///
    /// # Errors
    ///
    /// [`AppCtrlError::NotFound`] if the app is neither supervised, nor
    /// recently exited, nor matched by `exe_hint`.
    pub async fn stop(&self, app_id: &str, exe_hint: Option<&str>) -> Result<StopOutcome> {
        if let Some(process) = self.registry.get(app_id) {
            let _op = process.lock_op().await;
            if process.state() == ProcessState::Running {
                self.stop_managed(&process).await;
                return Ok(StopOutcome::Stopped);
            }
            debug!("{}: stop raced with exit ({:?})", app_id, process.state());
            return Ok(StopOutcome::AlreadyExited);
        }

        if let Some(hint) = exe_hint.map(str::trim).filter(|h| !h.is_empty()) {
            if let Some(outcome) = self.stop_external(app_id, hint).await? {
                return Ok(outcome);
            }
        }

        if self.registry.was_exited(app_id) {
            debug!("{}: already exited", app_id);
            return Ok(StopOutcome::AlreadyExited);
        }
        Err(AppCtrlError::not_found(format!("app {app_id}")))
    }

    /// Terminate a supervised lifetime. Caller holds the operation lock.
    async fn stop_managed(&self, process: &Arc<ManagedProcess>) {
        let app_id = process.app_id();
        process.set_state(ProcessState::Stopping);

        let mut status: ExitStatus = None;
        if let Some(handle) = process.handle() {
            status = handle.exit_status();
            if status.is_none() && handle.send(ChildControl::Terminate) {
                status = handle.wait_exit(self.options.stop_grace_period).await;
            }
            if status.is_none() {
                info!(app_id, pid = handle.pid(), "Grace period elapsed, force killing");
                if handle.send(ChildControl::Kill) {
                    status = handle
                        .wait_exit(SupervisorConfig::KILL_CONFIRM_TIMEOUT)
                        .await;
                }
                if status.is_none() {
                    warn!(app_id, pid = handle.pid(), "Kill was not confirmed in time");
                }
            }
        }

        drain_readers(process).await;
        process.set_state(ProcessState::Exited);
        self.registry.retire(process);

        info!(app_id, "Stopped by user");
        self.events.emit_info(app_id, "■ Process stopped by user");
        self.events
            .emit_terminated(app_id, status.flatten(), TerminationReason::Stopped);
    }

    /// Terminate an unsupervised process matching `hint`, if any is live.
    async fn stop_external(&self, app_id: &str, hint: &str) -> Result<Option<StopOutcome>> {
        let table = self.table.clone();
        let wanted = hint.to_string();
        let found = tokio::task::spawn_blocking(move || -> Result<_> {
            let entries = table.snapshot()?;
            Ok(find_by_image(&entries, &wanted).cloned())
        })
        .await
        .map_err(|e| AppCtrlError::Other(format!("process scan failed: {e}")))??;

        let Some(entry) = found else {
            return Ok(None);
        };

        let table = self.table.clone();
        let pid = entry.pid;
        tokio::task::spawn_blocking(move || table.terminate(pid))
            .await
            .map_err(|e| AppCtrlError::Other(format!("terminate task failed: {e}")))??;

        info!(app_id, pid, "Stopped external process {}", entry.image_name);
        self.events.emit_info(
            app_id,
            format!("■ External process {} stopped", entry.image_name),
        );
        self.events
            .emit_terminated(app_id, None, TerminationReason::External);
        Ok(Some(StopOutcome::StoppedExternal { pid }))
    }

    /// Whether `app_id` has an active supervised lifetime.
    pub fn is_app_running(&self, app_id: &str) -> bool {
        self.registry
            .get(app_id)
            .is_some_and(|p| p.state().is_active())
    }

    /// Stop every supervised app. Used at session teardown.
    pub async fn stop_all(&self) {
        for process in self.registry.list() {
            if let Err(e) = self.stop(process.app_id(), None).await {
                warn!("Failed to stop {} during shutdown: {}", process.app_id(), e);
            }
        }
    }
}

/// Own the child: forward stop requests to the OS and publish the exit.
async fn supervise_child(
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<ChildControl>,
    exit_tx: watch::Sender<ExitStatus>,
    process: Arc<ManagedProcess>,
    registry: Arc<ProcessRegistry>,
    events: Arc<EventChannel>,
) {
    let app_id = process.app_id().to_string();
    let pid = process.pid().unwrap_or_default();

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(request) = control.recv() => {
                let force = request == ChildControl::Kill;
                let signalled = tokio::task::spawn_blocking(move || {
                    platform::signal_process_tree(pid, force)
                })
                .await;
                match signalled {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("{}: tree signal failed: {}", app_id, e),
                    Err(e) => debug!("{}: tree signal task failed: {}", app_id, e),
                }
                if force {
                    // Direct kill of the owned handle in case the tree kill missed it.
                    if let Err(e) = child.start_kill() {
                        debug!("{}: start_kill failed: {}", app_id, e);
                    }
                }
            }
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("{}: failed to wait for process: {}", app_id, e);
            None
        }
    };
    exit_tx.send_replace(Some(exit_code));

    let _op = process.lock_op().await;
    if process.state() != ProcessState::Running {
        // The stop path finished this lifetime and already notified.
        return;
    }

    drain_readers(&process).await;
    process.set_state(ProcessState::Exited);
    registry.retire(&process);

    info!(app_id = %app_id, ?exit_code, "Process exited");
    let line = match exit_code {
        Some(0) => "✓ Process exited successfully".to_string(),
        Some(code) => format!("⚠ Process exited with code: {code}"),
        None => "⚠ Process exited with code: -1".to_string(),
    };
    events.emit_info(&app_id, line);
    events.emit_terminated(&app_id, exit_code, TerminationReason::Exited);
}

/// Wait for the readers to deliver what they have read, then cancel them.
async fn drain_readers(process: &ManagedProcess) {
    let deadline = tokio::time::Instant::now() + SupervisorConfig::READER_DRAIN_TIMEOUT;
    for mut reader in process.take_readers() {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            // A grandchild still holds the pipe open.
            process.cancel_token().cancel();
            if tokio::time::timeout(Duration::from_millis(100), &mut reader)
                .await
                .is_err()
            {
                reader.abort();
                let _ = reader.await;
            }
        }
    }
    process.cancel_token().cancel();
}

/// Emit one event per line of `stream`, flushing a trailing partial line.
async fn read_lines<R>(
    stream: R,
    app_id: String,
    kind: OutputStream,
    events: Arc<EventChannel>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut seq = 0u64;

    let mut emit = |buf: &mut Vec<u8>| {
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let line = String::from_utf8_lossy(buf).into_owned();
        events.emit_output(&app_id, line, kind, seq);
        seq += 1;
    };

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => None,
            read = reader.read_until(b'\n', &mut buf) => Some(read),
        };
        let Some(read) = read else {
            // read_until keeps what it consumed before being dropped.
            if !buf.is_empty() {
                emit(&mut buf);
            }
            break;
        };
        match read {
            Ok(0) => break,
            Ok(_) => emit(&mut buf),
            Err(e) => {
                debug!("{}: {:?} read error: {}", app_id, kind, e);
                break;
            }
        }
    }
    debug!("{}: {:?} reader finished after {} lines", app_id, kind, seq);
}
