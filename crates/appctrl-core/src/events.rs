//! Ordered delivery of process output and lifecycle notices.
//!
//! Every subscriber gets its own unbounded queue. Emission appends to all
//! queues under one lock, so all subscribers observe the same global order
//! and nothing is dropped for a slow consumer.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Which stream an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// Lifecycle info lines produced by the supervisor itself.
    System,
}

/// One line of output from a managed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    pub app_id: String,
    pub line: String,
    pub stream: OutputStream,
    /// Position of this line within its stream, starting at 0.
    pub seq: u64,
}

/// Why a managed app stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationReason {
    /// The process exited on its own.
    Exited,
    /// A stop request from the caller ended it.
    Stopped,
    /// A process started outside this tool was terminated by image path.
    External,
}

/// Termination notice, delivered at most once per process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationEvent {
    pub app_id: String,
    pub exit_code: Option<i32>,
    pub reason: TerminationReason,
}

/// Running flag flipped by liveness reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangedEvent {
    pub app_id: String,
    pub is_running: bool,
}

/// Notification delivered to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Output(OutputEvent),
    Terminated(TerminationEvent),
    StateChanged(StateChangedEvent),
}

impl AppEvent {
    pub fn app_id(&self) -> &str {
        match self {
            AppEvent::Output(e) => &e.app_id,
            AppEvent::Terminated(e) => &e.app_id,
            AppEvent::StateChanged(e) => &e.app_id,
        }
    }

    /// Event name used by the desktop shell.
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::Output(_) => "app-output",
            AppEvent::Terminated(_) => "app-stopped",
            AppEvent::StateChanged(_) => "app-state-changed",
        }
    }

    /// JSON payload for the desktop shell.
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            AppEvent::Output(e) => serde_json::to_value(e),
            AppEvent::Terminated(e) => serde_json::to_value(e),
            AppEvent::StateChanged(e) => serde_json::to_value(e),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Receiving half of a subscription.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl EventSubscription {
    /// Wait for the next event. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<AppEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out channel shared by the supervisor and the liveness monitor.
#[derive(Debug, Default)]
pub struct EventChannel {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AppEvent>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. It receives every event emitted from now on.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        EventSubscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to every live subscriber, pruning closed ones.
    pub fn emit(&self, event: AppEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            "emit {} for {} to {} subscribers",
            event.name(),
            event.app_id(),
            subscribers.len()
        );
    }

    pub fn emit_output(&self, app_id: &str, line: impl Into<String>, stream: OutputStream, seq: u64) {
        self.emit(AppEvent::Output(OutputEvent {
            app_id: app_id.to_string(),
            line: line.into(),
            stream,
            seq,
        }));
    }

    /// Emit a supervisor info line. System lines carry sequence 0.
    pub fn emit_info(&self, app_id: &str, line: impl Into<String>) {
        self.emit_output(app_id, line, OutputStream::System, 0);
    }

    pub fn emit_terminated(&self, app_id: &str, exit_code: Option<i32>, reason: TerminationReason) {
        self.emit(AppEvent::Terminated(TerminationEvent {
            app_id: app_id.to_string(),
            exit_code,
            reason,
        }));
    }

    pub fn emit_state_changed(&self, app_id: &str, is_running: bool) {
        self.emit(AppEvent::StateChanged(StateChangedEvent {
            app_id: app_id.to_string(),
            is_running,
        }));
    }
}
