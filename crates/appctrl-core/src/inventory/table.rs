//! Process-table query capability.
//!
//! Everything that asks "what is running" goes through [`ProcessTable`] so the
//! liveness monitor, the external-stop fallback and the inventories can be
//! driven by a fake table in tests.

use crate::error::Result;
use crate::platform;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub pid: u32,
    /// Executable file name, e.g. `notepad.exe`.
    pub image_name: String,
    /// Full image path, when the OS lets us read it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe_path: Option<PathBuf>,
    /// Resident/working-set memory; zero when unreadable.
    pub memory_bytes: u64,
}

/// Read and act on the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Fresh snapshot of every process. Never cached.
    fn snapshot(&self) -> Result<Vec<ProcessEntry>>;

    /// Terminate one pid.
    ///
    /// # Errors
    ///
    /// `NotFound` or `AccessDenied` for that pid only.
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Find the first live process matching a configured executable path.
///
/// A full-path match anywhere in the table beats a file-name match.
pub fn find_by_image<'a>(entries: &'a [ProcessEntry], wanted: &str) -> Option<&'a ProcessEntry> {
    entries
        .iter()
        .filter_map(|e| {
            platform::match_image(e.exe_path.as_deref(), &e.image_name, wanted).map(|m| (m, e))
        })
        .min_by_key(|(m, e)| (*m, e.pid))
        .map(|(_, e)| e)
}

/// Whether any live process matches `wanted`.
pub fn any_matches(entries: &[ProcessEntry], wanted: &str) -> bool {
    entries
        .iter()
        .any(|e| platform::match_image(e.exe_path.as_deref(), &e.image_name, wanted).is_some())
}

/// [`ProcessTable`] backed by `sysinfo` and the platform termination code.
#[derive(Debug, Clone)]
pub struct SystemProcessTable {
    /// Grace period for external terminations on platforms that have one.
    terminate_grace: Duration,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            terminate_grace: crate::config::SupervisorConfig::STOP_GRACE_PERIOD,
        }
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new()
                .with_memory()
                .with_exe(UpdateKind::OnlyIfNotSet),
        );

        let entries: Vec<ProcessEntry> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let exe_path = process.exe().map(|p| p.to_path_buf());
                // Prefer the exe file name: `name()` is truncated on some platforms.
                let image_name = exe_path
                    .as_deref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| process.name().to_string_lossy().into_owned());
                ProcessEntry {
                    pid: pid.as_u32(),
                    image_name,
                    exe_path,
                    memory_bytes: process.memory(),
                }
            })
            .collect();

        debug!("Process table snapshot: {} rows", entries.len());
        Ok(entries)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        platform::terminate_pid(pid, self.terminate_grace)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeProcessTable;
    use super::*;

    #[test]
    fn test_find_by_image_prefers_full_path() {
        let table = FakeProcessTable::new();
        table.add(10, r"D:\Elsewhere\foo.exe", 0);
        table.add(20, r"C:\Apps\Foo.exe", 0);
        let entries = table.snapshot().unwrap();

        let found = find_by_image(&entries, r"C:\Apps\Foo.exe").unwrap();
        assert_eq!(found.pid, 20);

        let found = find_by_image(&entries, r"E:\Moved\FOO.EXE").unwrap();
        assert_eq!(found.pid, 10);
        assert!(find_by_image(&entries, "bar.exe").is_none());
        assert!(any_matches(&entries, "foo.exe"));
    }

    #[test]
    fn test_system_snapshot_contains_self() {
        let table = SystemProcessTable::new();
        let entries = table.snapshot().unwrap();
        let me = std::process::id();
        assert!(entries.iter().any(|e| e.pid == me));
    }
}
