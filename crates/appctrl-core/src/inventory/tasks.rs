//! Task inventory: every OS process, with memory, for bulk termination.

use super::table::{ProcessEntry, ProcessTable};
use crate::error::{AppCtrlError, Result};
use crate::platform;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// OS-core processes hidden from the bulk-kill view.
pub const SYSTEM_PROCESS_NAMES: &[&str] = &[
    "System Idle Process",
    "System",
    "Registry",
    "smss.exe",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "svchost.exe",
    "fontdrvhost.exe",
    "dwm.exe",
    "winlogon.exe",
    "spoolsv.exe",
    "Memory Compression",
    "taskhostw.exe",
    "RuntimeBroker.exe",
    "SearchUI.exe",
    "ShellExperienceHost.exe",
    "ApplicationFrameHost.exe",
    "ctfmon.exe",
    "conhost.exe",
    "dllhost.exe",
    "sihost.exe",
    "SearchApp.exe",
    "StartMenuExperienceHost.exe",
    "TextInputHost.exe",
    "SecurityHealthService.exe",
    "NisSrv.exe",
    "MsMpEng.exe",
    "audiodg.exe",
];

/// Whether `name` is an OS-core process.
pub fn is_system_process(name: &str) -> bool {
    SYSTEM_PROCESS_NAMES
        .iter()
        .any(|s| platform::same_image_name(s, name))
}

/// One row of the task inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub pid: u32,
    pub image_name: String,
    pub memory_bytes: u64,
}

impl From<ProcessEntry> for TaskInfo {
    fn from(entry: ProcessEntry) -> Self {
        Self {
            pid: entry.pid,
            image_name: entry.image_name,
            memory_bytes: entry.memory_bytes,
        }
    }
}

/// Processes sharing an image name, with summed memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub image_name: String,
    pub pids: Vec<u32>,
    pub memory_bytes: u64,
}

impl TaskGroup {
    pub fn count(&self) -> usize {
        self.pids.len()
    }
}

/// Result of terminating one pid in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "camelCase")]
pub enum KillStatus {
    Killed,
    AccessDenied,
    NotFound,
    Failed(String),
}

impl From<&AppCtrlError> for KillStatus {
    fn from(err: &AppCtrlError) -> Self {
        match err {
            AppCtrlError::AccessDenied { .. } => KillStatus::AccessDenied,
            AppCtrlError::NotFound { .. } => KillStatus::NotFound,
            other => KillStatus::Failed(other.to_string()),
        }
    }
}

/// Per-pid outcome of a batch kill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillOutcome {
    pub pid: u32,
    pub result: KillStatus,
}

impl KillOutcome {
    pub fn is_killed(&self) -> bool {
        self.result == KillStatus::Killed
    }
}

/// Group rows by image name (case-insensitive), summing memory.
///
/// Groups are sorted by name, case-insensitively; pids within a group ascend.
/// The first-seen spelling of a name is kept for display.
pub fn group_tasks(rows: &[TaskInfo]) -> Vec<TaskGroup> {
    let mut groups: BTreeMap<String, TaskGroup> = BTreeMap::new();
    for row in rows {
        let group = groups
            .entry(row.image_name.to_lowercase())
            .or_insert_with(|| TaskGroup {
                image_name: row.image_name.clone(),
                pids: Vec::new(),
                memory_bytes: 0,
            });
        group.pids.push(row.pid);
        group.memory_bytes = group.memory_bytes.saturating_add(row.memory_bytes);
    }

    groups
        .into_values()
        .map(|mut g| {
            g.pids.sort_unstable();
            g
        })
        .collect()
}

/// On-demand view over the OS process table.
#[derive(Clone)]
pub struct TaskInventory {
    table: Arc<dyn ProcessTable>,
}

impl std::fmt::Debug for TaskInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInventory").finish_non_exhaustive()
    }
}

impl TaskInventory {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self { table }
    }

    /// Every process, ungrouped, sorted by image name then pid.
    pub fn list(&self) -> Result<Vec<TaskInfo>> {
        let mut rows: Vec<TaskInfo> = self
            .table
            .snapshot()?
            .into_iter()
            .map(TaskInfo::from)
            .collect();
        rows.sort_by(|a, b| {
            a.image_name
                .to_lowercase()
                .cmp(&b.image_name.to_lowercase())
                .then(a.pid.cmp(&b.pid))
        });
        Ok(rows)
    }

    /// [`Self::list`] without OS-core processes.
    pub fn list_user_tasks(&self) -> Result<Vec<TaskInfo>> {
        let mut rows = self.list()?;
        rows.retain(|r| !is_system_process(&r.image_name));
        Ok(rows)
    }

    /// Terminate one pid.
    pub fn kill(&self, pid: u32) -> Result<()> {
        self.table.terminate(pid)?;
        info!(pid, "Terminated task");
        Ok(())
    }

    /// Terminate every live process named `image_name`.
    ///
    /// Failures are reported per pid; an image with no live processes yields
    /// an empty list.
    pub fn kill_group(&self, image_name: &str) -> Result<Vec<KillOutcome>> {
        let image_name = image_name.trim();
        if image_name.is_empty() {
            return Err(AppCtrlError::InvalidParams {
                message: "image name must not be empty".into(),
            });
        }

        let mut pids: Vec<u32> = self
            .table
            .snapshot()?
            .into_iter()
            .filter(|e| platform::same_image_name(&e.image_name, image_name))
            .map(|e| e.pid)
            .collect();
        pids.sort_unstable();
        debug!("kill_group {}: {} candidates", image_name, pids.len());

        let outcomes: Vec<KillOutcome> = pids
            .into_iter()
            .map(|pid| {
                let result = match self.table.terminate(pid) {
                    Ok(()) => KillStatus::Killed,
                    Err(e) => {
                        warn!("Failed to terminate {} ({}): {}", image_name, pid, e);
                        KillStatus::from(&e)
                    }
                };
                KillOutcome { pid, result }
            })
            .collect();

        info!(
            "kill_group {}: {}/{} terminated",
            image_name,
            outcomes.iter().filter(|o| o.is_killed()).count(),
            outcomes.len()
        );
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::table::fake::FakeProcessTable;

    fn inventory() -> (Arc<FakeProcessTable>, TaskInventory) {
        let table = Arc::new(FakeProcessTable::new());
        (table.clone(), TaskInventory::new(table))
    }

    #[test]
    fn test_list_is_sorted_and_ungrouped() {
        let (table, tasks) = inventory();
        table.add(30, r"C:\Windows\notepad.exe", 300);
        table.add(10, r"C:\Tools\Zed.exe", 100);
        table.add(20, r"C:\Windows\Notepad.exe", 200);

        let rows = tasks.list().unwrap();
        let pids: Vec<u32> = rows.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![20, 30, 10]);
    }

    #[test]
    fn test_group_tasks_sums_memory_case_insensitively() {
        let rows = vec![
            TaskInfo {
                pid: 3,
                image_name: "notepad.exe".into(),
                memory_bytes: 10,
            },
            TaskInfo {
                pid: 1,
                image_name: "Notepad.exe".into(),
                memory_bytes: 5,
            },
            TaskInfo {
                pid: 2,
                image_name: "code.exe".into(),
                memory_bytes: 7,
            },
        ];
        let groups = group_tasks(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].image_name, "code.exe");
        assert_eq!(groups[1].image_name, "notepad.exe");
        assert_eq!(groups[1].pids, vec![1, 3]);
        assert_eq!(groups[1].memory_bytes, 15);
        assert_eq!(groups[1].count(), 2);
    }

    #[test]
    fn test_user_tasks_hide_system_processes() {
        let (table, tasks) = inventory();
        table.add(4, "System", 0);
        table.add(500, r"C:\Windows\System32\svchost.exe", 0);
        table.add(900, r"C:\Apps\game.exe", 0);

        let rows = tasks.list_user_tasks().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_name, "game.exe");
        assert!(is_system_process("SVCHOST.EXE"));
    }

    #[test]
    fn test_kill_group_reports_per_pid() {
        let (table, tasks) = inventory();
        for pid in [11, 12, 13, 14] {
            table.add(pid, r"C:\Windows\notepad.exe", 1);
        }
        table.add(99, r"C:\Apps\other.exe", 1);
        table.protect(14);

        let outcomes = tasks.kill_group("NOTEPAD.EXE").unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes.iter().filter(|o| o.is_killed()).count(), 3);
        assert_eq!(
            outcomes.iter().find(|o| o.pid == 14).map(|o| &o.result),
            Some(&KillStatus::AccessDenied)
        );
        assert_eq!(table.terminated(), vec![11, 12, 13]);
    }

    #[test]
    fn test_kill_group_without_matches_is_empty() {
        let (_table, tasks) = inventory();
        assert!(tasks.kill_group("ghost.exe").unwrap().is_empty());
        assert!(tasks.kill_group("  ").is_err());
    }

    #[test]
    fn test_kill_single_pid() {
        let (table, tasks) = inventory();
        table.add(7, "a.exe", 0);
        table.protect(8);
        table.add(8, "b.exe", 0);

        tasks.kill(7).unwrap();
        assert!(tasks.kill(7).unwrap_err().is_not_found());
        assert!(matches!(tasks.kill(8), Err(AppCtrlError::AccessDenied { pid: 8 })));
    }

    #[test]
    fn test_kill_status_serialization() {
        let outcome = KillOutcome {
            pid: 5,
            result: KillStatus::Failed("boom".into()),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["result"]["status"], "failed");
        assert_eq!(value["result"]["message"], "boom");

        let killed = serde_json::to_value(KillStatus::Killed).unwrap();
        assert_eq!(killed["status"], "killed");
    }
}
