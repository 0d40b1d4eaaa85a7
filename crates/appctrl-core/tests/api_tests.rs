//! Integration tests for the AppCtrlApi public interface.
//!
//! These drive the facade end to end: real child processes for supervision
//! and a scripted process table for liveness and inventory behavior.

use appctrl_core::{
    AppCtrlApi, AppCtrlError, AppEvent, AppKind, AppRecord, EventSubscription, KillStatus,
    LaunchSpec, OutputStream, ProcessEntry, ProcessTable, Result, SocketEntry, SocketTable,
    StopOutcome, SupervisorOptions, TerminationReason, WatchTarget,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Process table whose rows the test controls.
#[derive(Default)]
struct ScriptedTable {
    rows: Mutex<Vec<ProcessEntry>>,
    killed: Mutex<Vec<u32>>,
}

impl ScriptedTable {
    fn add(&self, pid: u32, exe: &str) {
        let image_name = exe.rsplit('/').next().unwrap_or(exe).to_string();
        self.rows.lock().unwrap().push(ProcessEntry {
            pid,
            image_name,
            exe_path: Some(PathBuf::from(exe)),
            memory_bytes: 1024,
        });
    }

    fn remove(&self, pid: u32) {
        self.rows.lock().unwrap().retain(|r| r.pid != pid);
    }
}

impl ProcessTable for ScriptedTable {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>> {
        Ok(self.rows.lock().unwrap().clone())
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.pid != pid);
        if rows.len() == before {
            return Err(AppCtrlError::not_found(format!("pid {pid}")));
        }
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedSockets {
    rows: Mutex<Vec<SocketEntry>>,
}

impl SocketTable for ScriptedSockets {
    fn sockets(&self) -> Result<Vec<SocketEntry>> {
        Ok(self.rows.lock().unwrap().clone())
    }
}

fn create_api() -> (Arc<ScriptedTable>, Arc<ScriptedSockets>, AppCtrlApi) {
    let table = Arc::new(ScriptedTable::default());
    let sockets = Arc::new(ScriptedSockets::default());
    let api = AppCtrlApi::builder()
        .with_process_table(table.clone())
        .with_socket_table(sockets.clone())
        .with_options(SupervisorOptions {
            stop_grace_period: Duration::from_millis(300),
            ..SupervisorOptions::default()
        })
        .build();
    (table, sockets, api)
}

async fn next_event(sub: &mut EventSubscription) -> AppEvent {
    tokio::time::timeout(Duration::from_secs(10), sub.recv())
        .await
        .expect("event should arrive")
        .expect("channel open")
}

/// Collect events until the termination notice for `app_id`.
async fn until_terminated(sub: &mut EventSubscription) -> Vec<AppEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(sub).await;
        let done = matches!(event, AppEvent::Terminated(_));
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn stdout_lines(events: &[AppEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Output(o) if o.stream == OutputStream::Stdout => Some(o.line.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_streams_output_then_terminates_once() {
    let (_table, _sockets, api) = create_api();
    let mut sub = api.subscribe();

    let spec = LaunchSpec::new(AppKind::Shell, "for i in 1 2 3 4; do echo line$i; done");
    let pid = api.start_app("a1", spec).await.unwrap();
    assert!(pid > 0);

    let events = until_terminated(&mut sub).await;
    assert_eq!(stdout_lines(&events), vec!["line1", "line2", "line3", "line4"]);
    match events.last() {
        Some(AppEvent::Terminated(t)) => {
            assert_eq!(t.app_id, "a1");
            assert_eq!(t.exit_code, Some(0));
            assert_eq!(t.reason, TerminationReason::Exited);
        }
        other => panic!("expected termination, got {other:?}"),
    }

    assert!(!api.is_app_running("a1"));
    assert!(api.running_apps().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sub.try_recv().is_none(), "exactly one termination notice");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_running_app_and_stop_again() {
    let (_table, _sockets, api) = create_api();
    let mut sub = api.subscribe();

    api.start_app("sleeper", LaunchSpec::new(AppKind::Shell, "sleep 30"))
        .await
        .unwrap();
    assert!(api.is_app_running("sleeper"));
    assert!(matches!(
        api.start_app("sleeper", LaunchSpec::new(AppKind::Shell, "sleep 30")).await,
        Err(AppCtrlError::Conflict { .. })
    ));

    assert_eq!(api.stop_app("sleeper", None).await.unwrap(), StopOutcome::Stopped);
    let events = until_terminated(&mut sub).await;
    assert!(matches!(
        events.last(),
        Some(AppEvent::Terminated(t)) if t.reason == TerminationReason::Stopped
    ));

    // Second stop is not an error.
    assert_eq!(
        api.stop_app("sleeper", None).await.unwrap(),
        StopOutcome::AlreadyExited
    );
    assert!(api.stop_app("never-started", None).await.unwrap_err().is_not_found());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exe_with_quoted_arguments_streams_in_order() {
    let (_table, _sockets, api) = create_api();
    let mut sub = api.subscribe();

    let spec = LaunchSpec::new(AppKind::Exe, "/bin/sh").with_arguments(r#"-c "echo 1; echo 2""#);
    api.start_app("sh", spec).await.unwrap();

    let events = until_terminated(&mut sub).await;
    assert_eq!(stdout_lines(&events), vec!["1", "2"]);
    match events.last() {
        Some(AppEvent::Terminated(t)) => {
            assert_eq!(t.exit_code, Some(0));
            assert_eq!(t.reason, TerminationReason::Exited);
        }
        other => panic!("expected termination, got {other:?}"),
    }
    assert!(api.registry().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sub.try_recv().is_none(), "exactly one termination notice");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_external_kill_reports_single_exit() {
    let (_table, _sockets, api) = create_api();
    let mut sub = api.subscribe();

    let pid = api
        .start_app("victim", LaunchSpec::new(AppKind::Exe, "/bin/sleep").with_arguments("30"))
        .await
        .unwrap();
    assert!(api.is_app_running("victim"));

    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let events = until_terminated(&mut sub).await;
    match events.last() {
        Some(AppEvent::Terminated(t)) => {
            assert_eq!(t.app_id, "victim");
            assert_eq!(t.exit_code, None);
            assert_eq!(t.reason, TerminationReason::Exited);
        }
        other => panic!("expected termination, got {other:?}"),
    }

    assert!(!api.is_app_running("victim"));
    assert!(api.registry().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sub.try_recv().is_none(), "exactly one termination notice");
    assert_eq!(
        api.stop_app("victim", None).await.unwrap(),
        StopOutcome::AlreadyExited
    );
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawn_failure_leaves_app_stopped() {
    let (_table, _sockets, api) = create_api();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.exe");

    let err = api
        .start_app("bad", LaunchSpec::new(AppKind::Exe, missing.to_string_lossy()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppCtrlError::Spawn { .. }));
    assert!(!api.is_app_running("bad"));
    assert!(api.registry().is_empty());
}

#[tokio::test]
async fn test_stop_unsupervised_app_by_exe_hint() {
    let (table, _sockets, api) = create_api();
    let mut sub = api.subscribe();
    table.add(4242, "/opt/tools/server.exe");

    let outcome = api
        .stop_app("ext", Some("/somewhere/else/server.exe"))
        .await
        .unwrap();
    assert_eq!(outcome, StopOutcome::StoppedExternal { pid: 4242 });
    assert_eq!(*table.killed.lock().unwrap(), vec![4242]);

    let events = until_terminated(&mut sub).await;
    assert!(matches!(
        events.last(),
        Some(AppEvent::Terminated(t)) if t.reason == TerminationReason::External
    ));
}

#[tokio::test]
async fn test_liveness_detects_external_start_and_exit() {
    let (table, _sockets, api) = create_api();
    let mut sub = api.subscribe();

    api.watch_apps([WatchTarget {
        app_id: "tool".into(),
        kind: AppKind::Exe,
        exe_path: "/opt/tools/tool.exe".into(),
        is_running: false,
    }]);
    api.start_liveness_monitor(Duration::from_millis(25)).await;

    table.add(77, "/opt/tools/tool.exe");
    match next_event(&mut sub).await {
        AppEvent::StateChanged(s) => assert!(s.is_running),
        other => panic!("unexpected {other:?}"),
    }

    table.remove(77);
    match next_event(&mut sub).await {
        AppEvent::StateChanged(s) => assert!(!s.is_running),
        other => panic!("unexpected {other:?}"),
    }

    api.shutdown().await;
}

#[tokio::test]
async fn test_reconcile_records_corrects_stale_hints() {
    let (table, _sockets, api) = create_api();
    table.add(10, "/opt/apps/editor.exe");

    let record = |id: &str, kind: AppKind, path: &str, running: bool| AppRecord {
        id: id.into(),
        name: id.into(),
        icon: None,
        app_type: kind,
        executable_path: path.into(),
        working_directory: String::new(),
        arguments: String::new(),
        environment_vars: String::new(),
        is_running: running,
    };
    let mut records = vec![
        record("editor", AppKind::Exe, "/opt/apps/editor.exe", false),
        record("gone", AppKind::Exe, "/opt/apps/gone.exe", true),
        record("script", AppKind::Shell, "npm start", true),
        record("steady", AppKind::Exe, "/opt/apps/steady.exe", false),
    ];

    let changed = api.reconcile_records(&mut records).await.unwrap();
    assert_eq!(changed, vec!["editor", "gone", "script"]);
    assert!(records[0].is_running);
    assert!(!records[1].is_running);
    assert!(!records[2].is_running);
}

#[tokio::test]
async fn test_task_and_port_inventory_through_facade() {
    let (table, sockets, api) = create_api();
    table.add(1, "/usr/bin/worker.exe");
    table.add(2, "/usr/bin/worker.exe");
    table.add(3, "/usr/bin/web.exe");
    sockets.rows.lock().unwrap().push(SocketEntry {
        port: 8080,
        protocol: appctrl_core::Protocol::Tcp,
        pid: 3,
    });

    let groups = api.list_task_groups().await.unwrap();
    let worker = groups.iter().find(|g| g.image_name == "worker.exe").unwrap();
    assert_eq!(worker.pids, vec![1, 2]);
    assert_eq!(worker.memory_bytes, 2048);

    let ports = api.list_ports().await.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].image_name, "web.exe");
    assert_eq!(api.kill_port(8080).await.unwrap(), vec![3]);
    assert!(api.kill_port(8080).await.unwrap_err().is_not_found());

    let outcomes = api.kill_task_group("worker.exe").await.unwrap();
    assert!(outcomes.iter().all(|o| o.result == KillStatus::Killed));
    assert!(api.kill_task_group("worker.exe").await.unwrap().is_empty());
    assert!(api.kill_task(99).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_icon_errors_are_distinct() {
    let (_table, _sockets, api) = create_api();
    let dir = TempDir::new().unwrap();

    let missing = api.extract_icon(dir.path().join("missing.exe")).await;
    assert!(matches!(missing, Err(AppCtrlError::Io { .. })));

    let no_icon = dir.path().join("no_icon.exe");
    std::fs::write(&no_icon, b"not an executable image").unwrap();
    let err = api.extract_icon(&no_icon).await.unwrap_err();
    assert!(matches!(err, AppCtrlError::NoIcon(_)));
}
