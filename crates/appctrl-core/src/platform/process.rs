//! Platform-specific process management.
//!
//! Liveness checks and termination by pid, with OS errors translated into
//! [`AppCtrlError::NotFound`] and [`AppCtrlError::AccessDenied`] so callers can
//! report per-target outcomes.

use crate::error::{AppCtrlError, Result};
use std::time::Duration;
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)`; `EPERM` still means the pid exists
/// - **Windows**: `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        is_process_alive_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Process alive check not implemented for this platform");
        let _ = pid;
        true
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn is_process_alive_windows(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    // SAFETY: OpenProcess has no memory preconditions; a non-null handle is
    // owned here and closed exactly once.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            false
        } else {
            CloseHandle(handle);
            true
        }
    }
}

/// Terminate a process that this tool does not own.
///
/// Used by task and port kills and by the external-stop fallback.
///
/// # Platform Behavior
/// - **Linux/macOS**: `SIGTERM`, poll for up to `grace`, then `SIGKILL`
/// - **Windows**: `TerminateProcess` (no graceful phase exists for foreign processes)
///
/// # Errors
/// - [`AppCtrlError::NotFound`] if the pid does not exist
/// - [`AppCtrlError::AccessDenied`] if the caller lacks the privilege to kill it
pub fn terminate_pid(pid: u32, grace: Duration) -> Result<()> {
    #[cfg(unix)]
    {
        terminate_pid_unix(pid, grace)
    }

    #[cfg(windows)]
    {
        let _ = grace;
        terminate_pid_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (pid, grace);
        Err(AppCtrlError::Other(
            "Process termination not implemented for this platform".into(),
        ))
    }
}

#[cfg(unix)]
fn terminate_pid_unix(pid: u32, grace: Duration) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::{waitpid, WaitPidFlag};
    use nix::unistd::Pid;
    use std::thread::sleep;

    let raw = i32::try_from(pid).map_err(|_| AppCtrlError::not_found(format!("pid {pid}")))?;
    let nix_pid = Pid::from_raw(raw);

    debug!("Sending SIGTERM to process {}", pid);
    match kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Err(AppCtrlError::not_found(format!("pid {pid}"))),
        Err(Errno::EPERM) => return Err(AppCtrlError::AccessDenied { pid }),
        Err(e) => {
            return Err(AppCtrlError::Other(format!(
                "Failed to signal process {pid}: {e}"
            )))
        }
    }

    let wait_interval = crate::config::SupervisorConfig::STOP_POLL_INTERVAL;
    let iterations = (grace.as_millis() / wait_interval.as_millis()).max(1);
    for _ in 0..iterations {
        sleep(wait_interval);
        // Reap if it happens to be our child; ECHILD otherwise.
        let _ = waitpid(nix_pid, Some(WaitPidFlag::WNOHANG));
        if !is_process_alive(pid) {
            debug!("Process {} terminated gracefully", pid);
            return Ok(());
        }
    }

    debug!("Process {} still running, sending SIGKILL", pid);
    match kill(nix_pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(Errno::EPERM) => return Err(AppCtrlError::AccessDenied { pid }),
        Err(e) => {
            return Err(AppCtrlError::Other(format!(
                "Failed to kill process {pid}: {e}"
            )))
        }
    }
    sleep(wait_interval);
    let _ = waitpid(nix_pid, Some(WaitPidFlag::WNOHANG));
    Ok(())
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn terminate_pid_windows(pid: u32) -> Result<()> {
    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER,
    };
    use windows_sys::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    debug!("Terminating process {} with TerminateProcess", pid);

    // SAFETY: OpenProcess/GetLastError have no memory preconditions. The
    // returned handle is checked for null, used once and closed exactly once.
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            return match GetLastError() {
                ERROR_ACCESS_DENIED => Err(AppCtrlError::AccessDenied { pid }),
                ERROR_INVALID_PARAMETER => Err(AppCtrlError::not_found(format!("pid {pid}"))),
                code => Err(AppCtrlError::Other(format!(
                    "OpenProcess({pid}) failed with error {code}"
                ))),
            };
        }

        let ok = TerminateProcess(handle, 1);
        let code = if ok == 0 { GetLastError() } else { 0 };
        CloseHandle(handle);

        match (ok, code) {
            (0, ERROR_ACCESS_DENIED) => Err(AppCtrlError::AccessDenied { pid }),
            (0, code) => Err(AppCtrlError::Other(format!(
                "TerminateProcess({pid}) failed with error {code}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Signal a supervised child together with everything it spawned.
///
/// Supervised children are started as process-group leaders on Unix, so the
/// whole group receives the signal. Batch and shell launches go through an
/// interpreter, which is why the tree matters.
///
/// # Platform Behavior
/// - **Linux/macOS**: `killpg(pid, SIGTERM | SIGKILL)`
/// - **Windows**: `taskkill /PID {pid} /T`, plus `/F` when `force`
pub fn signal_process_tree(pid: u32, force: bool) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| AppCtrlError::not_found(format!("pid {pid}")))?;
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        debug!("Sending {:?} to process group {}", signal, pid);
        match killpg(Pid::from_raw(raw), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(AppCtrlError::not_found(format!("pid {pid}"))),
            Err(Errno::EPERM) => Err(AppCtrlError::AccessDenied { pid }),
            Err(e) => Err(AppCtrlError::Other(format!(
                "Failed to signal process group {pid}: {e}"
            ))),
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        use std::process::Command;

        const CREATE_NO_WINDOW: u32 = 0x0800_0000;

        let pid_arg = pid.to_string();
        let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
        if force {
            args.push("/F");
        }
        debug!("Terminating process tree {} with taskkill {:?}", pid, args);

        let output = Command::new("taskkill")
            .args(&args)
            .creation_flags(CREATE_NO_WINDOW)
            .output()
            .map_err(|e| AppCtrlError::Other(format!("Failed to run taskkill: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") {
            Err(AppCtrlError::not_found(format!("pid {pid}")))
        } else if stderr.contains("Access is denied") {
            Err(AppCtrlError::AccessDenied { pid })
        } else {
            tracing::warn!("taskkill failed for {}: {}", pid, stderr.trim());
            Err(AppCtrlError::Other(format!(
                "taskkill failed for {pid}: {}",
                stderr.trim()
            )))
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (pid, force);
        Err(AppCtrlError::Other(
            "Process termination not implemented for this platform".into(),
        ))
    }
}
