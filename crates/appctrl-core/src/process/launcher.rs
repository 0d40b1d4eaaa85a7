//! Launch command construction.
//!
//! The app kind is dispatched exactly once, here. Everything after spawn
//! (readers, waiter, stop) is kind-agnostic.

use crate::config::SupervisorOptions;
use crate::error::{AppCtrlError, Result};
use crate::models::{split_arguments, AppKind, LaunchSpec};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Keeps console children from flashing a window.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Prefix that switches the console code page to UTF-8 before running.
#[cfg(windows)]
const UTF8_CODE_PAGE_PREFIX: &str = "chcp 65001 >nul && ";

/// A ready-to-spawn command plus what the supervisor reports about it.
///
/// The command is a std builder; the supervisor converts it into a tokio
/// command at spawn time.
#[derive(Debug)]
pub struct LaunchPlan {
    pub command: Command,
    /// Directory the child will run in, if any was chosen.
    pub working_dir: Option<PathBuf>,
    /// True when the working directory came from the record, not the fallback.
    pub working_dir_explicit: bool,
}

/// Build the OS invocation for `spec`.
///
/// # Errors
///
/// [`AppCtrlError::Spawn`] when the command is empty or an explicit
/// executable/script path does not exist.
pub fn build_command(
    app_id: &str,
    spec: &LaunchSpec,
    options: &SupervisorOptions,
) -> Result<LaunchPlan> {
    let path = spec.command_path.trim();
    if path.is_empty() {
        return Err(spawn_error(app_id, "empty command"));
    }
    if spec.kind != AppKind::Shell && is_explicit_path(path) && !Path::new(path).exists() {
        return Err(spawn_error(app_id, format!("Path not found: {path}")));
    }

    let mut command = match spec.kind {
        AppKind::Exe => {
            let mut c = Command::new(path);
            c.args(split_arguments(&spec.arguments));
            c
        }
        AppKind::Bat => script_command(path, &spec.arguments),
        AppKind::Shell => shell_command(&command_line(path, &spec.arguments)),
    };

    let (working_dir, working_dir_explicit) = match &spec.working_dir {
        Some(dir) => (Some(dir.clone()), true),
        None if spec.kind != AppKind::Shell => (fallback_working_dir(path), false),
        None => (None, false),
    };
    if let Some(dir) = &working_dir {
        command.current_dir(dir);
    }

    if options.utf8_env_hints {
        command.env("PYTHONIOENCODING", "utf-8");
        command.env("PYTHONUTF8", "1");
    }
    command.envs(&spec.env_overrides);

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so stop can signal the interpreter and its children.
    #[cfg(unix)]
    command.process_group(0);

    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);

    debug!(
        "{}: built {} launch for {:?} (cwd {:?})",
        app_id, spec.kind, path, working_dir
    );

    Ok(LaunchPlan {
        command,
        working_dir,
        working_dir_explicit,
    })
}

fn spawn_error(app_id: &str, message: impl Into<String>) -> AppCtrlError {
    AppCtrlError::Spawn {
        app_id: app_id.to_string(),
        message: message.into(),
    }
}

/// Whether `path` names a file location rather than a bare program name
/// resolved through `PATH`.
fn is_explicit_path(path: &str) -> bool {
    path.contains(['/', '\\'])
}

/// Parent directory of the command path, when it exists.
fn fallback_working_dir(path: &str) -> Option<PathBuf> {
    let parent = Path::new(path).parent()?;
    if parent.as_os_str().is_empty() || !parent.is_dir() {
        return None;
    }
    Some(parent.to_path_buf())
}

fn command_line(path: &str, arguments: &str) -> String {
    let arguments = arguments.trim();
    if arguments.is_empty() {
        path.to_string()
    } else {
        format!("{path} {arguments}")
    }
}

#[cfg(windows)]
fn script_command(path: &str, arguments: &str) -> Command {
    let quoted = format!("\"{path}\"");
    shell_command(&command_line(&quoted, arguments))
}

#[cfg(not(windows))]
fn script_command(path: &str, arguments: &str) -> Command {
    let mut c = Command::new("sh");
    c.arg(path).args(split_arguments(arguments));
    c
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut c = Command::new("cmd.exe");
    // cmd strips the outermost quote pair after /C and keeps the rest verbatim.
    c.raw_arg("/C")
        .raw_arg(format!("\"{UTF8_CODE_PAGE_PREFIX}{line}\""));
    c
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut c = Command::new("sh");
    c.arg("-c").arg(line);
    c
}
