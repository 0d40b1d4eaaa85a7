//! Plain data types shared between the core and the presentation layer.
//!
//! Application records are owned by the external configuration collaborator;
//! the core reads them as plain structured values and only ever writes back
//! the `is_running` flag after re-verifying it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How a registered application is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    /// Native executable, spawned directly.
    Exe,
    /// Batch script, spawned through the platform command interpreter.
    #[serde(alias = "cmd", alias = "script")]
    Bat,
    /// Raw command line, handed to the platform shell as one string.
    #[serde(alias = "command", alias = "sh")]
    Shell,
}

impl AppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::Exe => "exe",
            AppKind::Bat => "bat",
            AppKind::Shell => "shell",
        }
    }

    /// Parse a kind name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exe" => Some(AppKind::Exe),
            "bat" | "cmd" | "script" => Some(AppKind::Bat),
            "shell" | "command" | "sh" => Some(AppKind::Shell),
            _ => None,
        }
    }

    /// Guess the kind from a configured path's extension.
    pub fn infer(path: &str) -> Self {
        let ext = Path::new(path.trim())
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("exe") => AppKind::Exe,
            Some("bat") | Some("cmd") => AppKind::Bat,
            _ => AppKind::Shell,
        }
    }
}

impl std::fmt::Display for AppKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted application record, as stored by the configuration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub app_type: AppKind,
    pub executable_path: String,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub arguments: String,
    /// `KEY=value` lines.
    #[serde(default)]
    pub environment_vars: String,
    /// Last known running flag. A hint to re-verify, never ground truth.
    #[serde(default)]
    pub is_running: bool,
}

/// Everything needed to build the OS launch invocation for one app.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub kind: AppKind,
    /// Executable or script path; for [`AppKind::Shell`] a full command string.
    pub command_path: String,
    pub working_dir: Option<PathBuf>,
    /// Raw argument string, tokenized per kind at launch time.
    pub arguments: String,
    pub env_overrides: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(kind: AppKind, command_path: impl Into<String>) -> Self {
        Self {
            kind,
            command_path: command_path.into(),
            working_dir: None,
            arguments: String::new(),
            env_overrides: BTreeMap::new(),
        }
    }

    /// Set the raw argument string.
    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    /// Set the working directory. Empty strings mean "unset".
    pub fn with_working_dir(mut self, dir: impl AsRef<str>) -> Self {
        let dir = dir.as_ref().trim();
        self.working_dir = if dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(dir))
        };
        self
    }

    /// Merge `KEY=value` lines into the environment overrides.
    pub fn with_env_lines(mut self, lines: &str) -> Self {
        self.env_overrides.extend(parse_env_vars(lines));
        self
    }

    /// Add a single environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    /// Build a launch spec from a persisted record.
    pub fn from_record(record: &AppRecord) -> Self {
        LaunchSpec::new(record.app_type, record.executable_path.clone())
            .with_arguments(record.arguments.clone())
            .with_working_dir(&record.working_directory)
            .with_env_lines(&record.environment_vars)
    }
}

/// Parse `KEY=value` lines into a map.
///
/// Keys and values are trimmed. Blank lines, lines without `=`, and lines
/// with an empty key are ignored. Later duplicates win.
pub fn parse_env_vars(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Split an argument string using shell-like quoting.
///
/// Whitespace separates tokens; single or double quotes group text (and are
/// removed); inside double quotes `\"` and `\\` are escapes. Backslashes
/// elsewhere are literal so Windows paths survive untouched.
pub fn split_arguments(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' && matches!(chars.peek(), Some('"') | Some('\\')) => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        args.push(current);
    }
    args
}
