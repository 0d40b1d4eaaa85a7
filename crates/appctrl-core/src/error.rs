//! Error types for AppCtrl.
//!
//! Syscall-level failures are translated into this taxonomy at the component
//! boundary so the presentation layer can tell a missing target from a
//! permission problem from a spawn failure.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the AppCtrl core.
#[derive(Debug, Error)]
pub enum AppCtrlError {
    // Launch errors
    #[error("Failed to start {app_id}: {message}")]
    Spawn { app_id: String, message: String },

    #[error("App is already running: {app_id}")]
    Conflict { app_id: String },

    // Termination errors
    #[error("Not found: {target}")]
    NotFound { target: String },

    #[error("Access denied for process {pid}")]
    AccessDenied { pid: u32 },

    // Icon errors
    #[error("No icon resource in {0}")]
    NoIcon(PathBuf),

    #[error("Invalid icon data in {path}: {message}")]
    InvalidIcon { path: PathBuf, message: String },

    // OS table errors
    #[error("Failed to read port table: {message}")]
    PortTable { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for AppCtrl operations.
pub type Result<T> = std::result::Result<T, AppCtrlError>;

impl From<std::io::Error> for AppCtrlError {
    fn from(err: std::io::Error) -> Self {
        AppCtrlError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for AppCtrlError {
    fn from(err: serde_json::Error) -> Self {
        AppCtrlError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl AppCtrlError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        AppCtrlError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a not-found error for any displayable target.
    pub fn not_found(target: impl std::fmt::Display) -> Self {
        AppCtrlError::NotFound {
            target: target.to_string(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32001: Target not found (already stopped / already closed)
    /// - -32002: Spawn failed
    /// - -32003: Conflict (app already running)
    /// - -32004: Access denied
    /// - -32005: No icon resource / invalid icon
    /// - -32601: Method not found
    /// - -32602: Invalid params
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            AppCtrlError::NotFound { .. } => -32001,
            AppCtrlError::Spawn { .. } => -32002,
            AppCtrlError::Conflict { .. } => -32003,
            AppCtrlError::AccessDenied { .. } => -32004,
            AppCtrlError::NoIcon(_) | AppCtrlError::InvalidIcon { .. } => -32005,
            AppCtrlError::MethodNotFound { .. } => -32601,
            AppCtrlError::InvalidParams { .. } => -32602,
            _ => -32603,
        }
    }

    /// Whether this error means the target is simply gone.
    ///
    /// Stop and kill paths treat this as "already stopped" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppCtrlError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppCtrlError::Conflict {
            app_id: "a1".into(),
        };
        assert_eq!(err.to_string(), "App is already running: a1");

        let err = AppCtrlError::not_found("port 8080");
        assert_eq!(err.to_string(), "Not found: port 8080");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(AppCtrlError::not_found("x").to_rpc_error_code(), -32001);
        assert_eq!(AppCtrlError::AccessDenied { pid: 4 }.to_rpc_error_code(), -32004);
        assert_eq!(
            AppCtrlError::NoIcon(PathBuf::from("a.exe")).to_rpc_error_code(),
            -32005
        );
        let unknown = AppCtrlError::MethodNotFound {
            method: "frobnicate".into(),
        };
        assert_eq!(unknown.to_rpc_error_code(), -32601);
        assert_eq!(unknown.to_string(), "Method not found: frobnicate");
        assert_eq!(AppCtrlError::Other("boom".into()).to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_io_error_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        match AppCtrlError::io_with_path(io, "C:/missing.exe") {
            AppCtrlError::Io { path, source, .. } => {
                assert_eq!(path, Some(PathBuf::from("C:/missing.exe")));
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
