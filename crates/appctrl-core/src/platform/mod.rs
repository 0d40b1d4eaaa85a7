//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific process behavior live here rather than
//! being scattered through the supervisor and inventories.
//!
//! # Supported Platforms
//!
//! - **Windows**: primary target (process handles, `taskkill`, console code page)
//! - **Linux/macOS**: equivalent semantics via signals and process groups

pub mod image;
pub mod process;

pub use image::{image_file_name, match_image, same_image_name, ImageMatch};
pub use process::{is_process_alive, signal_process_tree, terminate_pid};

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}
