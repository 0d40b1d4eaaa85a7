//! Centralized configuration for AppCtrl.
//!
//! Timing constants for supervision and liveness polling, plus limits for
//! icon extraction.

use std::time::Duration;

/// Configuration for the process supervisor.
pub struct SupervisorConfig;

impl SupervisorConfig {
    /// Time a process gets to exit after a graceful stop request.
    pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(1500);
    /// Upper bound on waiting for the OS to confirm a force kill.
    pub const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);
    /// Upper bound on draining output readers once the process is gone.
    pub const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
    /// Poll interval used while waiting for an external pid to disappear.
    pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
}

/// Configuration for the liveness monitor.
pub struct LivenessConfig;

impl LivenessConfig {
    pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
}

/// Configuration for icon extraction.
pub struct IconConfig;

impl IconConfig {
    /// Preferred ("jumbo") edge length in pixels.
    pub const JUMBO_SIZE: u32 = 256;
    /// Executables larger than this are not scanned for icons.
    pub const MAX_IMAGE_BYTES: u64 = 512 * 1024 * 1024;
    /// Single icon resources larger than this are rejected as corrupt.
    pub const MAX_ICON_BYTES: usize = 16 * 1024 * 1024;
}

/// Runtime options for the supervisor.
///
/// Defaults come from [`SupervisorConfig`]; tests shorten the grace period.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Grace period between the graceful stop request and the force kill.
    pub stop_grace_period: Duration,
    /// Set `PYTHONIOENCODING`/`PYTHONUTF8` so script output decodes as UTF-8.
    pub utf8_env_hints: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            stop_grace_period: SupervisorConfig::STOP_GRACE_PERIOD,
            utf8_env_hints: true,
        }
    }
}
