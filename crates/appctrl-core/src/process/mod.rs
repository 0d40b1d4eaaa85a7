//! Process lifecycle: launch command construction, supervision of started
//! apps, and liveness reconciliation for apps started elsewhere.

pub mod launcher;
pub mod liveness;
pub mod supervisor;

pub use launcher::{build_command, LaunchPlan};
pub use liveness::{LivenessHandle, LivenessMonitor, WatchTarget};
pub use supervisor::{ProcessSupervisor, StopOutcome};
