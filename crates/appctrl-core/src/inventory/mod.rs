//! On-demand snapshots of OS state: processes and open ports.
//!
//! Nothing here is cached and nothing touches the registry; scans may run in
//! parallel with everything else.

pub mod ports;
pub mod table;
pub mod tasks;

pub use ports::{NetstatSocketTable, PortInfo, PortInventory, Protocol, SocketEntry, SocketTable};
pub use table::{any_matches, find_by_image, ProcessEntry, ProcessTable, SystemProcessTable};
pub use tasks::{
    group_tasks, is_system_process, KillOutcome, KillStatus, TaskGroup, TaskInfo, TaskInventory,
    SYSTEM_PROCESS_NAMES,
};
