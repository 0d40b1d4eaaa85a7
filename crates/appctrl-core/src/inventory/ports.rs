//! Port inventory: open ports joined to their owning process.

use super::table::ProcessTable;
use crate::error::{AppCtrlError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// One row of the OS socket table, before the image-name join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEntry {
    pub port: u16,
    pub protocol: Protocol,
    pub pid: u32,
}

/// One open port and its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub port: u16,
    pub protocol: Protocol,
    pub pid: u32,
    pub image_name: String,
}

/// Read the OS socket table.
pub trait SocketTable: Send + Sync {
    /// Listening TCP sockets and all bound UDP sockets, one row per owning pid.
    fn sockets(&self) -> Result<Vec<SocketEntry>>;
}

/// [`SocketTable`] backed by `netstat2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetstatSocketTable;

impl SocketTable for NetstatSocketTable {
    fn sockets(&self) -> Result<Vec<SocketEntry>> {
        use netstat2::{
            iterate_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState,
        };

        let af = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let pf = ProtocolFlags::TCP | ProtocolFlags::UDP;
        let iter = iterate_sockets_info(af, pf).map_err(|e| AppCtrlError::PortTable {
            message: e.to_string(),
        })?;

        let mut entries = Vec::new();
        for info in iter {
            // Rows that fail to decode are dropped, not fatal.
            let info = match info {
                Ok(info) => info,
                Err(e) => {
                    debug!("Skipping unreadable socket row: {}", e);
                    continue;
                }
            };
            let (port, protocol) = match &info.protocol_socket_info {
                ProtocolSocketInfo::Tcp(tcp) if tcp.state == TcpState::Listen => {
                    (tcp.local_port, Protocol::Tcp)
                }
                ProtocolSocketInfo::Tcp(_) => continue,
                ProtocolSocketInfo::Udp(udp) => (udp.local_port, Protocol::Udp),
            };
            entries.extend(info.associated_pids.iter().map(|&pid| SocketEntry {
                port,
                protocol,
                pid,
            }));
        }
        Ok(entries)
    }
}

/// On-demand view over the socket table.
#[derive(Clone)]
pub struct PortInventory {
    processes: Arc<dyn ProcessTable>,
    sockets: Arc<dyn SocketTable>,
}

impl std::fmt::Debug for PortInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortInventory").finish_non_exhaustive()
    }
}

impl PortInventory {
    pub fn new(processes: Arc<dyn ProcessTable>, sockets: Arc<dyn SocketTable>) -> Self {
        Self { processes, sockets }
    }

    /// Every open port with a resolvable owner, sorted by port.
    ///
    /// Rows whose pid has no live process at scan time are omitted. Duplicate
    /// `(port, protocol, pid)` rows (dual-stack sockets) collapse to one.
    pub fn list(&self) -> Result<Vec<PortInfo>> {
        let sockets = self.sockets.sockets()?;
        let names: HashMap<u32, String> = self
            .processes
            .snapshot()?
            .into_iter()
            .map(|e| (e.pid, e.image_name))
            .collect();

        let mut rows: Vec<PortInfo> = sockets
            .into_iter()
            .filter_map(|s| {
                let image_name = names.get(&s.pid)?.clone();
                Some(PortInfo {
                    port: s.port,
                    protocol: s.protocol,
                    pid: s.pid,
                    image_name,
                })
            })
            .collect();

        rows.sort_by_key(|r| (r.port, r.protocol, r.pid));
        rows.dedup_by(|a, b| a.port == b.port && a.protocol == b.protocol && a.pid == b.pid);
        debug!("Port table: {} rows", rows.len());
        Ok(rows)
    }

    /// Terminate the current owner of `port`.
    ///
    /// The owner is resolved from a fresh scan. When several processes share
    /// the port, each is terminated; the first failure is returned after all
    /// were attempted. Returns the pids that were terminated.
    ///
    /// # Errors
    ///
    /// [`AppCtrlError::NotFound`] if the port is no longer open.
    pub fn kill(&self, port: u16) -> Result<Vec<u32>> {
        let mut pids: Vec<u32> = self
            .list()?
            .into_iter()
            .filter(|r| r.port == port)
            .map(|r| r.pid)
            .collect();
        pids.sort_unstable();
        pids.dedup();

        if pids.is_empty() {
            return Err(AppCtrlError::not_found(format!("port {port}")));
        }

        let mut killed = Vec::new();
        let mut first_error = None;
        for pid in pids {
            match self.processes.terminate(pid) {
                Ok(()) => killed.push(pid),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if killed.is_empty() => Err(e),
            _ => {
                info!(port, ?killed, "Terminated port owner");
                Ok(killed)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct FakeSocketTable {
        rows: Mutex<Vec<SocketEntry>>,
    }

    impl FakeSocketTable {
        pub(crate) fn add(&self, port: u16, protocol: Protocol, pid: u32) {
            self.rows.lock().unwrap().push(SocketEntry { port, protocol, pid });
        }

        pub(crate) fn close(&self, port: u16) {
            self.rows.lock().unwrap().retain(|r| r.port != port);
        }
    }

    impl SocketTable for FakeSocketTable {
        fn sockets(&self) -> Result<Vec<SocketEntry>> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeSocketTable;
    use super::*;
    use crate::inventory::table::fake::FakeProcessTable;

    fn inventory() -> (Arc<FakeProcessTable>, Arc<FakeSocketTable>, PortInventory) {
        let processes = Arc::new(FakeProcessTable::new());
        let sockets = Arc::new(FakeSocketTable::default());
        let ports = PortInventory::new(processes.clone(), sockets.clone());
        (processes, sockets, ports)
    }

    #[test]
    fn test_list_joins_sorts_and_dedups() {
        let (processes, sockets, ports) = inventory();
        processes.add(100, r"C:\srv\nginx.exe", 0);
        processes.add(200, r"C:\srv\dns.exe", 0);
        sockets.add(8080, Protocol::Tcp, 100);
        sockets.add(80, Protocol::Tcp, 100);
        sockets.add(80, Protocol::Tcp, 100);
        sockets.add(53, Protocol::Udp, 200);
        sockets.add(53, Protocol::Tcp, 200);

        let rows = ports.list().unwrap();
        let keys: Vec<_> = rows.iter().map(|r| (r.port, r.protocol)).collect();
        assert_eq!(
            keys,
            vec![
                (53, Protocol::Tcp),
                (53, Protocol::Udp),
                (80, Protocol::Tcp),
                (8080, Protocol::Tcp)
            ]
        );
        assert_eq!(rows[2].image_name, "nginx.exe");
    }

    #[test]
    fn test_unresolved_pid_is_omitted() {
        let (processes, sockets, ports) = inventory();
        processes.add(100, "a.exe", 0);
        sockets.add(3000, Protocol::Tcp, 100);
        sockets.add(3001, Protocol::Tcp, 4242);

        let rows = ports.list().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|r| r.pid != 4242));
    }

    #[test]
    fn test_kill_port_resolves_fresh_owner() {
        let (processes, sockets, ports) = inventory();
        processes.add(100, "web.exe", 0);
        sockets.add(8080, Protocol::Tcp, 100);

        assert_eq!(ports.kill(8080).unwrap(), vec![100]);
        assert_eq!(processes.terminated(), vec![100]);
    }

    #[test]
    fn test_kill_closed_port_is_not_found() {
        let (processes, sockets, ports) = inventory();
        processes.add(100, "web.exe", 0);
        sockets.add(8080, Protocol::Tcp, 100);
        assert_eq!(ports.list().unwrap().len(), 1);

        // Closed between listing and kill.
        sockets.close(8080);
        let err = ports.kill(8080).unwrap_err();
        assert!(err.is_not_found());
        assert!(processes.terminated().is_empty());
    }

    #[test]
    fn test_kill_port_access_denied() {
        let (processes, sockets, ports) = inventory();
        processes.add(4, "System", 0);
        processes.protect(4);
        sockets.add(445, Protocol::Tcp, 4);

        assert!(matches!(ports.kill(445), Err(AppCtrlError::AccessDenied { pid: 4 })));
    }
}
