//! Process liveness probe backed by the system process table

use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, trace};

/// Snapshot of a running process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Resident memory in KiB
    pub memory_kib: u64,
    /// Number of direct children
    pub children: usize,
    pub cpu_percent: f32,
}

/// Answers "is the process of this service running, and what does it look like"
pub trait ProcessProbe: Send + Sync {
    fn probe(&self, service: &str, pidfile: &Path) -> Option<ProcessInfo>;
}

/// Reads the pid from a pidfile and looks it up in the process table
pub struct PidFileProbe {
    system: Mutex<System>,
}

impl PidFileProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for PidFileProbe {
    fn default() -> Self {
        Self::new()
    }
}

pub fn read_pidfile(pidfile: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(pidfile)
        .inspect_err(|e| trace!("cannot read pidfile {}: {e}", pidfile.display()))
        .ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

impl ProcessProbe for PidFileProbe {
    fn probe(&self, service: &str, pidfile: &Path) -> Option<ProcessInfo> {
        let pid = read_pidfile(pidfile)?;

        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        let process = system.process(Pid::from_u32(pid))?;
        let children = system
            .processes()
            .values()
            .filter(|candidate| candidate.parent() == Some(Pid::from_u32(pid)))
            .count();

        let info = ProcessInfo {
            pid,
            memory_kib: process.memory() / 1024,
            children,
            cpu_percent: process.cpu_usage(),
        };
        debug!("{service}: process {pid} is running");
        Some(info)
    }
}
