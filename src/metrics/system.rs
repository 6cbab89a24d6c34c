//! OS process lookups (status, command line, user, CPU and memory).

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, Users};

use crate::types::OsProcess;

/// Source of OS-level process attributes.
pub trait ProcessInspector: Send {
    /// Re-read OS state for `pids`. Processes that exited are forgotten.
    fn refresh(&mut self, pids: &[u32]);

    /// Attributes of a running process, or `None` if it is gone or defunct.
    /// The environment is only read when `with_environ` is set.
    fn lookup(&self, pid: u32, with_environ: bool) -> Option<OsProcess>;
}

/// [`ProcessInspector`] backed by `sysinfo`.
///
/// The same `System` is kept across polls so CPU usage is measured between
/// consecutive refreshes of a pid; the first sample of a process reads 0%.
pub struct SysinfoInspector {
    system: System,
    users: Users,
}

impl Default for SysinfoInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoInspector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            users: Users::new_with_refreshed_list(),
        }
    }
}

impl ProcessInspector for SysinfoInspector {
    fn refresh(&mut self, pids: &[u32]) {
        let pids: Vec<Pid> = pids.iter().map(|&p| Pid::from_u32(p)).collect();

        // `remove_dead` only prunes the pids passed in, so entries from
        // earlier polls are liveness-checked here or they are never dropped.
        let stale: Vec<Pid> = self
            .system
            .processes()
            .keys()
            .filter(|pid| !pids.contains(pid))
            .copied()
            .collect();
        if !stale.is_empty() {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&stale),
                true,
                ProcessRefreshKind::new(),
            );
        }

        if pids.is_empty() {
            return;
        }
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::everything(),
        );
        self.users.refresh_list();
    }

    fn lookup(&self, pid: u32, with_environ: bool) -> Option<OsProcess> {
        let proc = self.system.process(Pid::from_u32(pid))?;
        if matches!(proc.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }

        let user = proc
            .user_id()
            .and_then(|uid| self.users.get_user_by_id(uid))
            .map(|u| u.name().to_string())
            .unwrap_or_default();

        let command_line = proc
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        let environ = if with_environ {
            proc.environ()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect()
        } else {
            Vec::new()
        };

        Some(OsProcess {
            name: proc.name().to_string_lossy().to_string(),
            command_line,
            working_dir: proc
                .cwd()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            user,
            status: status_name(proc.status()).to_string(),
            ppid: proc.parent().map(|p| p.as_u32()).unwrap_or(0),
            cpu_percent: proc.cpu_usage(),
            resident_bytes: proc.memory(),
            num_threads: proc
                .tasks()
                .map(|tasks| tasks.len().max(1) as u32)
                .unwrap_or(1),
            environ,
        })
    }
}

fn status_name(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Run => "Running",
        ProcessStatus::Sleep => "Sleep",
        ProcessStatus::Idle => "Idle",
        ProcessStatus::Zombie => "Zombie",
        ProcessStatus::Stop => "Stopped",
        ProcessStatus::UninterruptibleDiskSleep => "DiskSleep",
        ProcessStatus::Dead => "Dead",
        _ => "Unknown",
    }
}
