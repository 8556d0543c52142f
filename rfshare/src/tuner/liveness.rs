//! Owner liveness probing.
//!
//! A reservation recorded by a process that no longer exists is treated as
//! released. Every caller asks through [`OwnerProbe`] instead of probing
//! processes itself.

use std::collections::HashSet;

/// Decides whether the process owning a reservation is still running.
pub trait OwnerProbe {
    fn is_owner_alive(&self, pid: u32) -> bool;
}

/// Probes real processes with a null signal.
#[derive(Debug, Clone, Copy)]
pub struct ProcessProbe {
    own_pid: u32,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            own_pid: std::process::id(),
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerProbe for ProcessProbe {
    #[cfg(unix)]
    fn is_owner_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if pid == self.own_pid {
            return true;
        }
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            // Exists but belongs to another user.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_owner_alive(&self, pid: u32) -> bool {
        pid != 0
    }
}

/// Fixed set of live process ids.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    alive: HashSet<u32>,
}

impl StaticProbe {
    pub fn new(alive: impl IntoIterator<Item = u32>) -> Self {
        Self {
            alive: alive.into_iter().collect(),
        }
    }

    pub fn kill(&mut self, pid: u32) {
        self.alive.remove(&pid);
    }

    pub fn spawn(&mut self, pid: u32) {
        self.alive.insert(pid);
    }
}

impl OwnerProbe for StaticProbe {
    fn is_owner_alive(&self, pid: u32) -> bool {
        self.alive.contains(&pid)
    }
}
