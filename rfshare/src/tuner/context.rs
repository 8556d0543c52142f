//! Allocator context: own identity, id sequences and the liveness probe.

use rfshare_types::SubscriptionId;

use super::liveness::{OwnerProbe, ProcessProbe};

/// Generator for subscription and config ids.
#[derive(Debug, Clone)]
pub struct Sequence {
    next_subscription_id: u32,
    next_config_id: i32,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            next_subscription_id: 1,
            next_config_id: 1,
        }
    }

    pub fn next_subscription_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id);
        self.next_subscription_id = self.next_subscription_id.wrapping_add(1).max(1);
        id
    }

    pub fn next_config_id(&mut self) -> i32 {
        let id = self.next_config_id;
        self.next_config_id = self.next_config_id.wrapping_add(1).max(1);
        id
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an allocator call needs besides the transaction.
pub struct AllocContext {
    /// Process id recorded as owner of new reservations.
    pub own_pid: u32,
    pub seq: Sequence,
    probe: Box<dyn OwnerProbe + Send>,
}

impl AllocContext {
    pub fn new(own_pid: u32, probe: Box<dyn OwnerProbe + Send>) -> Self {
        Self {
            own_pid,
            seq: Sequence::new(),
            probe,
        }
    }

    /// Context for the running process, probing real processes.
    pub fn for_current_process() -> Self {
        Self::new(std::process::id(), Box::new(ProcessProbe::new()))
    }

    pub fn is_owner_alive(&self, pid: u32) -> bool {
        pid == self.own_pid || self.probe.is_owner_alive(pid)
    }

    pub fn set_probe(&mut self, probe: Box<dyn OwnerProbe + Send>) {
        self.probe = probe;
    }
}

impl std::fmt::Debug for AllocContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocContext")
            .field("own_pid", &self.own_pid)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
