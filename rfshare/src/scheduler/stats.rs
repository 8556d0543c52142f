//! Per-session scan statistics.

use std::collections::BTreeMap;

use serde::Serialize;

use rfshare_types::{DelsysType, ScanId, ScanResult};

/// Counters for one delivery system family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DelsysStats {
    /// Muxes, bands and peaks waiting for resources.
    pub pending: u32,
    pub active: u32,
    pub finished: u32,
    pub failed: u32,
    pub locked: u32,
    /// Finished with service information.
    pub si: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    by_delsys: BTreeMap<DelsysType, DelsysStats>,
}

impl ScanStats {
    pub fn get(&self, delsys_type: DelsysType) -> DelsysStats {
        self.by_delsys
            .get(&delsys_type)
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, delsys_type: DelsysType) -> &mut DelsysStats {
        self.by_delsys.entry(delsys_type).or_default()
    }

    pub fn add_pending(&mut self, delsys_type: DelsysType, n: u32) {
        self.entry(delsys_type).pending += n;
    }

    pub fn drop_pending(&mut self, delsys_type: DelsysType) {
        let st = self.entry(delsys_type);
        st.pending = st.pending.saturating_sub(1);
    }

    /// A pending item got resources.
    pub fn started(&mut self, delsys_type: DelsysType) {
        let st = self.entry(delsys_type);
        st.pending = st.pending.saturating_sub(1);
        st.active += 1;
    }

    /// An active item went back to the queue.
    pub fn requeued(&mut self, delsys_type: DelsysType) {
        let st = self.entry(delsys_type);
        st.active = st.active.saturating_sub(1);
        st.pending += 1;
    }

    /// An active item completed with `result`.
    pub fn finished(&mut self, delsys_type: DelsysType, result: ScanResult) {
        let st = self.entry(delsys_type);
        st.active = st.active.saturating_sub(1);
        st.finished += 1;
        if result.is_failure() {
            st.failed += 1;
        }
        if result.is_locked() {
            st.locked += 1;
        }
        if result.has_si() {
            st.si += 1;
        }
    }

    /// A pending item was given up without ever becoming active.
    pub fn abandoned(&mut self, delsys_type: DelsysType) {
        let st = self.entry(delsys_type);
        st.pending = st.pending.saturating_sub(1);
        st.finished += 1;
        st.failed += 1;
    }

    pub fn total(&self) -> DelsysStats {
        self.by_delsys
            .values()
            .fold(DelsysStats::default(), |mut acc, st| {
                acc.pending += st.pending;
                acc.active += st.active;
                acc.finished += st.finished;
                acc.failed += st.failed;
                acc.locked += st.locked;
                acc.si += st.si;
                acc
            })
    }
}

/// Snapshot broadcast to observers after every change of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scan_id: ScanId,
    pub stats: ScanStats,
    /// The session ended and has been removed.
    pub finished: bool,
}
