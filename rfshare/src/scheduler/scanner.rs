//! All scan sessions of this process.
//!
//! Every operation runs one write transaction, commits it, and only then
//! hands the resulting device commands to the [`DeviceControl`] and
//! broadcasts [`ScanReport`]s to observers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::sync::broadcast;

use rfshare_types::{
    AnyMux, DelsysType, Polarisation, Satellite, ScanHeader, ScanId, SubBand, SubscriptionId,
};

use super::blindscan::SpectralPeak;
use super::device::{BandScanReport, DeviceCommand, DeviceControl, MuxScanReport};
use super::scan::{now, Scan};
use super::stats::ScanReport;
use super::ScanError;
use crate::database::{Database, Txn};
use crate::tuner::{AllocContext, TuneOptions};

const REPORT_CHANNEL_CAPACITY: usize = 64;

const ALL_DELSYS: [DelsysType; 3] = [DelsysType::Sat, DelsysType::Cable, DelsysType::Terrestrial];

/// One band of one satellite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BandSpec {
    pub sat_pos: i16,
    pub pol: Polarisation,
    pub band: SubBand,
}

/// Commands and reports produced by a committed transaction.
#[derive(Debug, Default)]
struct Effects {
    outbox: Vec<DeviceCommand>,
    reports: Vec<ScanReport>,
}

/// Whether a scan claim still belongs to a running session.
fn claim_is_live(ctx: &AllocContext, scans: &BTreeMap<SubscriptionId, Scan>, owner: &ScanId) -> bool {
    if owner.pid == ctx.own_pid {
        scans.contains_key(&owner.subscription_id)
    } else {
        ctx.is_owner_alive(owner.pid)
    }
}

/// Whether a record may be claimed for `scan_id`.
///
/// Returns `None` if it already is.
fn can_claim(
    ctx: &AllocContext,
    scans: &BTreeMap<SubscriptionId, Scan>,
    header: &ScanHeader,
    scan_id: &ScanId,
) -> Option<bool> {
    if header.is_claimed_by(scan_id) {
        return None;
    }
    match header.scan_id {
        Some(owner) if header.scan_status.is_in_progress() => {
            Some(!claim_is_live(ctx, scans, &owner))
        }
        _ => Some(true),
    }
}

pub struct Scanner {
    ctx: AllocContext,
    options: TuneOptions,
    max_num_subscriptions: usize,
    scans: BTreeMap<SubscriptionId, Scan>,
    must_end: Arc<AtomicBool>,
    reports: broadcast::Sender<ScanReport>,
}

impl Scanner {
    pub fn new(ctx: AllocContext, options: TuneOptions, max_num_subscriptions: usize) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            ctx,
            options,
            max_num_subscriptions,
            scans: BTreeMap::new(),
            must_end: Arc::new(AtomicBool::new(false)),
            reports,
        }
    }

    pub fn ctx(&self) -> &AllocContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut AllocContext {
        &mut self.ctx
    }

    /// Flag which, when set, makes the next scan step tear down every session.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.must_end)
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<ScanReport> {
        self.reports.subscribe()
    }

    pub(crate) fn report_sender(&self) -> broadcast::Sender<ScanReport> {
        self.reports.clone()
    }

    pub fn num_scans(&self) -> usize {
        self.scans.len()
    }

    pub fn scan(&self, scan_sid: SubscriptionId) -> Option<&Scan> {
        self.scans.get(&scan_sid)
    }

    /// Whether `scan_id` names a running session of this process.
    pub fn is_our_scan(&self, scan_id: &ScanId) -> bool {
        scan_id.pid == self.ctx.own_pid && self.scans.contains_key(&scan_id.subscription_id)
    }

    fn resolve_scan(&mut self, scan_sid: Option<SubscriptionId>) -> Result<SubscriptionId, ScanError> {
        match scan_sid {
            Some(sid) if self.scans.contains_key(&sid) => Ok(sid),
            Some(sid) => Err(ScanError::UnknownScan(sid)),
            None => Ok(self.ctx.seq.next_subscription_id()),
        }
    }

    fn new_scan(&self, scan_id: ScanId) -> Scan {
        Scan::new(scan_id, self.options.clone(), self.max_num_subscriptions)
    }

    /// Session owning a scan subscription.
    fn scan_owning(&self, sid: SubscriptionId) -> Option<SubscriptionId> {
        self.scans
            .iter()
            .find(|(_, scan)| scan.owns(sid))
            .map(|(scan_sid, _)| *scan_sid)
    }

    /// Run one transactional step and flush its effects.
    ///
    /// Session state is rolled back together with the transaction when the
    /// step fails, so every reservation left in the database stays owned by
    /// a session that can release it.
    fn transact<T>(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        step: impl FnOnce(&mut Self, &mut Database) -> Result<(T, Effects), ScanError>,
    ) -> Result<T, ScanError> {
        let snapshot = self.scans.clone();
        let result = step(self, db);
        if result.is_err() {
            self.scans = snapshot;
        }
        self.settle(db, device, result)
    }

    /// Flush effects of a committed transaction, or tear everything down
    /// after a cancellation.
    fn settle<T>(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        result: Result<(T, Effects), ScanError>,
    ) -> Result<T, ScanError> {
        match result {
            Ok((value, effects)) => {
                for command in effects.outbox {
                    device.execute(command);
                }
                for report in effects.reports {
                    // No receivers is fine.
                    let _ = self.reports.send(report);
                }
                Ok(value)
            }
            Err(ScanError::Cancelled) => {
                warn!("Scanner: cancelled, ending all scans");
                self.must_end.store(false, Ordering::Relaxed);
                if let Err(e) = self.unsubscribe_all(db, device) {
                    error!("Scanner: failed to end scans: {}", e);
                }
                Err(ScanError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop a session that has nothing left to do.
    ///
    /// A running session is reported only if `changed`.
    fn reap(
        &mut self,
        txn: &Txn<'_>,
        scan_sid: SubscriptionId,
        changed: bool,
        effects: &mut Effects,
    ) -> Result<(), ScanError> {
        let Some(scan) = self.scans.get(&scan_sid) else {
            return Ok(());
        };
        if scan.has_work(txn)? {
            if changed {
                effects.reports.push(scan.report(false));
            }
            return Ok(());
        }
        if let Some(scan) = self.scans.remove(&scan_sid) {
            let total = scan.stats().total();
            info!(
                "Scanner: scan {} finished ({} done, {} failed, {} locked)",
                scan.scan_id(),
                total.finished,
                total.failed,
                total.locked
            );
            effects.reports.push(scan.report(true));
        }
        Ok(())
    }

    /// Claim muxes for a scan and start as many as resources allow.
    ///
    /// `scan_sid` adds to an existing session; `None` starts a new one.
    /// Muxes claimed by another live session are skipped.
    pub fn add_muxes(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        muxes: &[AnyMux],
        scan_sid: Option<SubscriptionId>,
    ) -> Result<SubscriptionId, ScanError> {
        self.transact(db, device, |s, db| s.add_muxes_txn(db, muxes, scan_sid))
    }

    fn add_muxes_txn(
        &mut self,
        db: &mut Database,
        muxes: &[AnyMux],
        scan_sid: Option<SubscriptionId>,
    ) -> Result<(SubscriptionId, Effects), ScanError> {
        let scan_sid = self.resolve_scan(scan_sid)?;
        let scan_id = ScanId {
            pid: self.ctx.own_pid,
            subscription_id: scan_sid,
        };
        let txn = db.write_txn()?;

        let mut added: BTreeMap<DelsysType, u32> = BTreeMap::new();
        for mux in muxes {
            let mut rec = txn
                .find_mux(mux.delsys_type(), mux.key())?
                .unwrap_or_else(|| mux.clone());
            match can_claim(&self.ctx, &self.scans, rec.header(), &scan_id) {
                Some(true) => {}
                Some(false) => {
                    debug!(
                        "Scanner: mux {} is being scanned by {:?}",
                        rec.key(),
                        rec.header().scan_id
                    );
                    continue;
                }
                None => continue,
            }
            rec.header_mut().claim(scan_id);
            txn.put_mux(&rec)?;
            *added.entry(rec.delsys_type()).or_default() += 1;
        }
        if added.is_empty() {
            error!("Scanner: none of {} muxes could be added to a scan", muxes.len());
            return Err(ScanError::NothingAdded);
        }

        let scan = self.new_scan(scan_id);
        let scan = self.scans.entry(scan_sid).or_insert(scan);
        let mut effects = Effects::default();
        for (delsys_type, n) in &added {
            scan.note_pending(*delsys_type, *n);
            scan.scan_next(
                &txn,
                &mut self.ctx,
                *delsys_type,
                None,
                &self.must_end,
                &mut effects.outbox,
            )?;
        }
        self.reap(&txn, scan_sid, true, &mut effects)?;
        txn.commit()?;

        info!(
            "Scanner: scan {} claimed {} muxes",
            scan_id,
            added.values().sum::<u32>()
        );
        Ok((scan_sid, effects))
    }

    /// Claim satellite bands for spectrum scans.
    pub fn add_bands(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        bands: &[BandSpec],
        scan_sid: Option<SubscriptionId>,
    ) -> Result<SubscriptionId, ScanError> {
        self.transact(db, device, |s, db| s.add_bands_txn(db, bands, scan_sid))
    }

    fn add_bands_txn(
        &mut self,
        db: &mut Database,
        bands: &[BandSpec],
        scan_sid: Option<SubscriptionId>,
    ) -> Result<(SubscriptionId, Effects), ScanError> {
        let scan_sid = self.resolve_scan(scan_sid)?;
        let scan_id = ScanId {
            pid: self.ctx.own_pid,
            subscription_id: scan_sid,
        };
        let txn = db.write_txn()?;

        let mut added = 0;
        for band in bands {
            let Some(mut sat) = txn.find_by_key::<Satellite>(&band.sat_pos)? else {
                warn!("Scanner: unknown satellite {}", band.sat_pos);
                continue;
            };
            let header = &mut sat.band_scan_mut(band.pol, band.band).c;
            if can_claim(&self.ctx, &self.scans, header, &scan_id) != Some(true) {
                continue;
            }
            header.claim(scan_id);
            txn.put_record(&sat)?;
            added += 1;
        }
        if added == 0 {
            error!("Scanner: none of {} bands could be added to a scan", bands.len());
            return Err(ScanError::NothingAdded);
        }

        let scan = self.new_scan(scan_id);
        let scan = self.scans.entry(scan_sid).or_insert(scan);
        let mut effects = Effects::default();
        scan.note_pending(DelsysType::Sat, added);
        scan.scan_next(
            &txn,
            &mut self.ctx,
            DelsysType::Sat,
            None,
            &self.must_end,
            &mut effects.outbox,
        )?;
        self.reap(&txn, scan_sid, true, &mut effects)?;
        txn.commit()?;

        info!("Scanner: scan {} claimed {} bands", scan_id, added);
        Ok((scan_sid, effects))
    }

    /// Queue peaks of an externally acquired spectrum into a session.
    pub fn add_spectral_peaks(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        scan_sid: SubscriptionId,
        sat_pos: i16,
        band: SubBand,
        peaks: &[SpectralPeak],
    ) -> Result<usize, ScanError> {
        self.transact(db, device, |s, db| {
            s.add_spectral_peaks_txn(db, scan_sid, sat_pos, band, peaks)
        })
    }

    fn add_spectral_peaks_txn(
        &mut self,
        db: &mut Database,
        scan_sid: SubscriptionId,
        sat_pos: i16,
        band: SubBand,
        peaks: &[SpectralPeak],
    ) -> Result<(usize, Effects), ScanError> {
        let scan = self
            .scans
            .get_mut(&scan_sid)
            .ok_or(ScanError::UnknownScan(scan_sid))?;
        let txn = db.write_txn()?;
        let mut effects = Effects::default();
        let added = scan.add_spectral_peaks(&txn, sat_pos, band, peaks, now())?;
        scan.scan_next(
            &txn,
            &mut self.ctx,
            DelsysType::Sat,
            None,
            &self.must_end,
            &mut effects.outbox,
        )?;
        self.reap(&txn, scan_sid, true, &mut effects)?;
        txn.commit()?;
        Ok((added, effects))
    }

    /// A mux tuning requested by a session finished.
    pub fn on_mux_end(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        report: &MuxScanReport,
    ) -> Result<(), ScanError> {
        self.transact(db, device, |s, db| s.on_mux_end_txn(db, report))
    }

    fn on_mux_end_txn(
        &mut self,
        db: &mut Database,
        report: &MuxScanReport,
    ) -> Result<((), Effects), ScanError> {
        let mut effects = Effects::default();
        let Some(scan_sid) = self.scan_owning(report.subscription_id) else {
            warn!(
                "Scanner: no scan owns subscription {}",
                report.subscription_id
            );
            return Ok(((), effects));
        };
        let txn = db.write_txn()?;
        if let Some(scan) = self.scans.get_mut(&scan_sid) {
            scan.on_scan_mux_end(
                &txn,
                &mut self.ctx,
                report,
                &self.must_end,
                &mut effects.outbox,
            )?;
        }
        self.reap(&txn, scan_sid, true, &mut effects)?;
        txn.commit()?;
        Ok(((), effects))
    }

    /// A spectrum acquisition requested by a session finished.
    pub fn on_band_scan_end(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        report: &BandScanReport,
    ) -> Result<(), ScanError> {
        self.transact(db, device, |s, db| s.on_band_scan_end_txn(db, report))
    }

    fn on_band_scan_end_txn(
        &mut self,
        db: &mut Database,
        report: &BandScanReport,
    ) -> Result<((), Effects), ScanError> {
        let mut effects = Effects::default();
        let Some(scan_sid) = self.scan_owning(report.subscription_id) else {
            warn!(
                "Scanner: no scan owns subscription {}",
                report.subscription_id
            );
            return Ok(((), effects));
        };
        let txn = db.write_txn()?;
        if let Some(scan) = self.scans.get_mut(&scan_sid) {
            scan.on_spectrum_scan_band_end(
                &txn,
                &mut self.ctx,
                report,
                &self.must_end,
                &mut effects.outbox,
            )?;
        }
        self.reap(&txn, scan_sid, true, &mut effects)?;
        txn.commit()?;
        Ok(((), effects))
    }

    /// Drive every session: start whatever resources allow and drop
    /// sessions that are done. Returns the number of subscriptions started.
    pub fn housekeeping(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
    ) -> Result<usize, ScanError> {
        self.transact(db, device, |s, db| s.housekeeping_txn(db))
    }

    fn housekeeping_txn(&mut self, db: &mut Database) -> Result<(usize, Effects), ScanError> {
        let mut effects = Effects::default();
        if self.scans.is_empty() {
            return Ok((0, effects));
        }
        let txn = db.write_txn()?;
        let mut started = 0;
        let scan_sids: Vec<SubscriptionId> = self.scans.keys().copied().collect();
        for scan_sid in scan_sids {
            let mut scan_started = 0;
            if let Some(scan) = self.scans.get_mut(&scan_sid) {
                for delsys_type in ALL_DELSYS {
                    scan_started += scan.scan_next(
                        &txn,
                        &mut self.ctx,
                        delsys_type,
                        None,
                        &self.must_end,
                        &mut effects.outbox,
                    )?;
                }
            }
            self.reap(&txn, scan_sid, scan_started > 0, &mut effects)?;
            started += scan_started;
        }
        txn.commit()?;
        Ok((started, effects))
    }

    /// End a session, releasing its subscriptions and returning the records
    /// it claimed to idle.
    pub fn unsubscribe_scan(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
        scan_sid: SubscriptionId,
    ) -> Result<(), ScanError> {
        if !self.scans.contains_key(&scan_sid) {
            return Err(ScanError::UnknownScan(scan_sid));
        }
        self.transact(db, device, |s, db| s.teardown_txn(db, &[scan_sid]))?;
        Ok(())
    }

    /// End every session. Returns the number of sessions ended.
    pub fn unsubscribe_all(
        &mut self,
        db: &mut Database,
        device: &mut dyn DeviceControl,
    ) -> Result<usize, ScanError> {
        let scan_sids: Vec<SubscriptionId> = self.scans.keys().copied().collect();
        if scan_sids.is_empty() {
            return Ok(0);
        }
        self.transact(db, device, |s, db| s.teardown_txn(db, &scan_sids))
    }

    fn teardown_txn(
        &mut self,
        db: &mut Database,
        scan_sids: &[SubscriptionId],
    ) -> Result<(usize, Effects), ScanError> {
        let txn = db.write_txn()?;
        let mut effects = Effects::default();
        for scan_sid in scan_sids {
            if let Some(scan) = self.scans.get_mut(scan_sid) {
                scan.teardown(&txn, &self.ctx, &mut effects.outbox)?;
            }
        }
        txn.commit()?;

        for scan_sid in scan_sids {
            if let Some(scan) = self.scans.remove(scan_sid) {
                effects.reports.push(scan.report(true));
            }
        }
        Ok((scan_sids.len(), effects))
    }

    /// Return records claimed by sessions that no longer exist to idle.
    pub fn clean_stale_scan_status(&mut self, db: &mut Database) -> Result<usize, ScanError> {
        let txn = db.write_txn()?;
        let stale = |h: &ScanHeader| {
            h.scan_status.is_in_progress()
                && h.scan_id
                    .map_or(true, |owner| !claim_is_live(&self.ctx, &self.scans, &owner))
        };

        let mut cleaned = 0;
        for delsys_type in ALL_DELSYS {
            for mut mux in txn.list_muxes(delsys_type)? {
                if stale(mux.header()) {
                    mux.header_mut().release();
                    txn.put_mux(&mux)?;
                    cleaned += 1;
                }
            }
        }
        for mut sat in txn.list::<Satellite>()? {
            let mut changed = false;
            for bs in sat.band_scans.iter_mut().filter(|b| stale(&b.c)) {
                bs.c.release();
                changed = true;
                cleaned += 1;
            }
            if changed {
                txn.put_record(&sat)?;
            }
        }
        txn.commit()?;

        if cleaned > 0 {
            info!("Scanner: cleared {} stale scan claims", cleaned);
        }
        Ok(cleaned)
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("ctx", &self.ctx)
            .field("scans", &self.scans.len())
            .field("max_num_subscriptions", &self.max_num_subscriptions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TuneTarget;
    use crate::testutil::*;
    use rfshare_types::{DvbsMux, Frontend, ScanResult, ScanStatus};

    fn scanner() -> Scanner {
        Scanner::new(test_ctx(), TuneOptions::default(), 4)
    }

    fn sat(mux: DvbsMux) -> AnyMux {
        AnyMux::Sat(mux)
    }

    fn header(db: &mut Database, mux: &DvbsMux) -> ScanHeader {
        let txn = db.read_txn().unwrap();
        txn.find_by_key::<DvbsMux>(&mux.k).unwrap().unwrap().c
    }

    #[test]
    fn test_scan_runs_to_completion() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let mut device = RecordingDevice::default();
        let mut scanner = scanner();
        let mut reports = scanner.subscribe_reports();
        let mux = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);

        let scan_sid = scanner
            .add_muxes(&mut db, &mut device, &[sat(mux.clone())], None)
            .unwrap();
        assert!(scanner.is_our_scan(&ScanId::new(OWN_PID, scan_sid.0)));
        assert!(!scanner.is_our_scan(&ScanId::new(OTHER_PID, scan_sid.0)));
        let tunes = device.tunes();
        assert_eq!(tunes.len(), 1);
        let sid = tunes[0].subscribed.subscription_id;
        assert_eq!(header(&mut db, &mux).scan_status, ScanStatus::Active);
        assert!(!reports.try_recv().unwrap().finished);

        scanner
            .on_mux_end(
                &mut db,
                &mut device,
                &MuxScanReport {
                    subscription_id: sid,
                    delsys_type: DelsysType::Sat,
                    mux_key: mux.k,
                    result: ScanResult::Ok,
                },
            )
            .unwrap();
        assert_eq!(scanner.num_scans(), 0);
        assert_eq!(device.released(), vec![sid]);
        let h = header(&mut db, &mux);
        assert_eq!(h.scan_status, ScanStatus::Idle);
        assert_eq!(h.scan_result, ScanResult::Ok);

        let last = reports.try_recv().unwrap();
        assert!(last.finished);
        assert_eq!(last.stats.get(DelsysType::Sat).si, 1);

        let txn = db.read_txn().unwrap();
        assert!(!txn.get::<Frontend>(&ADAPTER_A0_FE).unwrap().sub.is_reserved());
    }

    #[test]
    fn test_one_scan_per_mux() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let mut device = RecordingDevice::default();
        let mut scanner = scanner();
        let mux = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);

        let scan_sid = scanner
            .add_muxes(&mut db, &mut device, &[sat(mux.clone())], None)
            .unwrap();
        let err = scanner
            .add_muxes(&mut db, &mut device, &[sat(mux.clone())], None)
            .unwrap_err();
        assert!(matches!(err, ScanError::NothingAdded));
        assert_eq!(scanner.num_scans(), 1);

        // Claims of another live process are respected, dead ones are not.
        let other = dvbs_mux(1920, 2, 11_538_000, Polarisation::V);
        let mut abandoned = dvbs_mux(1920, 3, 11_582_000, Polarisation::H);
        {
            let txn = db.write_txn().unwrap();
            let mut claimed = other.clone();
            claimed.c.claim(ScanId::new(OTHER_PID, 7));
            txn.put_record(&claimed).unwrap();
            abandoned.c.claim(ScanId::new(DEAD_PID, 7));
            txn.put_record(&abandoned).unwrap();
            txn.commit().unwrap();
        }
        let err = scanner
            .add_muxes(&mut db, &mut device, &[sat(other.clone())], None)
            .unwrap_err();
        assert!(matches!(err, ScanError::NothingAdded));
        assert_eq!(header(&mut db, &other).scan_id, Some(ScanId::new(OTHER_PID, 7)));

        scanner
            .add_muxes(&mut db, &mut device, &[sat(abandoned.clone())], Some(scan_sid))
            .unwrap();
        let hdr = header(&mut db, &abandoned);
        assert_eq!(hdr.scan_status, ScanStatus::Pending);
        assert_eq!(hdr.scan_id, Some(ScanId::new(OWN_PID, scan_sid.0)));
    }

    #[test]
    fn test_unknown_scan() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let mut device = RecordingDevice::default();
        let mut scanner = scanner();
        let mux = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);

        let err = scanner
            .add_muxes(&mut db, &mut device, &[sat(mux)], Some(SubscriptionId(77)))
            .unwrap_err();
        assert!(matches!(err, ScanError::UnknownScan(SubscriptionId(77))));
        let err = scanner
            .unsubscribe_scan(&mut db, &mut device, SubscriptionId(77))
            .unwrap_err();
        assert!(matches!(err, ScanError::UnknownScan(_)));
    }

    #[test]
    fn test_unsubscribe_scan() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let mut device = RecordingDevice::default();
        let mut scanner = scanner();
        let h = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);
        let v = dvbs_mux(1920, 2, 11_538_000, Polarisation::V);

        let scan_sid = scanner
            .add_muxes(&mut db, &mut device, &[sat(h.clone()), sat(v.clone())], None)
            .unwrap();
        assert_eq!(header(&mut db, &v).scan_status, ScanStatus::Pending);
        let sid = device.tunes()[0].subscribed.subscription_id;

        scanner.unsubscribe_scan(&mut db, &mut device, scan_sid).unwrap();
        assert_eq!(scanner.num_scans(), 0);
        assert_eq!(device.released(), vec![sid]);
        for mux in [&h, &v] {
            let hdr = header(&mut db, mux);
            assert_eq!(hdr.scan_status, ScanStatus::Idle);
            assert_eq!(hdr.scan_id, None);
        }
        let txn = db.read_txn().unwrap();
        assert!(!txn.get::<Frontend>(&ADAPTER_A0_FE).unwrap().sub.is_reserved());
    }

    #[test]
    fn test_cancel_tears_down() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let mut device = RecordingDevice::default();
        let mut scanner = scanner();
        let h = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);
        let v = dvbs_mux(1920, 2, 11_538_000, Polarisation::V);
        scanner
            .add_muxes(&mut db, &mut device, &[sat(h.clone()), sat(v.clone())], None)
            .unwrap();

        let cancel = scanner.cancel_handle();
        cancel.store(true, Ordering::Relaxed);
        let err = scanner.housekeeping(&mut db, &mut device).unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
        assert_eq!(scanner.num_scans(), 0);
        assert!(!cancel.load(Ordering::Relaxed));
        assert_eq!(header(&mut db, &h).scan_status, ScanStatus::Idle);
        assert_eq!(header(&mut db, &v).scan_status, ScanStatus::Idle);
        assert_eq!(device.released().len(), 1);
    }

    #[test]
    fn test_band_scan_feeds_peaks() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let mut device = RecordingDevice::default();
        let mut scanner = scanner();

        let band = BandSpec {
            sat_pos: 1920,
            pol: Polarisation::V,
            band: SubBand::High,
        };
        let missing = BandSpec {
            sat_pos: 2820,
            ..band
        };
        scanner
            .add_bands(&mut db, &mut device, &[band, missing], None)
            .unwrap();
        let req = device.tunes()[0].clone();
        assert!(matches!(
            req.target,
            TuneTarget::Band {
                sat_pos: 1920,
                pol: Polarisation::V,
                band: SubBand::High,
                ..
            }
        ));
        assert!(req.subscribed.send_lnb_commands);

        scanner
            .on_band_scan_end(
                &mut db,
                &mut device,
                &BandScanReport {
                    subscription_id: req.subscribed.subscription_id,
                    sat_pos: 1920,
                    pol: Polarisation::V,
                    band: SubBand::High,
                    ok: true,
                    peaks: vec![SpectralPeak {
                        frequency: 12_188_000,
                        symbol_rate: 27_500_000,
                        snr: 11.0,
                        pol: Polarisation::V,
                    }],
                },
            )
            .unwrap();
        let tunes = device.tunes();
        assert_eq!(tunes.len(), 2);
        assert!(tunes[1].use_blind_tune);
        assert_eq!(
            tunes[1].subscribed.subscription_id,
            req.subscribed.subscription_id
        );
        assert_eq!(scanner.num_scans(), 1);
    }

    #[test]
    fn test_failed_step_keeps_reservation_owned() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let mut device = RecordingDevice::default();
        let mut scanner = scanner();
        let band = BandSpec {
            sat_pos: 1920,
            pol: Polarisation::V,
            band: SubBand::High,
        };
        let scan_sid = scanner.add_bands(&mut db, &mut device, &[band], None).unwrap();
        let sid = device.tunes()[0].subscribed.subscription_id;

        // The satellite disappears while its band is being acquired.
        {
            let txn = db.write_txn().unwrap();
            assert!(txn.delete_record::<Satellite>(&1920).unwrap());
            txn.commit().unwrap();
        }
        let err = scanner
            .on_band_scan_end(
                &mut db,
                &mut device,
                &BandScanReport {
                    subscription_id: sid,
                    sat_pos: 1920,
                    pol: Polarisation::V,
                    band: SubBand::High,
                    ok: false,
                    peaks: Vec::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ScanError::Database(crate::database::DatabaseError::NotFound(_))
        ));
        assert!(scanner.scan(scan_sid).unwrap().owns(sid));
        assert!(device.released().is_empty());
        {
            let txn = db.read_txn().unwrap();
            let fe = txn.get::<Frontend>(&ADAPTER_A0_FE).unwrap();
            assert!(fe.sub.entry(sid).is_some());
        }

        assert_eq!(scanner.unsubscribe_all(&mut db, &mut device).unwrap(), 1);
        assert_eq!(device.released(), vec![sid]);
        let txn = db.read_txn().unwrap();
        assert!(!txn.get::<Frontend>(&ADAPTER_A0_FE).unwrap().sub.is_reserved());
    }

    #[test]
    fn test_clean_stale_scan_status() {
        let mut db = Database::open_in_memory().unwrap();
        let mut scanner = scanner();
        let claims = [
            ScanId::new(DEAD_PID, 1),
            ScanId::new(OWN_PID, 42),
            ScanId::new(OTHER_PID, 3),
        ];
        {
            let txn = db.write_txn().unwrap();
            for (i, claim) in claims.iter().enumerate() {
                let frequency = 11_000_000 + i as u32 * 50_000;
                let mut mux = dvbs_mux(1920, i as u16 + 1, frequency, Polarisation::H);
                mux.c.claim(*claim);
                txn.put_record(&mux).unwrap();
            }
            txn.commit().unwrap();
        }

        assert_eq!(scanner.clean_stale_scan_status(&mut db).unwrap(), 2);
        let txn = db.read_txn().unwrap();
        let muxes = txn.list::<DvbsMux>().unwrap();
        assert_eq!(muxes[0].c.scan_status, ScanStatus::Idle);
        assert_eq!(muxes[1].c.scan_status, ScanStatus::Idle);
        assert_eq!(muxes[2].c.scan_id, Some(ScanId::new(OTHER_PID, 3)));
    }
}
