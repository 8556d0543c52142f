//! One scan session.
//!
//! A [`Scan`] drives the muxes, bands and spectral peaks claimed under one
//! [`ScanId`]. Work items stay in the database with a `Pending`/`Retry`
//! header until the session obtains resources for them; peaks only live in
//! memory. All methods run inside the caller's write transaction and queue
//! device commands in an outbox that is flushed after commit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use rfshare_types::{
    AnyMux, DelsysType, DvbsMux, MuxKey, Polarisation, Satellite, ScanHeader, ScanId, ScanResult,
    ScanStatus, SubBand, SubscriptionId,
};

use super::blindscan::{Blindscan, BlindscanKey, PendingPeak, SpectralPeak};
use super::device::{BandScanReport, DeviceCommand, MuxScanReport, TuneRequest, TuneTarget};
use super::stats::{ScanReport, ScanStats};
use super::ScanError;
use crate::database::Txn;
use crate::tuner::subscription::release_entry;
use crate::tuner::{
    subscribe_any_mux, subscribe_mux, subscribe_sat_band, AllocContext, ReservationOutcome,
    Subscribed, SubscriptionType, TuneOptions,
};

/// How often a mux or peak is retried after a temporary failure.
const MAX_TEMPFAIL_RETRIES: u8 = 1;

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// What a scan subscription is tuned to.
#[derive(Debug, Clone, PartialEq)]
enum ScanTarget {
    Mux(AnyMux),
    Peak {
        key: BlindscanKey,
        peak: PendingPeak,
    },
    Band {
        sat_pos: i16,
        pol: Polarisation,
        band: SubBand,
    },
}

impl ScanTarget {
    fn delsys_type(&self) -> DelsysType {
        match self {
            ScanTarget::Mux(mux) => mux.delsys_type(),
            ScanTarget::Peak { .. } | ScanTarget::Band { .. } => DelsysType::Sat,
        }
    }

    fn mux_key(&self) -> Option<MuxKey> {
        match self {
            ScanTarget::Mux(mux) => Some(*mux.key()),
            ScanTarget::Peak { peak, .. } => Some(peak.tuning_mux().k),
            ScanTarget::Band { .. } => None,
        }
    }
}

fn is_waiting(header: &ScanHeader, scan_id: &ScanId) -> bool {
    header.scan_id.as_ref() == Some(scan_id)
        && matches!(header.scan_status, ScanStatus::Pending | ScanStatus::Retry)
}

/// Update the header of one band of a satellite.
fn update_band(
    txn: &Txn<'_>,
    sat_pos: i16,
    pol: Polarisation,
    band: SubBand,
    f: impl FnOnce(&mut ScanHeader),
) -> Result<(), ScanError> {
    let mut sat = txn.get::<Satellite>(&sat_pos)?;
    f(&mut sat.band_scan_mut(pol, band).c);
    txn.put_record(&sat)?;
    Ok(())
}

/// Subscription id for the next attempt: the freed one if available.
fn take_sid(ctx: &mut AllocContext, reuse: &mut Option<SubscriptionId>) -> (SubscriptionId, bool) {
    match reuse.take() {
        Some(sid) => (sid, true),
        None => (ctx.seq.next_subscription_id(), false),
    }
}

/// A scan session.
#[derive(Debug, Clone)]
pub struct Scan {
    scan_id: ScanId,
    options: TuneOptions,
    max_num_subscriptions: usize,
    blindscans: BTreeMap<BlindscanKey, Blindscan>,
    subscriptions: BTreeMap<SubscriptionId, ScanTarget>,
    mux_retries: BTreeMap<MuxKey, u8>,
    stats: ScanStats,
}

impl Scan {
    pub fn new(scan_id: ScanId, options: TuneOptions, max_num_subscriptions: usize) -> Self {
        Self {
            scan_id,
            options,
            max_num_subscriptions: max_num_subscriptions.max(1),
            blindscans: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            mux_retries: BTreeMap::new(),
            stats: ScanStats::default(),
        }
    }

    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn num_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn num_pending_peaks(&self) -> usize {
        self.blindscans.values().map(|b| b.peaks.len()).sum()
    }

    /// Whether `sid` is one of this session's subscriptions.
    pub fn owns(&self, sid: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&sid)
    }

    pub fn report(&self, finished: bool) -> ScanReport {
        ScanReport {
            scan_id: self.scan_id,
            stats: self.stats.clone(),
            finished,
        }
    }

    pub(crate) fn note_pending(&mut self, delsys_type: DelsysType, n: u32) {
        self.stats.add_pending(delsys_type, n);
    }

    fn at_capacity(&self) -> bool {
        self.subscriptions.len() >= self.max_num_subscriptions
    }

    fn is_scanning_mux(&self, key: &MuxKey) -> bool {
        self.subscriptions
            .values()
            .any(|t| t.mux_key().as_ref() == Some(key))
    }

    /// Whether an item that got no resources should stay queued.
    ///
    /// Contention only counts as transient while the session itself holds
    /// other subscriptions which will eventually free up.
    fn keep_waiting(&self, outcome: &ReservationOutcome) -> bool {
        matches!(outcome, ReservationOutcome::Contended) && !self.subscriptions.is_empty()
    }

    fn start(
        &mut self,
        subscribed: Subscribed,
        target: ScanTarget,
        tune: TuneTarget,
        use_blind_tune: bool,
        outbox: &mut Vec<DeviceCommand>,
    ) {
        debug!(
            "Scan {}: subscription {} started on {} ({:?})",
            self.scan_id, subscribed.subscription_id, subscribed.fe_key, subscribed.change
        );
        self.subscriptions.insert(subscribed.subscription_id, target);
        outbox.push(DeviceCommand::Tune(TuneRequest {
            subscribed,
            target: tune,
            use_blind_tune,
        }));
    }

    /// Whether anything is left to do.
    pub fn has_work(&self, txn: &Txn<'_>) -> Result<bool, ScanError> {
        if !self.subscriptions.is_empty() || self.num_pending_peaks() > 0 {
            return Ok(true);
        }
        for delsys_type in [DelsysType::Sat, DelsysType::Cable, DelsysType::Terrestrial] {
            if txn
                .list_muxes(delsys_type)?
                .iter()
                .any(|m| is_waiting(m.header(), &self.scan_id))
            {
                return Ok(true);
            }
        }
        Ok(txn
            .list::<Satellite>()?
            .iter()
            .flat_map(|s| s.band_scans.iter())
            .any(|b| is_waiting(&b.c, &self.scan_id)))
    }

    /// Start as many queued items of `delsys_type` as resources allow.
    ///
    /// `reuse_sid` is a subscription id that just finished; it is used for
    /// at most one new attempt and released if unused. Returns the number of
    /// subscriptions started.
    pub fn scan_next(
        &mut self,
        txn: &Txn<'_>,
        ctx: &mut AllocContext,
        delsys_type: DelsysType,
        reuse_sid: Option<SubscriptionId>,
        must_end: &AtomicBool,
        outbox: &mut Vec<DeviceCommand>,
    ) -> Result<usize, ScanError> {
        if must_end.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }
        let mut reuse = reuse_sid;
        let mut started = 0;

        if delsys_type == DelsysType::Sat {
            let keys: Vec<BlindscanKey> = self.blindscans.keys().copied().collect();
            for key in keys {
                if must_end.load(Ordering::Relaxed) {
                    return Err(ScanError::Cancelled);
                }
                if self.at_capacity() {
                    break;
                }
                let Some(peak) = self
                    .blindscans
                    .get_mut(&key)
                    .and_then(|b| b.peaks.pop_front())
                else {
                    continue;
                };
                if self.scan_try_peak(txn, ctx, &mut reuse, key, peak, outbox)? {
                    started += 1;
                }
            }
            self.blindscans.retain(|_, b| !b.peaks.is_empty());
        }

        for mux in txn.list_muxes(delsys_type)? {
            if must_end.load(Ordering::Relaxed) {
                return Err(ScanError::Cancelled);
            }
            if self.at_capacity() {
                break;
            }
            if !is_waiting(mux.header(), &self.scan_id) || self.is_scanning_mux(mux.key()) {
                continue;
            }
            if self.scan_try_mux(txn, ctx, &mut reuse, mux, outbox)? {
                started += 1;
            }
        }

        if delsys_type == DelsysType::Sat {
            for sat in txn.list::<Satellite>()? {
                for bs in &sat.band_scans {
                    if must_end.load(Ordering::Relaxed) {
                        return Err(ScanError::Cancelled);
                    }
                    if self.at_capacity() {
                        break;
                    }
                    if !is_waiting(&bs.c, &self.scan_id) {
                        continue;
                    }
                    if self.scan_try_band(txn, ctx, &mut reuse, sat.sat_pos, bs.pol, bs.band, outbox)?
                    {
                        started += 1;
                    }
                }
            }
        }

        if let Some(sid) = reuse {
            release_entry(txn, ctx, sid)?;
            outbox.push(DeviceCommand::Release(sid));
        }
        if started > 0 {
            debug!(
                "Scan {}: started {} {} subscriptions ({} active)",
                self.scan_id,
                started,
                delsys_type.name(),
                self.subscriptions.len()
            );
        }
        Ok(started)
    }

    /// Try to start scanning a database mux claimed by this session.
    pub fn scan_try_mux(
        &mut self,
        txn: &Txn<'_>,
        ctx: &mut AllocContext,
        reuse: &mut Option<SubscriptionId>,
        mut mux: AnyMux,
        outbox: &mut Vec<DeviceCommand>,
    ) -> Result<bool, ScanError> {
        let delsys_type = mux.delsys_type();
        let (sid, reused) = take_sid(ctx, reuse);
        let options = self.options.for_scan(SubscriptionType::MuxScan);

        match subscribe_any_mux(txn, ctx, Some(sid), &mux, None, &options)? {
            ReservationOutcome::Granted(subscribed) => {
                let header = mux.header_mut();
                header.scan_status = ScanStatus::Active;
                header.scan_id = Some(self.scan_id);
                txn.put_mux(&mux)?;
                self.stats.started(delsys_type);
                let tune = TuneTarget::Mux(mux.clone());
                self.start(subscribed, ScanTarget::Mux(mux), tune, options.use_blind_tune, outbox);
                Ok(true)
            }
            outcome => {
                if reused {
                    *reuse = Some(sid);
                }
                if self.keep_waiting(&outcome) {
                    debug!("Scan {}: mux {} waits for resources", self.scan_id, mux.key());
                } else {
                    info!(
                        "Scan {}: no resources can ever scan mux {} ({:?})",
                        self.scan_id,
                        mux.key(),
                        outcome
                    );
                    mux.header_mut().finish(ScanResult::Bad, now());
                    txn.put_mux(&mux)?;
                    self.mux_retries.remove(mux.key());
                    self.stats.abandoned(delsys_type);
                }
                Ok(false)
            }
        }
    }

    /// Try to start tuning a spectral peak.
    pub fn scan_try_peak(
        &mut self,
        txn: &Txn<'_>,
        ctx: &mut AllocContext,
        reuse: &mut Option<SubscriptionId>,
        key: BlindscanKey,
        peak: PendingPeak,
        outbox: &mut Vec<DeviceCommand>,
    ) -> Result<bool, ScanError> {
        let mux = peak.tuning_mux();
        let db_mux = match &peak.db_mux {
            Some(m) => txn.find_by_key::<DvbsMux>(&m.k)?,
            None => None,
        };
        let ours = db_mux
            .as_ref()
            .map_or(false, |m| m.c.is_claimed_by(&self.scan_id));
        let claimed_elsewhere = db_mux
            .as_ref()
            .map_or(false, |m| m.c.scan_status.is_in_progress() && !ours);
        if self.is_scanning_mux(&mux.k) || claimed_elsewhere {
            debug!(
                "Scan {}: peak {} kHz already being scanned",
                self.scan_id, peak.peak.frequency
            );
            if !ours {
                self.stats.drop_pending(DelsysType::Sat);
            }
            return Ok(false);
        }

        let (sid, reused) = take_sid(ctx, reuse);
        let mut options = self.options.for_scan(SubscriptionType::MuxScan);
        options.use_blind_tune |= peak.is_peak_scan;

        match subscribe_mux(txn, ctx, Some(sid), &mux, None, &options)? {
            ReservationOutcome::Granted(subscribed) => {
                if let Some(mut m) = db_mux {
                    m.c.scan_status = ScanStatus::Active;
                    m.c.scan_id = Some(self.scan_id);
                    txn.put_record(&m)?;
                }
                self.stats.started(DelsysType::Sat);
                let tune = TuneTarget::Mux(AnyMux::Sat(mux));
                self.start(
                    subscribed,
                    ScanTarget::Peak { key, peak },
                    tune,
                    options.use_blind_tune,
                    outbox,
                );
                Ok(true)
            }
            outcome => {
                if reused {
                    *reuse = Some(sid);
                }
                if self.keep_waiting(&outcome) {
                    self.blindscans.entry(key).or_default().peaks.push_front(peak);
                } else {
                    info!(
                        "Scan {}: dropping peak {} kHz {} ({:?})",
                        self.scan_id, peak.peak.frequency, peak.peak.pol, outcome
                    );
                    if let Some(mut m) = db_mux.filter(|_| ours) {
                        m.c.finish(ScanResult::Bad, now());
                        txn.put_record(&m)?;
                    }
                    self.stats.abandoned(DelsysType::Sat);
                }
                Ok(false)
            }
        }
    }

    /// Try to start a spectrum acquisition of one band.
    #[allow(clippy::too_many_arguments)]
    pub fn scan_try_band(
        &mut self,
        txn: &Txn<'_>,
        ctx: &mut AllocContext,
        reuse: &mut Option<SubscriptionId>,
        sat_pos: i16,
        pol: Polarisation,
        band: SubBand,
        outbox: &mut Vec<DeviceCommand>,
    ) -> Result<bool, ScanError> {
        let (sid, reused) = take_sid(ctx, reuse);
        let options = self.options.for_scan(SubscriptionType::BandScan);
        let scan_id = self.scan_id;

        match subscribe_sat_band(txn, ctx, Some(sid), sat_pos, pol, band, &options)? {
            ReservationOutcome::Granted(subscribed) => {
                update_band(txn, sat_pos, pol, band, |h| {
                    h.scan_status = ScanStatus::Active;
                    h.scan_id = Some(scan_id);
                })?;
                self.stats.started(DelsysType::Sat);
                let tune = TuneTarget::Band {
                    sat_pos,
                    pol,
                    band,
                    start_freq: options.spectrum_start_freq,
                    end_freq: options.spectrum_end_freq,
                };
                self.start(
                    subscribed,
                    ScanTarget::Band { sat_pos, pol, band },
                    tune,
                    options.use_blind_tune,
                    outbox,
                );
                Ok(true)
            }
            outcome => {
                if reused {
                    *reuse = Some(sid);
                }
                if !self.keep_waiting(&outcome) {
                    info!(
                        "Scan {}: no resources can ever scan {} {} {:?} ({:?})",
                        self.scan_id, sat_pos, pol, band, outcome
                    );
                    update_band(txn, sat_pos, pol, band, |h| h.finish(ScanResult::Bad, now()))?;
                    self.stats.abandoned(DelsysType::Sat);
                }
                Ok(false)
            }
        }
    }

    /// Queue a peak again with blind tuning parameters.
    pub fn rescan_peak(&mut self, key: BlindscanKey, mut peak: PendingPeak) {
        debug!(
            "Scan {}: rescanning peak {} kHz blind",
            self.scan_id, peak.peak.frequency
        );
        peak.is_peak_scan = true;
        self.blindscans.entry(key).or_default().peaks.push_front(peak);
        self.stats.requeued(DelsysType::Sat);
    }

    /// Decide whether a finished tuning gets another attempt.
    ///
    /// Returns true if the item was queued again. Otherwise the database
    /// record (if any) is returned to idle with `result`.
    fn retry_subscription_if_needed(
        &mut self,
        txn: &Txn<'_>,
        target: ScanTarget,
        result: ScanResult,
        now: i64,
    ) -> Result<bool, ScanError> {
        let others_active = !self.subscriptions.is_empty();
        match target {
            ScanTarget::Mux(mux) => {
                let delsys_type = mux.delsys_type();
                let Some(mut rec) = txn.find_mux(delsys_type, mux.key())? else {
                    return Ok(false);
                };
                if !rec.header().is_claimed_by(&self.scan_id) {
                    return Ok(false);
                }
                let retries = self.mux_retries.entry(*mux.key()).or_insert(0);
                if result == ScanResult::TempFail && others_active && *retries < MAX_TEMPFAIL_RETRIES
                {
                    *retries += 1;
                    rec.header_mut().scan_status = ScanStatus::Retry;
                    txn.put_mux(&rec)?;
                    self.stats.requeued(delsys_type);
                    debug!("Scan {}: mux {} will be retried", self.scan_id, mux.key());
                    return Ok(true);
                }
                self.mux_retries.remove(mux.key());
                rec.header_mut().finish(result, now);
                txn.put_mux(&rec)?;
                Ok(false)
            }
            ScanTarget::Peak { key, mut peak } => {
                if result == ScanResult::TempFail {
                    if peak.tempfail_retries < MAX_TEMPFAIL_RETRIES && others_active {
                        peak.tempfail_retries += 1;
                        self.blindscans.entry(key).or_default().peaks.push_back(peak);
                        self.stats.requeued(DelsysType::Sat);
                        return Ok(true);
                    }
                    if !peak.is_peak_scan {
                        self.rescan_peak(key, peak);
                        return Ok(true);
                    }
                } else if !result.is_locked() && !peak.is_peak_scan && peak.symbol_rate_mismatch() {
                    self.rescan_peak(key, peak);
                    return Ok(true);
                }
                if let Some(m) = &peak.db_mux {
                    if let Some(mut rec) = txn.find_by_key::<DvbsMux>(&m.k)? {
                        if rec.c.is_claimed_by(&self.scan_id) {
                            rec.c.finish(result, now);
                            txn.put_record(&rec)?;
                        }
                    }
                }
                Ok(false)
            }
            ScanTarget::Band { sat_pos, pol, band } => {
                let scan_id = self.scan_id;
                update_band(txn, sat_pos, pol, band, |h| {
                    if h.is_claimed_by(&scan_id) {
                        h.finish(result, now);
                    }
                })?;
                Ok(false)
            }
        }
    }

    /// A mux (or peak) tuning of this session finished.
    pub fn on_scan_mux_end(
        &mut self,
        txn: &Txn<'_>,
        ctx: &mut AllocContext,
        report: &MuxScanReport,
        must_end: &AtomicBool,
        outbox: &mut Vec<DeviceCommand>,
    ) -> Result<usize, ScanError> {
        let sid = report.subscription_id;
        let Some(target) = self.subscriptions.remove(&sid) else {
            warn!("Scan {}: unknown subscription {} ended", self.scan_id, sid);
            return Ok(0);
        };
        debug!(
            "Scan {}: subscription {} finished {} with {:?}",
            self.scan_id, sid, report.mux_key, report.result
        );
        let delsys_type = target.delsys_type();
        if !self.retry_subscription_if_needed(txn, target, report.result, now())? {
            self.stats.finished(delsys_type, report.result);
        }
        self.scan_next(txn, ctx, delsys_type, Some(sid), must_end, outbox)
    }

    /// A spectrum acquisition of this session finished.
    pub fn on_spectrum_scan_band_end(
        &mut self,
        txn: &Txn<'_>,
        ctx: &mut AllocContext,
        report: &BandScanReport,
        must_end: &AtomicBool,
        outbox: &mut Vec<DeviceCommand>,
    ) -> Result<usize, ScanError> {
        let sid = report.subscription_id;
        let Some(target) = self.subscriptions.remove(&sid) else {
            warn!("Scan {}: unknown subscription {} ended", self.scan_id, sid);
            return Ok(0);
        };
        let result = if report.ok {
            ScanResult::Ok
        } else {
            ScanResult::NoLock
        };
        let now = now();
        self.retry_subscription_if_needed(txn, target, result, now)?;
        self.stats.finished(DelsysType::Sat, result);
        if report.ok {
            self.add_spectral_peaks(txn, report.sat_pos, report.band, &report.peaks, now)?;
        }
        self.scan_next(txn, ctx, DelsysType::Sat, Some(sid), must_end, outbox)
    }

    /// Queue peaks found in a spectrum of `sat_pos`/`band`.
    pub fn add_spectral_peaks(
        &mut self,
        txn: &Txn<'_>,
        sat_pos: i16,
        band: SubBand,
        peaks: &[SpectralPeak],
        now: i64,
    ) -> Result<usize, ScanError> {
        let db_muxes = txn.list_where::<DvbsMux>(|m| m.k.sat_pos == sat_pos)?;
        let mut added = 0;
        for peak in peaks {
            let key = BlindscanKey {
                sat_pos,
                band,
                pol: peak.pol,
            };
            let blindscan = self.blindscans.entry(key).or_default();
            blindscan.spectrum_time = Some(now);
            if blindscan.peaks.iter().any(|p| {
                p.peak.frequency.abs_diff(peak.frequency) <= peak.tolerance_khz()
            }) {
                continue;
            }
            let db_mux = db_muxes
                .iter()
                .filter(|m| peak.matches(m))
                .min_by_key(|m| m.frequency.abs_diff(peak.frequency))
                .cloned();
            if !db_mux
                .as_ref()
                .map_or(false, |m| m.c.is_claimed_by(&self.scan_id))
            {
                self.stats.add_pending(DelsysType::Sat, 1);
            }
            blindscan
                .peaks
                .push_back(PendingPeak::new(sat_pos, *peak, db_mux));
            added += 1;
        }
        info!(
            "Scan {}: {} new peaks on {} {:?}",
            self.scan_id, added, sat_pos, band
        );
        Ok(added)
    }

    /// Release every subscription and return claimed records to idle.
    ///
    /// Returns the released subscription ids.
    pub fn teardown(
        &mut self,
        txn: &Txn<'_>,
        ctx: &AllocContext,
        outbox: &mut Vec<DeviceCommand>,
    ) -> Result<Vec<SubscriptionId>, ScanError> {
        let sids: Vec<SubscriptionId> = self.subscriptions.keys().copied().collect();
        for sid in &sids {
            release_entry(txn, ctx, *sid)?;
            outbox.push(DeviceCommand::Release(*sid));
        }
        self.subscriptions.clear();
        self.blindscans.clear();
        self.mux_retries.clear();

        for delsys_type in [DelsysType::Sat, DelsysType::Cable, DelsysType::Terrestrial] {
            for mut mux in txn.list_muxes(delsys_type)? {
                if mux.header().is_claimed_by(&self.scan_id) {
                    mux.header_mut().release();
                    txn.put_mux(&mux)?;
                }
            }
        }
        for mut sat in txn.list::<Satellite>()? {
            let mut changed = false;
            for bs in sat
                .band_scans
                .iter_mut()
                .filter(|b| b.c.is_claimed_by(&self.scan_id))
            {
                bs.c.release();
                changed = true;
            }
            if changed {
                txn.put_record(&sat)?;
            }
        }
        info!(
            "Scan {}: torn down ({} subscriptions released)",
            self.scan_id,
            sids.len()
        );
        Ok(sids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::testutil::*;
    use rfshare_types::{FeSubscription, Frontend, RfPath};

    const SCAN_SID: u32 = 500;

    fn scan_id() -> ScanId {
        ScanId::new(OWN_PID, SCAN_SID)
    }

    fn new_scan() -> Scan {
        Scan::new(scan_id(), TuneOptions::default(), 8)
    }

    fn claim(db: &mut Database, mut mux: DvbsMux) -> DvbsMux {
        mux.c.claim(scan_id());
        let txn = db.write_txn().unwrap();
        txn.put_record(&mux).unwrap();
        txn.commit().unwrap();
        mux
    }

    fn header(db: &mut Database, key: &MuxKey) -> ScanHeader {
        let txn = db.read_txn().unwrap();
        txn.find_by_key::<DvbsMux>(key).unwrap().unwrap().c
    }

    fn tunes(outbox: &[DeviceCommand]) -> Vec<&TuneRequest> {
        outbox
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Tune(req) => Some(req),
                DeviceCommand::Release(_) => None,
            })
            .collect()
    }

    /// Tune target of a claimed mux once it is being scanned.
    fn active(mux: &DvbsMux) -> TuneTarget {
        let mut mux = mux.clone();
        mux.c.scan_status = ScanStatus::Active;
        TuneTarget::Mux(AnyMux::Sat(mux))
    }

    fn mux_end(sid: SubscriptionId, mux: &DvbsMux, result: ScanResult) -> MuxScanReport {
        MuxScanReport {
            subscription_id: sid,
            delsys_type: DelsysType::Sat,
            mux_key: mux.k,
            result,
        }
    }

    #[test]
    fn test_contended_mux_stays_pending() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let h = claim(&mut db, dvbs_mux(1920, 1, 11_494_000, Polarisation::H));
        let v = claim(&mut db, dvbs_mux(1920, 2, 11_538_000, Polarisation::V));
        let mut ctx = test_ctx();
        let mut scan = new_scan();
        let must_end = AtomicBool::new(false);
        let mut outbox = Vec::new();

        let txn = db.write_txn().unwrap();
        let started = scan
            .scan_next(&txn, &mut ctx, DelsysType::Sat, None, &must_end, &mut outbox)
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 1);
        assert_eq!(header(&mut db, &h.k).scan_status, ScanStatus::Active);
        assert_eq!(header(&mut db, &v.k).scan_status, ScanStatus::Pending);
        assert_eq!(header(&mut db, &v.k).scan_id, Some(scan_id()));

        let sid = tunes(&outbox)[0].subscribed.subscription_id;
        outbox.clear();
        let txn = db.write_txn().unwrap();
        let started = scan
            .on_scan_mux_end(
                &txn,
                &mut ctx,
                &mux_end(sid, &h, ScanResult::Ok),
                &must_end,
                &mut outbox,
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 1);

        let done = header(&mut db, &h.k);
        assert_eq!(done.scan_status, ScanStatus::Idle);
        assert_eq!(done.scan_result, ScanResult::Ok);
        assert_eq!(header(&mut db, &v.k).scan_status, ScanStatus::Active);

        let reqs = tunes(&outbox);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].subscribed.subscription_id, sid);
        assert_eq!(reqs[0].target, active(&v));
        assert!(!outbox.contains(&DeviceCommand::Release(sid)));
        assert_eq!(scan.stats().get(DelsysType::Sat).finished, 1);
    }

    #[test]
    fn test_contended_alone_is_bad() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        {
            let txn = db.write_txn().unwrap();
            let mut fe = txn.get::<Frontend>(&ADAPTER_A0_FE).unwrap();
            fe.sub = FeSubscription {
                owner: OTHER_PID,
                config_id: 1,
                delsys_type: Some(DelsysType::Sat),
                rf_path: Some(RfPath::new(LNB_1, CARD_A, 0)),
                subs: vec![entry(SubscriptionId(99))],
                ..Default::default()
            };
            txn.put_record(&fe).unwrap();
            txn.commit().unwrap();
        }
        let busy = claim(&mut db, dvbs_mux(1920, 1, 11_494_000, Polarisation::H));
        let nowhere = claim(&mut db, dvbs_mux(2820, 1, 11_494_000, Polarisation::H));
        let mut ctx = test_ctx();
        let mut scan = new_scan();
        let mut outbox = Vec::new();

        let txn = db.write_txn().unwrap();
        let started = scan
            .scan_next(
                &txn,
                &mut ctx,
                DelsysType::Sat,
                None,
                &AtomicBool::new(false),
                &mut outbox,
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 0);
        assert!(outbox.is_empty());
        for key in [busy.k, nowhere.k] {
            let h = header(&mut db, &key);
            assert_eq!(h.scan_status, ScanStatus::Idle);
            assert_eq!(h.scan_result, ScanResult::Bad);
            assert_eq!(h.scan_id, None);
        }
        assert_eq!(scan.stats().get(DelsysType::Sat).failed, 2);
    }

    #[test]
    fn test_tempfail_retried_once() {
        let mut db = Database::open_in_memory().unwrap();
        seed_two_cards(&mut db);
        let m1 = claim(&mut db, dvbs_mux(1920, 1, 11_494_000, Polarisation::H));
        let _m2 = claim(&mut db, dvbs_mux(1920, 2, 11_538_000, Polarisation::H));
        let mut ctx = test_ctx();
        let mut scan = new_scan();
        let must_end = AtomicBool::new(false);
        let mut outbox = Vec::new();

        let txn = db.write_txn().unwrap();
        assert_eq!(
            scan.scan_next(&txn, &mut ctx, DelsysType::Sat, None, &must_end, &mut outbox)
                .unwrap(),
            2
        );
        txn.commit().unwrap();
        let sid = tunes(&outbox)
            .iter()
            .find(|r| r.target == active(&m1))
            .map(|r| r.subscribed.subscription_id)
            .unwrap();

        // First temporary failure: retried while the other subscription runs.
        outbox.clear();
        let txn = db.write_txn().unwrap();
        let started = scan
            .on_scan_mux_end(
                &txn,
                &mut ctx,
                &mux_end(sid, &m1, ScanResult::TempFail),
                &must_end,
                &mut outbox,
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 1);
        assert_eq!(header(&mut db, &m1.k).scan_status, ScanStatus::Active);
        assert_eq!(tunes(&outbox)[0].subscribed.subscription_id, sid);

        // Second one: given up.
        outbox.clear();
        let txn = db.write_txn().unwrap();
        let started = scan
            .on_scan_mux_end(
                &txn,
                &mut ctx,
                &mux_end(sid, &m1, ScanResult::TempFail),
                &must_end,
                &mut outbox,
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 0);
        let h = header(&mut db, &m1.k);
        assert_eq!(h.scan_status, ScanStatus::Idle);
        assert_eq!(h.scan_result, ScanResult::TempFail);
        assert_eq!(outbox, vec![DeviceCommand::Release(sid)]);
        assert_eq!(scan.num_subscriptions(), 1);
    }

    #[test]
    fn test_peak_tempfail_retried_then_blind() {
        let mut db = Database::open_in_memory().unwrap();
        seed_two_cards(&mut db);
        let m1 = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);
        {
            let txn = db.write_txn().unwrap();
            txn.put_record(&m1).unwrap();
            txn.commit().unwrap();
        }
        let other = claim(&mut db, dvbs_mux(1920, 2, 11_538_000, Polarisation::H));
        let mut ctx = test_ctx();
        let mut scan = new_scan();
        let must_end = AtomicBool::new(false);
        let mut outbox = Vec::new();

        let peak = SpectralPeak {
            frequency: 11_495_000,
            symbol_rate: 27_500_000,
            snr: 9.0,
            pol: Polarisation::H,
        };
        let txn = db.write_txn().unwrap();
        assert_eq!(
            scan.add_spectral_peaks(&txn, 1920, SubBand::Low, &[peak], now())
                .unwrap(),
            1
        );
        assert_eq!(
            scan.scan_next(&txn, &mut ctx, DelsysType::Sat, None, &must_end, &mut outbox)
                .unwrap(),
            2
        );
        txn.commit().unwrap();
        assert_eq!(header(&mut db, &other.k).scan_status, ScanStatus::Active);
        let peak_req = tunes(&outbox)
            .into_iter()
            .find(|r| matches!(&r.target, TuneTarget::Mux(AnyMux::Sat(m)) if m.k == m1.k))
            .cloned()
            .unwrap();
        assert!(!peak_req.use_blind_tune);
        let sid = peak_req.subscribed.subscription_id;

        // First temporary failure: requeued with the stored parameters.
        outbox.clear();
        let txn = db.write_txn().unwrap();
        let started = scan
            .on_scan_mux_end(
                &txn,
                &mut ctx,
                &mux_end(sid, &m1, ScanResult::TempFail),
                &must_end,
                &mut outbox,
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 1);
        let retry = tunes(&outbox)[0].clone();
        assert_eq!(retry.subscribed.subscription_id, sid);
        assert!(!retry.use_blind_tune);
        assert_eq!(scan.stats().get(DelsysType::Sat).finished, 0);

        // Second one: the retry budget is spent, tuned blind instead.
        outbox.clear();
        let txn = db.write_txn().unwrap();
        let started = scan
            .on_scan_mux_end(
                &txn,
                &mut ctx,
                &mux_end(sid, &m1, ScanResult::TempFail),
                &must_end,
                &mut outbox,
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 1);
        let blind = tunes(&outbox)[0].clone();
        assert_eq!(blind.subscribed.subscription_id, sid);
        assert!(blind.use_blind_tune);
        match &blind.target {
            TuneTarget::Mux(AnyMux::Sat(m)) => {
                assert_eq!(m.k, m1.k);
                assert_eq!(m.frequency, 11_495_000);
            }
            target => panic!("unexpected target {:?}", target),
        }

        // A blind attempt is not retried again.
        outbox.clear();
        let txn = db.write_txn().unwrap();
        let started = scan
            .on_scan_mux_end(
                &txn,
                &mut ctx,
                &mux_end(sid, &m1, ScanResult::TempFail),
                &must_end,
                &mut outbox,
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(started, 0);
        assert_eq!(outbox, vec![DeviceCommand::Release(sid)]);
        let h = header(&mut db, &m1.k);
        assert_eq!(h.scan_status, ScanStatus::Idle);
        assert_eq!(h.scan_result, ScanResult::TempFail);
        assert_eq!(scan.num_pending_peaks(), 0);
        assert_eq!(scan.num_subscriptions(), 1);
    }

    #[test]
    fn test_band_scan_then_peaks() {
        let mut db = Database::open_in_memory().unwrap();
        seed_two_cards(&mut db);
        let m1 = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);
        {
            let txn = db.write_txn().unwrap();
            txn.put_record(&m1).unwrap();
            let mut sat = txn.get::<Satellite>(&1920).unwrap();
            sat.band_scan_mut(Polarisation::H, SubBand::Low)
                .c
                .claim(scan_id());
            txn.put_record(&sat).unwrap();
            txn.commit().unwrap();
        }
        let mut ctx = test_ctx();
        let mut scan = new_scan();
        let must_end = AtomicBool::new(false);
        let mut outbox = Vec::new();

        let txn = db.write_txn().unwrap();
        assert_eq!(
            scan.scan_next(&txn, &mut ctx, DelsysType::Sat, None, &must_end, &mut outbox)
                .unwrap(),
            1
        );
        txn.commit().unwrap();
        let band_req = tunes(&outbox)[0].clone();
        assert!(matches!(band_req.target, TuneTarget::Band { sat_pos: 1920, .. }));
        let band_sid = band_req.subscribed.subscription_id;

        let peak = |frequency, symbol_rate| SpectralPeak {
            frequency,
            symbol_rate,
            snr: 10.0,
            pol: Polarisation::H,
        };
        let report = BandScanReport {
            subscription_id: band_sid,
            sat_pos: 1920,
            pol: Polarisation::H,
            band: SubBand::Low,
            ok: true,
            peaks: vec![peak(11_495_000, 20_000_000), peak(11_200_000, 27_500_000)],
        };
        outbox.clear();
        let txn = db.write_txn().unwrap();
        // One peak per band and pass.
        assert_eq!(
            scan.on_spectrum_scan_band_end(&txn, &mut ctx, &report, &must_end, &mut outbox)
                .unwrap(),
            1
        );
        txn.commit().unwrap();
        assert_eq!(scan.num_pending_peaks(), 1);
        assert_eq!(header(&mut db, &m1.k).scan_status, ScanStatus::Active);
        {
            let txn = db.read_txn().unwrap();
            let sat = txn.get::<Satellite>(&1920).unwrap();
            let bs = sat.band_scan(Polarisation::H, SubBand::Low).unwrap();
            assert_eq!(bs.c.scan_status, ScanStatus::Idle);
            assert_eq!(bs.c.scan_result, ScanResult::Ok);
        }
        let first = tunes(&outbox)[0].clone();
        assert_eq!(first.subscribed.subscription_id, band_sid);
        assert!(!first.use_blind_tune);

        outbox.clear();
        let txn = db.write_txn().unwrap();
        assert_eq!(
            scan.scan_next(&txn, &mut ctx, DelsysType::Sat, None, &must_end, &mut outbox)
                .unwrap(),
            1
        );
        txn.commit().unwrap();
        assert_eq!(scan.num_pending_peaks(), 0);
        assert_eq!(scan.num_subscriptions(), 2);

        // Stored parameters did not lock and the spectrum disagrees: retry blind.
        outbox.clear();
        let txn = db.write_txn().unwrap();
        assert_eq!(
            scan.on_scan_mux_end(
                &txn,
                &mut ctx,
                &mux_end(band_sid, &m1, ScanResult::NoLock),
                &must_end,
                &mut outbox,
            )
            .unwrap(),
            1
        );
        txn.commit().unwrap();
        let blind = tunes(&outbox)[0].clone();
        assert!(blind.use_blind_tune);
        match &blind.target {
            TuneTarget::Mux(AnyMux::Sat(m)) => {
                assert_eq!(m.k, m1.k);
                assert_eq!(m.symbol_rate, 20_000_000);
            }
            other => panic!("unexpected target {:?}", other),
        }

        outbox.clear();
        let txn = db.write_txn().unwrap();
        scan.on_scan_mux_end(
            &txn,
            &mut ctx,
            &mux_end(band_sid, &m1, ScanResult::Ok),
            &must_end,
            &mut outbox,
        )
        .unwrap();
        txn.commit().unwrap();
        let h = header(&mut db, &m1.k);
        assert_eq!(h.scan_status, ScanStatus::Idle);
        assert_eq!(h.scan_result, ScanResult::Ok);
    }

    #[test]
    fn test_cancelled() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        claim(&mut db, dvbs_mux(1920, 1, 11_494_000, Polarisation::H));
        let mut ctx = test_ctx();
        let mut scan = new_scan();
        let mut outbox = Vec::new();

        let txn = db.write_txn().unwrap();
        let err = scan
            .scan_next(
                &txn,
                &mut ctx,
                DelsysType::Sat,
                None,
                &AtomicBool::new(true),
                &mut outbox,
            )
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_teardown() {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let h = claim(&mut db, dvbs_mux(1920, 1, 11_494_000, Polarisation::H));
        let v = claim(&mut db, dvbs_mux(1920, 2, 11_538_000, Polarisation::V));
        let mut ctx = test_ctx();
        let mut scan = new_scan();
        let mut outbox = Vec::new();

        let txn = db.write_txn().unwrap();
        scan.scan_next(
            &txn,
            &mut ctx,
            DelsysType::Sat,
            None,
            &AtomicBool::new(false),
            &mut outbox,
        )
        .unwrap();
        assert!(scan.has_work(&txn).unwrap());
        outbox.clear();
        let released = scan.teardown(&txn, &ctx, &mut outbox).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(outbox, vec![DeviceCommand::Release(released[0])]);
        assert!(!scan.has_work(&txn).unwrap());
        assert!(!txn.get::<Frontend>(&ADAPTER_A0_FE).unwrap().sub.is_reserved());
        txn.commit().unwrap();
        for key in [h.k, v.k] {
            let hdr = header(&mut db, &key);
            assert_eq!(hdr.scan_status, ScanStatus::Idle);
            assert_eq!(hdr.scan_id, None);
        }
    }
}
