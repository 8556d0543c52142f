//! Background scan service.
//!
//! The service is a tokio task owning the [`Database`], the [`Scanner`] and
//! the device boundary. It is the single serialising owner of all scan
//! state of this process:
//!
//! 1. Requests and device reports arrive as [`ScanEvent`]s over a channel
//! 2. Housekeeping runs on a fixed interval while the service is running
//! 3. On shutdown every session is ended and every reservation of this
//!    process is released

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

use rfshare_types::{AnyMux, SubscriptionId};

use super::device::{BandScanReport, DeviceControl, MuxScanReport};
use super::scanner::{BandSpec, Scanner};
use super::stats::ScanReport;
use super::ScanError;
use crate::database::Database;
use crate::tuner::{record_dish_position, release_all_subscriptions, release_dead_owner_reservations};

/// Scan service configuration.
#[derive(Debug, Clone)]
pub struct ScanServiceConfig {
    /// Interval between housekeeping runs (seconds).
    pub housekeeping_interval_secs: u64,
}

impl Default for ScanServiceConfig {
    fn default() -> Self {
        Self {
            housekeeping_interval_secs: 5,
        }
    }
}

/// Scan service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Housekeeping runs.
    Running,
    /// Events are handled but housekeeping is skipped.
    Paused,
    Stopped,
}

/// Input of the scan service.
#[derive(Debug)]
pub enum ScanEvent {
    AddMuxes {
        muxes: Vec<AnyMux>,
        scan_sid: Option<SubscriptionId>,
        reply: oneshot::Sender<Result<SubscriptionId, ScanError>>,
    },
    AddBands {
        bands: Vec<BandSpec>,
        scan_sid: Option<SubscriptionId>,
        reply: oneshot::Sender<Result<SubscriptionId, ScanError>>,
    },
    MuxEnd(MuxScanReport),
    BandEnd(BandScanReport),
    /// The positioner of a dish reached a position.
    DishMoved { dish_id: i32, usals_pos: i16 },
    Unsubscribe {
        scan_sid: SubscriptionId,
        reply: oneshot::Sender<Result<(), ScanError>>,
    },
    Pause,
    Resume,
    Shutdown,
}

/// The service task's state.
pub struct ScanService {
    db: Database,
    scanner: Scanner,
    device: Box<dyn DeviceControl + Send>,
    config: ScanServiceConfig,
    state: Arc<Mutex<SchedulerState>>,
}

impl ScanService {
    /// Start the service task.
    pub fn spawn(
        db: Database,
        scanner: Scanner,
        device: Box<dyn DeviceControl + Send>,
        config: ScanServiceConfig,
    ) -> ScanServiceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SchedulerState::Running));
        let cancel = scanner.cancel_handle();
        let reports = scanner.report_sender();

        let service = Self {
            db,
            scanner,
            device,
            config,
            state: Arc::clone(&state),
        };
        let join = tokio::spawn(service.run(rx));

        ScanServiceHandle {
            tx,
            state,
            cancel,
            reports,
            join,
        }
    }

    /// Run the service loop. Returns the database once stopped.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ScanEvent>) -> Database {
        info!(
            "ScanService: Starting with housekeeping interval {} seconds",
            self.config.housekeeping_interval_secs
        );
        self.startup();

        let mut housekeeping =
            interval(Duration::from_secs(self.config.housekeeping_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = housekeeping.tick() => {
                    if *self.state.lock().await != SchedulerState::Running {
                        debug!("ScanService: Paused, skipping housekeeping");
                        continue;
                    }
                    match self.scanner.housekeeping(&mut self.db, self.device.as_mut()) {
                        Ok(0) => {}
                        Ok(n) => debug!("ScanService: Housekeeping started {} subscriptions", n),
                        Err(e) => error!("ScanService: Housekeeping failed: {}", e),
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        info!("ScanService: All handles dropped");
                        break;
                    };
                    if !self.handle_event(event).await {
                        break;
                    }
                }
            }
        }

        self.stop().await;
        self.db
    }

    /// Clear what dead processes left behind.
    fn startup(&mut self) {
        let released = self.db.write_txn().and_then(|txn| {
            let n = release_dead_owner_reservations(&txn, self.scanner.ctx())?;
            txn.commit()?;
            Ok(n)
        });
        match released {
            Ok(0) => {}
            Ok(n) => info!("ScanService: Released {} reservations of dead processes", n),
            Err(e) => warn!("ScanService: Failed to release dead reservations: {}", e),
        }
        if let Err(e) = self.scanner.clean_stale_scan_status(&mut self.db) {
            warn!("ScanService: Failed to clean stale scan status: {}", e);
        }
    }

    /// Handle one event. Returns false when the service should stop.
    async fn handle_event(&mut self, event: ScanEvent) -> bool {
        let device = self.device.as_mut();
        match event {
            ScanEvent::AddMuxes {
                muxes,
                scan_sid,
                reply,
            } => {
                let result = self.scanner.add_muxes(&mut self.db, device, &muxes, scan_sid);
                let _ = reply.send(result);
            }
            ScanEvent::AddBands {
                bands,
                scan_sid,
                reply,
            } => {
                let result = self.scanner.add_bands(&mut self.db, device, &bands, scan_sid);
                let _ = reply.send(result);
            }
            ScanEvent::MuxEnd(report) => {
                if let Err(e) = self.scanner.on_mux_end(&mut self.db, device, &report) {
                    error!("ScanService: Mux end of {} failed: {}", report.subscription_id, e);
                }
            }
            ScanEvent::BandEnd(report) => {
                if let Err(e) = self.scanner.on_band_scan_end(&mut self.db, device, &report) {
                    error!("ScanService: Band end of {} failed: {}", report.subscription_id, e);
                }
            }
            ScanEvent::DishMoved { dish_id, usals_pos } => {
                let result = self.db.write_txn().and_then(|txn| {
                    record_dish_position(&txn, dish_id, usals_pos)?;
                    txn.commit()
                });
                if let Err(e) = result {
                    warn!("ScanService: Failed to record dish {} position: {}", dish_id, e);
                }
            }
            ScanEvent::Unsubscribe { scan_sid, reply } => {
                let result = self.scanner.unsubscribe_scan(&mut self.db, device, scan_sid);
                let _ = reply.send(result);
            }
            ScanEvent::Pause => {
                let mut state = self.state.lock().await;
                if *state == SchedulerState::Running {
                    *state = SchedulerState::Paused;
                    info!("ScanService: Paused");
                }
            }
            ScanEvent::Resume => {
                let mut state = self.state.lock().await;
                if *state == SchedulerState::Paused {
                    *state = SchedulerState::Running;
                    info!("ScanService: Resumed");
                }
            }
            ScanEvent::Shutdown => return false,
        }
        true
    }

    /// End every session and release everything this process holds.
    async fn stop(&mut self) {
        *self.state.lock().await = SchedulerState::Stopped;
        match self.scanner.unsubscribe_all(&mut self.db, self.device.as_mut()) {
            Ok(0) => {}
            Ok(n) => info!("ScanService: Ended {} scans", n),
            Err(e) => error!("ScanService: Failed to end scans: {}", e),
        }
        let released = self.db.write_txn().and_then(|txn| {
            let sids = release_all_subscriptions(&txn, self.scanner.ctx())?;
            txn.commit()?;
            Ok(sids)
        });
        if let Err(e) = released {
            error!("ScanService: Failed to release subscriptions: {}", e);
        }
        info!("ScanService: Stopped");
    }
}

/// Client side of a running [`ScanService`].
pub struct ScanServiceHandle {
    tx: mpsc::UnboundedSender<ScanEvent>,
    state: Arc<Mutex<SchedulerState>>,
    cancel: Arc<AtomicBool>,
    reports: broadcast::Sender<ScanReport>,
    join: JoinHandle<Database>,
}

impl ScanServiceHandle {
    fn send(&self, event: ScanEvent) -> bool {
        if self.tx.send(event).is_err() {
            warn!("ScanService: Not running, event dropped");
            return false;
        }
        true
    }

    /// Claim muxes for a scan; see [`Scanner::add_muxes`].
    pub async fn add_muxes(
        &self,
        muxes: Vec<AnyMux>,
        scan_sid: Option<SubscriptionId>,
    ) -> Result<SubscriptionId, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::AddMuxes {
            muxes,
            scan_sid,
            reply,
        });
        rx.await.unwrap_or(Err(ScanError::Cancelled))
    }

    /// Claim bands for spectrum scans; see [`Scanner::add_bands`].
    pub async fn add_bands(
        &self,
        bands: Vec<BandSpec>,
        scan_sid: Option<SubscriptionId>,
    ) -> Result<SubscriptionId, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::AddBands {
            bands,
            scan_sid,
            reply,
        });
        rx.await.unwrap_or(Err(ScanError::Cancelled))
    }

    pub async fn unsubscribe(&self, scan_sid: SubscriptionId) -> Result<(), ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::Unsubscribe { scan_sid, reply });
        rx.await.unwrap_or(Err(ScanError::Cancelled))
    }

    pub fn mux_end(&self, report: MuxScanReport) -> bool {
        self.send(ScanEvent::MuxEnd(report))
    }

    pub fn band_end(&self, report: BandScanReport) -> bool {
        self.send(ScanEvent::BandEnd(report))
    }

    pub fn dish_moved(&self, dish_id: i32, usals_pos: i16) -> bool {
        self.send(ScanEvent::DishMoved { dish_id, usals_pos })
    }

    pub fn pause(&self) -> bool {
        self.send(ScanEvent::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(ScanEvent::Resume)
    }

    /// Abort all sessions at their next step.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.lock().await
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<ScanReport> {
        self.reports.subscribe()
    }

    /// Stop the service and wait for it. Returns the database, or `None`
    /// if the task panicked.
    pub async fn shutdown(self) -> Option<Database> {
        self.send(ScanEvent::Shutdown);
        match self.join.await {
            Ok(db) => Some(db),
            Err(e) => {
                error!("ScanService: Task failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ChannelDevice, DeviceCommand};
    use crate::testutil::*;
    use crate::tuner::TuneOptions;
    use rfshare_types::{DelsysType, Dish, DvbsMux, Frontend, Polarisation, ScanResult, ScanStatus};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn_service() -> (ScanServiceHandle, mpsc::UnboundedReceiver<DeviceCommand>) {
        let mut db = Database::open_in_memory().unwrap();
        seed_single_lnb(&mut db);
        let scanner = Scanner::new(test_ctx(), TuneOptions::default(), 4);
        let (device, commands) = ChannelDevice::new();
        let config = ScanServiceConfig {
            housekeeping_interval_secs: 3600,
        };
        (
            ScanService::spawn(db, scanner, Box::new(device), config),
            commands,
        )
    }

    #[tokio::test]
    async fn test_scan_through_service() {
        let (handle, mut commands) = spawn_service();
        let mux = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);

        handle
            .add_muxes(vec![AnyMux::Sat(mux.clone())], None)
            .await
            .unwrap();
        let mut reports = handle.subscribe_reports();
        let Some(DeviceCommand::Tune(req)) = timeout(WAIT, commands.recv()).await.unwrap() else {
            panic!("expected a tune command");
        };
        let sid = req.subscribed.subscription_id;

        assert!(handle.mux_end(MuxScanReport {
            subscription_id: sid,
            delsys_type: DelsysType::Sat,
            mux_key: mux.k,
            result: ScanResult::NoData,
        }));
        let report = timeout(WAIT, reports.recv()).await.unwrap().unwrap();
        assert!(report.finished);
        assert_eq!(report.stats.get(DelsysType::Sat).locked, 1);
        assert_eq!(
            timeout(WAIT, commands.recv()).await.unwrap(),
            Some(DeviceCommand::Release(sid))
        );

        let mut db = handle.shutdown().await.unwrap();
        let txn = db.read_txn().unwrap();
        let stored = txn.find_by_key::<DvbsMux>(&mux.k).unwrap().unwrap();
        assert_eq!(stored.c.scan_status, ScanStatus::Idle);
        assert_eq!(stored.c.scan_result, ScanResult::NoData);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let (handle, mut commands) = spawn_service();
        let mux = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);
        handle
            .add_muxes(vec![AnyMux::Sat(mux.clone())], None)
            .await
            .unwrap();
        assert!(matches!(
            timeout(WAIT, commands.recv()).await.unwrap(),
            Some(DeviceCommand::Tune(_))
        ));

        let mut db = handle.shutdown().await.unwrap();
        assert!(matches!(commands.recv().await, Some(DeviceCommand::Release(_))));
        let txn = db.read_txn().unwrap();
        assert!(!txn.get::<Frontend>(&ADAPTER_A0_FE).unwrap().sub.is_reserved());
        let stored = txn.find_by_key::<DvbsMux>(&mux.k).unwrap().unwrap();
        assert_eq!(stored.c.scan_status, ScanStatus::Idle);
        assert_eq!(stored.c.scan_id, None);
    }

    #[tokio::test]
    async fn test_pause_and_dish_position() {
        let (handle, _commands) = spawn_service();
        assert_eq!(handle.state().await, SchedulerState::Running);

        assert!(handle.pause());
        assert!(handle.dish_moved(0, 1920));
        // Events are handled in order, so the reply implies both were seen.
        let err = handle.unsubscribe(SubscriptionId(99)).await.unwrap_err();
        assert!(matches!(err, ScanError::UnknownScan(_)));
        assert_eq!(handle.state().await, SchedulerState::Paused);

        assert!(handle.resume());
        let _ = handle.unsubscribe(SubscriptionId(99)).await;
        assert_eq!(handle.state().await, SchedulerState::Running);

        let mut db = handle.shutdown().await.unwrap();
        let txn = db.read_txn().unwrap();
        assert_eq!(txn.get::<Dish>(&0).unwrap().cur_usals_pos, 1920);
    }
}
