//! Boundary to the device layer.
//!
//! The allocator never talks to hardware. After a transaction commits, the
//! scanner hands the resulting [`DeviceCommand`]s to a [`DeviceControl`];
//! the device layer reports back with [`MuxScanReport`]s and
//! [`BandScanReport`]s.

use tokio::sync::mpsc;

use rfshare_types::{AnyMux, DelsysType, MuxKey, Polarisation, ScanResult, SubBand, SubscriptionId};

use super::blindscan::SpectralPeak;
use crate::tuner::Subscribed;

/// What to tune to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuneTarget {
    Mux(AnyMux),
    /// Acquire a spectrum of one band; frequencies in kHz, 0 for the band edge.
    Band {
        sat_pos: i16,
        pol: Polarisation,
        band: SubBand,
        start_freq: u32,
        end_freq: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuneRequest {
    pub subscribed: Subscribed,
    pub target: TuneTarget,
    pub use_blind_tune: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Tune(TuneRequest),
    /// Stop whatever the subscription was doing.
    Release(SubscriptionId),
}

/// Executes committed allocator decisions.
pub trait DeviceControl {
    fn execute(&mut self, command: DeviceCommand);
}

/// Forwards commands to device worker tasks over a channel.
#[derive(Debug, Clone)]
pub struct ChannelDevice {
    tx: mpsc::UnboundedSender<DeviceCommand>,
}

impl ChannelDevice {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DeviceControl for ChannelDevice {
    fn execute(&mut self, command: DeviceCommand) {
        if self.tx.send(command).is_err() {
            log::warn!("Device worker is gone, dropping command");
        }
    }
}

/// Outcome of tuning a mux, as classified by the device layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxScanReport {
    pub subscription_id: SubscriptionId,
    pub delsys_type: DelsysType,
    pub mux_key: MuxKey,
    pub result: ScanResult,
}

/// Outcome of a spectrum acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct BandScanReport {
    pub subscription_id: SubscriptionId,
    pub sat_pos: i16,
    pub pol: Polarisation,
    pub band: SubBand,
    /// Whether a spectrum was obtained at all.
    pub ok: bool,
    pub peaks: Vec<SpectralPeak>,
}
