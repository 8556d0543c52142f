//! Scan scheduling.
//!
//! This module provides:
//! - [`Scan`]: one scan session over claimed muxes, bands and spectral peaks
//! - [`Scanner`]: all sessions of this process, driven by device reports and
//!   periodic housekeeping
//! - [`ScanService`]: a tokio task owning the database, the scanner and the
//!   device boundary
//! - [`DeviceControl`]: the boundary through which tuning decisions leave
//!   the allocator

mod blindscan;
mod device;
mod scan;
mod scanner;
mod service;
mod stats;

pub use blindscan::{BlindscanKey, PendingPeak, SpectralPeak};
pub use device::{
    BandScanReport, ChannelDevice, DeviceCommand, DeviceControl, MuxScanReport, TuneRequest,
    TuneTarget,
};
pub use scan::Scan;
pub use scanner::{BandSpec, Scanner};
pub use service::{ScanEvent, ScanService, ScanServiceConfig, ScanServiceHandle, SchedulerState};
pub use stats::{DelsysStats, ScanReport, ScanStats};

use rfshare_types::SubscriptionId;
use thiserror::Error;

use crate::database::DatabaseError;

/// Scan error types.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The scanner was asked to end; all sessions have been torn down.
    #[error("Scan cancelled")]
    Cancelled,

    #[error("No mux or band could be added to the scan")]
    NothingAdded,

    #[error("Unknown scan {0}")]
    UnknownScan(SubscriptionId),
}
