//! Record definitions for the rfshare allocator.
//!
//! This crate defines the plain data shared between the allocator, the
//! scanner and the persistent store. Nothing in here performs I/O.
//!
//! # Record kinds
//!
//! - [`Frontend`]: a hardware tuner (demodulator) with its reservation block
//! - [`Lnb`]: a feed converter with its [`LnbConnection`]s and [`LnbNetwork`]s
//! - [`Dish`]: fixed or motorised dish holding one or more LNBs
//! - [`AnyMux`]: satellite, cable or terrestrial mux
//! - [`Satellite`]: orbital position with per-band [`BandScan`] entries
//!
//! Muxes and band scans share a [`ScanHeader`] which records whether a scan
//! session currently claims the record.
//!
//! ```rust
//! use rfshare_types::{ScanHeader, ScanId, ScanStatus};
//!
//! let mut header = ScanHeader::default();
//! header.claim(ScanId::new(1234, 7));
//! assert_eq!(header.scan_status, ScanStatus::Pending);
//! assert!(header.is_claimed_by(&ScanId::new(1234, 7)));
//! ```

pub mod error;
pub mod records;
pub mod types;

pub use error::RecordError;
pub use records::{
    AnyMux, BandScan, Dish, DvbcMux, DvbsMux, DvbtMux, FeCaps, FeSubscription, Frontend, Lnb,
    LnbConnection, LnbNetwork, Mux, MuxRef, Satellite, SubscriptionEntry,
};
pub use types::{
    DelsysType, DeliverySystem, FeKey, LnbKey, LnbPolType, MuxKey, Polarisation, RfPath,
    RotorControl, SatBand, ScanHeader, ScanId, ScanResult, ScanStatus, ServiceKey,
    SpectrumMethod, SubBand, SubscriptionId, TunerId,
};
