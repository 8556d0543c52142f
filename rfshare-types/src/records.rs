//! Persisted record definitions.

use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::types::{
    DelsysType, DeliverySystem, FeKey, LnbKey, LnbPolType, MuxKey, Polarisation, RfPath,
    RotorControl, SatBand, ScanHeader, ServiceKey, SpectrumMethod, SubBand, SubscriptionId,
};

/// Capability flags of a frontend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeCaps {
    pub supports_blindscan: bool,
    pub spectrum_method: SpectrumMethod,
    pub supports_multistream: bool,
    /// Symbol rate limits in symbols/s. A maximum of 0 means unlimited.
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    /// Frequency limits in kHz as seen by the frontend. A maximum of 0 means unlimited.
    #[serde(default)]
    pub frequency_min: u32,
    #[serde(default)]
    pub frequency_max: u32,
}

/// One subscription multiplexed onto a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub subscription_id: SubscriptionId,
    pub has_mux: bool,
    pub service: Option<ServiceKey>,
}

impl SubscriptionEntry {
    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }
}

/// Reservation block of a frontend.
///
/// `None` fields mean "unspecified": a reservation with an unspecified
/// polarisation or band controls the LNB exclusively, one with an
/// unspecified USALS position on a movable dish may move the dish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeSubscription {
    /// Process id of the owner; 0 while vacant.
    pub owner: u32,
    /// Shared by every reservation on the same tuner chain.
    pub config_id: i32,
    pub delsys_type: Option<DelsysType>,
    pub rf_path: Option<RfPath>,
    pub dish_movable: bool,
    pub rf_coupler_id: Option<i32>,
    pub sat_pos: Option<i16>,
    pub pol: Option<Polarisation>,
    pub band: Option<SubBand>,
    pub usals_pos: Option<i16>,
    pub mux_key: Option<MuxKey>,
    pub frequency: Option<u32>,
    pub subs: Vec<SubscriptionEntry>,
}

impl FeSubscription {
    pub fn is_reserved(&self) -> bool {
        !self.subs.is_empty()
    }

    pub fn entry(&self, subscription_id: SubscriptionId) -> Option<&SubscriptionEntry> {
        self.subs
            .iter()
            .find(|e| e.subscription_id == subscription_id)
    }

    pub fn entry_mut(&mut self, subscription_id: SubscriptionId) -> Option<&mut SubscriptionEntry> {
        self.subs
            .iter_mut()
            .find(|e| e.subscription_id == subscription_id)
    }

    /// Remove an entry; the whole block is cleared when it was the last one.
    /// Returns false if the entry was not present.
    pub fn remove(&mut self, subscription_id: SubscriptionId) -> bool {
        let before = self.subs.len();
        self.subs.retain(|e| e.subscription_id != subscription_id);
        if self.subs.len() == before {
            return false;
        }
        if self.subs.is_empty() {
            *self = FeSubscription::default();
        }
        true
    }

    pub fn dish_id(&self) -> Option<i32> {
        self.rf_path.map(|p| p.lnb.dish_id)
    }
}

/// A hardware tuner (demodulator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    pub k: FeKey,
    pub adapter_name: String,
    pub adapter_no: u16,
    pub card_mac_address: i64,
    /// RF inputs this frontend can be switched to.
    pub rf_inputs: Vec<i8>,
    pub delsys: Vec<DeliverySystem>,
    pub caps: FeCaps,
    pub priority: i32,
    pub enable_dvbs: bool,
    pub enable_dvbc: bool,
    pub enable_dvbt: bool,
    pub present: bool,
    pub can_be_used: bool,
    #[serde(default)]
    pub sub: FeSubscription,
}

impl Frontend {
    /// Whether the frontend is usable for the given delivery system family.
    pub fn supports(&self, delsys_type: DelsysType) -> bool {
        let enabled = match delsys_type {
            DelsysType::Sat => self.enable_dvbs,
            DelsysType::Cable => self.enable_dvbc,
            DelsysType::Terrestrial => self.enable_dvbt,
        };
        enabled
            && self.present
            && self.can_be_used
            && self.delsys.iter().any(|d| d.delsys_type() == delsys_type)
    }

    pub fn has_rf_input(&self, rf_input: i8) -> bool {
        self.rf_inputs.contains(&rf_input)
    }

    pub fn supports_symbol_rate(&self, symbol_rate: u32) -> bool {
        symbol_rate >= self.caps.symbol_rate_min
            && (self.caps.symbol_rate_max == 0 || symbol_rate <= self.caps.symbol_rate_max)
    }

    pub fn supports_frequency(&self, frequency: u32) -> bool {
        frequency >= self.caps.frequency_min
            && (self.caps.frequency_max == 0 || frequency <= self.caps.frequency_max)
    }

    /// Require a delivery system family, as an error.
    pub fn require(&self, delsys_type: DelsysType) -> Result<(), RecordError> {
        if self.supports(delsys_type) {
            Ok(())
        } else {
            Err(RecordError::UnsupportedDelsys(self.k))
        }
    }
}

/// Cable from an LNB to one tuner input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnbConnection {
    pub card_mac_address: i64,
    pub rf_input: i8,
    /// Set when several cables are merged by a coupler/splitter.
    pub rf_coupler_id: Option<i32>,
    pub priority: i32,
    pub rotor_control: RotorControl,
    pub enabled: bool,
}

impl LnbConnection {
    pub fn rf_path(&self, lnb: LnbKey) -> RfPath {
        RfPath::new(lnb, self.card_mac_address, self.rf_input)
    }
}

/// Satellite reachable through an LNB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnbNetwork {
    pub sat_pos: i16,
    /// Negative means "use the LNB priority".
    pub priority: i32,
    /// Dish position needed to receive this satellite.
    pub usals_pos: i16,
    pub enabled: bool,
}

/// Satellite feed converter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lnb {
    pub k: LnbKey,
    pub name: String,
    pub pol_type: LnbPolType,
    pub enabled: bool,
    pub can_be_used: bool,
    pub priority: i32,
    /// Local oscillator frequencies in kHz.
    pub lof_low: u32,
    pub lof_high: u32,
    /// Frequency range in kHz; `freq_mid` is the low/high switch point
    /// (0 for single band LNBs).
    pub freq_low: u32,
    pub freq_mid: u32,
    pub freq_high: u32,
    pub connections: Vec<LnbConnection>,
    pub networks: Vec<LnbNetwork>,
}

impl Lnb {
    /// Band used to receive a frequency, if the LNB can receive it at all.
    pub fn band_for_frequency(&self, frequency: u32) -> Option<SubBand> {
        if frequency < self.freq_low || frequency > self.freq_high {
            return None;
        }
        if self.freq_mid != 0 && frequency >= self.freq_mid {
            Some(SubBand::High)
        } else {
            Some(SubBand::Low)
        }
    }

    pub fn has_band(&self, band: SubBand) -> bool {
        match band {
            SubBand::Low => true,
            SubBand::High => self.freq_mid != 0,
        }
    }

    /// Frequency range covered by a band.
    pub fn band_range(&self, band: SubBand) -> (u32, u32) {
        match (band, self.freq_mid) {
            (_, 0) => (self.freq_low, self.freq_high),
            (SubBand::Low, mid) => (self.freq_low, mid),
            (SubBand::High, mid) => (mid, self.freq_high),
        }
    }

    pub fn network(&self, sat_pos: i16) -> Option<&LnbNetwork> {
        self.networks
            .iter()
            .find(|n| n.enabled && n.sat_pos == sat_pos)
    }

    pub fn connection(&self, card_mac_address: i64, rf_input: i8) -> Option<&LnbConnection> {
        self.connections
            .iter()
            .find(|c| c.card_mac_address == card_mac_address && c.rf_input == rf_input)
    }

    /// Connection an RF path runs through.
    pub fn connection_for(&self, rf_path: &RfPath) -> Result<&LnbConnection, RecordError> {
        self.connection(rf_path.card_mac_address, rf_path.rf_input)
            .ok_or(RecordError::NoSuchConnection {
                lnb: self.k,
                card_mac_address: rf_path.card_mac_address,
                rf_input: rf_path.rf_input,
            })
    }

    pub fn rf_paths(&self) -> impl Iterator<Item = RfPath> + '_ {
        self.connections
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.rf_path(self.k))
    }
}

/// Fixed or motorised dish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dish {
    pub dish_id: i32,
    pub name: String,
    pub enabled: bool,
    pub movable: bool,
    pub cur_usals_pos: i16,
    pub target_usals_pos: i16,
    /// Rotation speed in 1/100 degree per second.
    pub speed: u16,
}

impl Dish {
    /// Positions closer than this are treated as equal (1/100 degree).
    pub const USALS_TOLERANCE: i16 = 10;

    pub fn is_at(&self, usals_pos: i16) -> bool {
        (i32::from(self.cur_usals_pos) - i32::from(usals_pos)).abs()
            <= i32::from(Self::USALS_TOLERANCE)
    }

    /// Estimated seconds needed to rotate to a position.
    pub fn move_duration_secs(&self, usals_pos: i16) -> u32 {
        let distance = (i32::from(self.cur_usals_pos) - i32::from(usals_pos)).unsigned_abs();
        let speed = u32::from(self.speed.max(1));
        distance.div_ceil(speed)
    }
}

/// Satellite mux.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvbsMux {
    pub k: MuxKey,
    /// Frequency in kHz.
    pub frequency: u32,
    pub pol: Polarisation,
    /// Symbol rate in symbols/s.
    pub symbol_rate: u32,
    pub delsys: DeliverySystem,
    /// Multistream id, -1 when not multistream.
    pub stream_id: i32,
    #[serde(default)]
    pub c: ScanHeader,
}

/// Cable mux.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvbcMux {
    pub k: MuxKey,
    pub frequency: u32,
    pub symbol_rate: u32,
    #[serde(default)]
    pub c: ScanHeader,
}

/// Terrestrial mux.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvbtMux {
    pub k: MuxKey,
    pub frequency: u32,
    pub bandwidth_hz: u32,
    /// PLP id for DVB-T2, -1 otherwise.
    pub stream_id: i32,
    #[serde(default)]
    pub c: ScanHeader,
}

/// Borrowed view of one of the three mux variants.
#[derive(Debug, Clone, Copy)]
pub enum MuxRef<'a> {
    Sat(&'a DvbsMux),
    Cable(&'a DvbcMux),
    Terrestrial(&'a DvbtMux),
}

/// Capabilities shared by all mux variants.
pub trait Mux: Clone {
    const DELSYS_TYPE: DelsysType;

    fn key(&self) -> &MuxKey;
    fn header(&self) -> &ScanHeader;
    fn header_mut(&mut self) -> &mut ScanHeader;
    fn frequency(&self) -> u32;
    fn stream_id(&self) -> i32;
    fn mux_ref(&self) -> MuxRef<'_>;
    fn into_any(self) -> AnyMux;
}

impl Mux for DvbsMux {
    const DELSYS_TYPE: DelsysType = DelsysType::Sat;

    fn key(&self) -> &MuxKey {
        &self.k
    }
    fn header(&self) -> &ScanHeader {
        &self.c
    }
    fn header_mut(&mut self) -> &mut ScanHeader {
        &mut self.c
    }
    fn frequency(&self) -> u32 {
        self.frequency
    }
    fn stream_id(&self) -> i32 {
        self.stream_id
    }
    fn mux_ref(&self) -> MuxRef<'_> {
        MuxRef::Sat(self)
    }
    fn into_any(self) -> AnyMux {
        AnyMux::Sat(self)
    }
}

impl Mux for DvbcMux {
    const DELSYS_TYPE: DelsysType = DelsysType::Cable;

    fn key(&self) -> &MuxKey {
        &self.k
    }
    fn header(&self) -> &ScanHeader {
        &self.c
    }
    fn header_mut(&mut self) -> &mut ScanHeader {
        &mut self.c
    }
    fn frequency(&self) -> u32 {
        self.frequency
    }
    fn stream_id(&self) -> i32 {
        -1
    }
    fn mux_ref(&self) -> MuxRef<'_> {
        MuxRef::Cable(self)
    }
    fn into_any(self) -> AnyMux {
        AnyMux::Cable(self)
    }
}

impl Mux for DvbtMux {
    const DELSYS_TYPE: DelsysType = DelsysType::Terrestrial;

    fn key(&self) -> &MuxKey {
        &self.k
    }
    fn header(&self) -> &ScanHeader {
        &self.c
    }
    fn header_mut(&mut self) -> &mut ScanHeader {
        &mut self.c
    }
    fn frequency(&self) -> u32 {
        self.frequency
    }
    fn stream_id(&self) -> i32 {
        self.stream_id
    }
    fn mux_ref(&self) -> MuxRef<'_> {
        MuxRef::Terrestrial(self)
    }
    fn into_any(self) -> AnyMux {
        AnyMux::Terrestrial(self)
    }
}

/// Any of the three mux variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnyMux {
    Sat(DvbsMux),
    Cable(DvbcMux),
    Terrestrial(DvbtMux),
}

impl AnyMux {
    pub fn mux_ref(&self) -> MuxRef<'_> {
        match self {
            AnyMux::Sat(m) => MuxRef::Sat(m),
            AnyMux::Cable(m) => MuxRef::Cable(m),
            AnyMux::Terrestrial(m) => MuxRef::Terrestrial(m),
        }
    }

    pub fn key(&self) -> &MuxKey {
        match self {
            AnyMux::Sat(m) => &m.k,
            AnyMux::Cable(m) => &m.k,
            AnyMux::Terrestrial(m) => &m.k,
        }
    }

    pub fn header(&self) -> &ScanHeader {
        match self {
            AnyMux::Sat(m) => &m.c,
            AnyMux::Cable(m) => &m.c,
            AnyMux::Terrestrial(m) => &m.c,
        }
    }

    pub fn header_mut(&mut self) -> &mut ScanHeader {
        match self {
            AnyMux::Sat(m) => &mut m.c,
            AnyMux::Cable(m) => &mut m.c,
            AnyMux::Terrestrial(m) => &mut m.c,
        }
    }

    pub fn delsys_type(&self) -> DelsysType {
        match self {
            AnyMux::Sat(_) => DelsysType::Sat,
            AnyMux::Cable(_) => DelsysType::Cable,
            AnyMux::Terrestrial(_) => DelsysType::Terrestrial,
        }
    }

    pub fn frequency(&self) -> u32 {
        match self {
            AnyMux::Sat(m) => m.frequency,
            AnyMux::Cable(m) => m.frequency,
            AnyMux::Terrestrial(m) => m.frequency,
        }
    }
}

/// Scan state of one polarisation/band of a satellite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandScan {
    pub pol: Polarisation,
    pub band: SubBand,
    #[serde(default)]
    pub c: ScanHeader,
}

/// Orbital position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Satellite {
    pub sat_pos: i16,
    pub name: String,
    pub sat_band: SatBand,
    #[serde(default)]
    pub band_scans: Vec<BandScan>,
}

impl Satellite {
    pub fn band_scan(&self, pol: Polarisation, band: SubBand) -> Option<&BandScan> {
        self.band_scans
            .iter()
            .find(|b| b.pol == pol && b.band == band)
    }

    /// Band scan entry, created on first use.
    pub fn band_scan_mut(&mut self, pol: Polarisation, band: SubBand) -> &mut BandScan {
        if let Some(idx) = self
            .band_scans
            .iter()
            .position(|b| b.pol == pol && b.band == band)
        {
            return &mut self.band_scans[idx];
        }
        self.band_scans.push(BandScan {
            pol,
            band,
            c: ScanHeader::default(),
        });
        let last = self.band_scans.len() - 1;
        &mut self.band_scans[last]
    }
}
