//! Keys, enums and the shared scan-status header.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a logical subscription, unique within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u32);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key of a frontend: adapter MAC address plus frontend index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeKey {
    pub adapter_mac_address: i64,
    pub frontend_no: u8,
}

impl FeKey {
    pub fn new(adapter_mac_address: i64, frontend_no: u8) -> Self {
        Self {
            adapter_mac_address,
            frontend_no,
        }
    }
}

impl fmt::Display for FeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012x}.fe{}", self.adapter_mac_address, self.frontend_no)
    }
}

/// Key of an LNB. The dish id is part of the key, so LNBs sort by dish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LnbKey {
    pub dish_id: i32,
    pub lnb_id: i32,
}

impl LnbKey {
    pub fn new(dish_id: i32, lnb_id: i32) -> Self {
        Self { dish_id, lnb_id }
    }
}

impl fmt::Display for LnbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}L{}", self.dish_id, self.lnb_id)
    }
}

/// One RF input of one card. Frontends behind the same RF input share a
/// tuner and must agree on satellite, band and polarisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TunerId {
    pub card_mac_address: i64,
    pub rf_input: i8,
}

/// One physical cable from an LNB connection to a tuner input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RfPath {
    pub lnb: LnbKey,
    pub card_mac_address: i64,
    pub rf_input: i8,
}

impl RfPath {
    pub fn new(lnb: LnbKey, card_mac_address: i64, rf_input: i8) -> Self {
        Self {
            lnb,
            card_mac_address,
            rf_input,
        }
    }

    /// The tuner input this path ends in.
    pub fn tuner(&self) -> TunerId {
        TunerId {
            card_mac_address: self.card_mac_address,
            rf_input: self.rf_input,
        }
    }
}

impl fmt::Display for RfPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {:012x}/rf{}",
            self.lnb, self.card_mac_address, self.rf_input
        )
    }
}

/// Signal polarisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Polarisation {
    H,
    V,
    L,
    R,
}

impl Polarisation {
    /// Linear polarisations are H and V.
    pub fn is_linear(self) -> bool {
        matches!(self, Polarisation::H | Polarisation::V)
    }
}

impl fmt::Display for Polarisation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Polarisation::H => "H",
            Polarisation::V => "V",
            Polarisation::L => "L",
            Polarisation::R => "R",
        };
        f.write_str(s)
    }
}

/// Low or high half of a universal LNB's frequency range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubBand {
    Low,
    High,
}

/// Satellite frequency band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SatBand {
    C,
    Ku,
    Ka,
}

/// Delivery system family, the unit the scanner schedules by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DelsysType {
    Sat,
    Cable,
    Terrestrial,
}

impl DelsysType {
    pub fn name(&self) -> &'static str {
        match self {
            DelsysType::Sat => "DVB-S",
            DelsysType::Cable => "DVB-C",
            DelsysType::Terrestrial => "DVB-T",
        }
    }
}

/// Delivery systems a frontend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliverySystem {
    DvbS,
    DvbS2,
    DvbS2X,
    DvbC,
    DvbC2,
    DvbT,
    DvbT2,
    Isdbt,
    Atsc,
}

impl DeliverySystem {
    pub fn delsys_type(self) -> DelsysType {
        match self {
            DeliverySystem::DvbS | DeliverySystem::DvbS2 | DeliverySystem::DvbS2X => {
                DelsysType::Sat
            }
            DeliverySystem::DvbC | DeliverySystem::DvbC2 => DelsysType::Cable,
            DeliverySystem::DvbT
            | DeliverySystem::DvbT2
            | DeliverySystem::Isdbt
            | DeliverySystem::Atsc => DelsysType::Terrestrial,
        }
    }
}

/// How a frontend acquires a power spectrum, ordered from worst to best.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum SpectrumMethod {
    #[default]
    None,
    Sweep,
    Fft,
}

impl SpectrumMethod {
    pub fn rank(self) -> i32 {
        match self {
            SpectrumMethod::None => 0,
            SpectrumMethod::Sweep => 1,
            SpectrumMethod::Fft => 2,
        }
    }
}

/// Polarisation capability of an LNB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LnbPolType {
    /// Switchable horizontal/vertical.
    Hv,
    /// Switchable circular left/right.
    Lr,
    H,
    V,
    L,
    R,
}

impl LnbPolType {
    /// Whether the LNB can deliver the given polarisation.
    pub fn can_pol(self, pol: Polarisation) -> bool {
        match self {
            LnbPolType::Hv => pol.is_linear(),
            LnbPolType::Lr => !pol.is_linear(),
            LnbPolType::H => pol == Polarisation::H,
            LnbPolType::V => pol == Polarisation::V,
            LnbPolType::L => pol == Polarisation::L,
            LnbPolType::R => pol == Polarisation::R,
        }
    }

    /// Polarisations selectable on this LNB.
    pub fn pols(self) -> &'static [Polarisation] {
        match self {
            LnbPolType::Hv => &[Polarisation::H, Polarisation::V],
            LnbPolType::Lr => &[Polarisation::L, Polarisation::R],
            LnbPolType::H => &[Polarisation::H],
            LnbPolType::V => &[Polarisation::V],
            LnbPolType::L => &[Polarisation::L],
            LnbPolType::R => &[Polarisation::R],
        }
    }
}

/// Role of an LNB connection with respect to the dish positioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RotorControl {
    #[default]
    FixedDish,
    /// Connection drives the positioner with USALS commands.
    MasterUsals,
    /// Connection drives the positioner with DiSEqC 1.2 stored positions.
    MasterDiseqc12,
    /// Connection sees the positioner but may not move it.
    Slave,
}

impl RotorControl {
    pub fn can_move_dish(self) -> bool {
        matches!(self, RotorControl::MasterUsals | RotorControl::MasterDiseqc12)
    }
}

/// Scan progress of a mux or band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanStatus {
    #[default]
    Idle,
    Pending,
    Active,
    Retry,
}

impl ScanStatus {
    /// Pending, active and retry records are claimed by a scan.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            ScanStatus::Pending | ScanStatus::Active | ScanStatus::Retry
        )
    }
}

/// Outcome of the last scan of a mux or band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanResult {
    #[default]
    None,
    NoLock,
    Partial,
    Ok,
    NoData,
    /// Temporary failure, e.g. resources were taken away mid-scan.
    TempFail,
    /// Scanning is impossible with the available hardware.
    Bad,
    Aborted,
    NotAvailable,
}

impl ScanResult {
    /// Whether the tuner achieved a lock.
    pub fn is_locked(self) -> bool {
        matches!(self, ScanResult::Ok | ScanResult::Partial | ScanResult::NoData)
    }

    /// Whether SI data was obtained.
    pub fn has_si(self) -> bool {
        matches!(self, ScanResult::Ok | ScanResult::Partial)
    }

    /// Whether the attempt counts as failed in statistics.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ScanResult::NoLock | ScanResult::Bad | ScanResult::NotAvailable | ScanResult::Aborted
        )
    }
}

/// Claim of a scan session on a record: owning process and scan subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId {
    pub pid: u32,
    pub subscription_id: SubscriptionId,
}

impl ScanId {
    pub fn new(pid: u32, subscription_id: u32) -> Self {
        Self {
            pid,
            subscription_id: SubscriptionId(subscription_id),
        }
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.subscription_id)
    }
}

/// Header shared by muxes and band scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanHeader {
    pub scan_status: ScanStatus,
    pub scan_result: ScanResult,
    pub scan_id: Option<ScanId>,
    /// Unix time of the last completed scan.
    pub scan_time: i64,
}

impl ScanHeader {
    /// Mark the record pending for the given scan.
    pub fn claim(&mut self, scan_id: ScanId) {
        self.scan_status = ScanStatus::Pending;
        self.scan_id = Some(scan_id);
    }

    pub fn is_claimed_by(&self, scan_id: &ScanId) -> bool {
        self.scan_status.is_in_progress() && self.scan_id.as_ref() == Some(scan_id)
    }

    /// Return the record to idle, recording the result.
    pub fn finish(&mut self, result: ScanResult, now: i64) {
        self.scan_status = ScanStatus::Idle;
        self.scan_result = result;
        self.scan_id = None;
        self.scan_time = now;
    }

    /// Drop a claim without recording a result.
    pub fn release(&mut self) {
        self.scan_status = ScanStatus::Idle;
        self.scan_id = None;
    }
}

/// Key of a mux. Cable and terrestrial muxes use the reserved positions
/// [`MuxKey::SAT_POS_DVBC`] and [`MuxKey::SAT_POS_DVBT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MuxKey {
    /// Orbital position in 1/100 degree (east positive).
    pub sat_pos: i16,
    pub network_id: u16,
    pub ts_id: u16,
    pub t2mi_pid: u16,
    /// Disambiguates muxes whose network/ts ids are unknown or duplicated.
    pub extra_id: u16,
}

impl MuxKey {
    pub const SAT_POS_DVBC: i16 = 30000;
    pub const SAT_POS_DVBT: i16 = 30001;

    pub fn new(sat_pos: i16, network_id: u16, ts_id: u16, extra_id: u16) -> Self {
        Self {
            sat_pos,
            network_id,
            ts_id,
            t2mi_pid: 0,
            extra_id,
        }
    }
}

impl fmt::Display for MuxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sat_pos {
            Self::SAT_POS_DVBC => f.write_str("C")?,
            Self::SAT_POS_DVBT => f.write_str("T")?,
            p => write!(f, "{:.1}", p as f32 / 100.0)?,
        }
        write!(f, " nid={} tid={}", self.network_id, self.ts_id)?;
        if self.extra_id != 0 {
            write!(f, " x={}", self.extra_id)?;
        }
        Ok(())
    }
}

/// Key of a service within a mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub mux: MuxKey,
    pub service_id: u16,
}
