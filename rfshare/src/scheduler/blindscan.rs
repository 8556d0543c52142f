//! Spectral peaks waiting to be tuned.

use std::collections::VecDeque;

use rfshare_types::{DeliverySystem, DvbsMux, MuxKey, Polarisation, ScanHeader, SubBand};

/// Relative symbol rate difference above which a peak is retried blind.
const SYMBOL_RATE_MISMATCH: f64 = 0.25;

/// Groups peaks so that one pass tunes at most one peak per band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlindscanKey {
    pub sat_pos: i16,
    pub band: SubBand,
    pub pol: Polarisation,
}

/// Candidate transponder found in a spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    /// kHz
    pub frequency: u32,
    pub symbol_rate: u32,
    /// dB
    pub snr: f32,
    pub pol: Polarisation,
}

impl SpectralPeak {
    /// Frequency tolerance for matching the peak to a known mux.
    pub fn tolerance_khz(&self) -> u32 {
        (self.symbol_rate / 2000).max(2000)
    }

    pub fn matches(&self, mux: &DvbsMux) -> bool {
        mux.pol == self.pol && mux.frequency.abs_diff(self.frequency) <= self.tolerance_khz()
    }
}

/// A peak queued for tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPeak {
    pub peak: SpectralPeak,
    pub sat_pos: i16,
    /// Known mux at the peak's frequency, tuned with its stored parameters first.
    pub db_mux: Option<DvbsMux>,
    /// Tune blind with the spectrum's parameters.
    pub is_peak_scan: bool,
    pub tempfail_retries: u8,
}

impl PendingPeak {
    pub fn new(sat_pos: i16, peak: SpectralPeak, db_mux: Option<DvbsMux>) -> Self {
        let is_peak_scan = db_mux.is_none();
        Self {
            peak,
            sat_pos,
            db_mux,
            is_peak_scan,
            tempfail_retries: 0,
        }
    }

    /// Mux to tune for the next attempt.
    pub fn tuning_mux(&self) -> DvbsMux {
        match (&self.db_mux, self.is_peak_scan) {
            (Some(mux), false) => mux.clone(),
            (Some(mux), true) => DvbsMux {
                frequency: self.peak.frequency,
                symbol_rate: self.peak.symbol_rate,
                ..mux.clone()
            },
            (None, _) => DvbsMux {
                k: self.peak_key(),
                frequency: self.peak.frequency,
                pol: self.peak.pol,
                symbol_rate: self.peak.symbol_rate,
                delsys: DeliverySystem::DvbS2,
                stream_id: -1,
                c: ScanHeader::default(),
            },
        }
    }

    /// Whether the spectrum disagrees with the stored symbol rate.
    pub fn symbol_rate_mismatch(&self) -> bool {
        let Some(mux) = &self.db_mux else {
            return false;
        };
        let stored = f64::from(mux.symbol_rate.max(1));
        let found = f64::from(self.peak.symbol_rate);
        (found - stored).abs() / stored > SYMBOL_RATE_MISMATCH
    }

    /// Placeholder key for a peak without a known mux.
    ///
    /// The frequency in MHz is split over `network_id` (high half) and
    /// `extra_id` (low half); `ts_id` holds the polarisation.
    fn peak_key(&self) -> MuxKey {
        let pol = match self.peak.pol {
            Polarisation::H => 0,
            Polarisation::V => 1,
            Polarisation::L => 2,
            Polarisation::R => 3,
        };
        let mhz = self.peak.frequency / 1000;
        MuxKey::new(self.sat_pos, (mhz >> 16) as u16, pol, (mhz & 0xffff) as u16)
    }
}

/// Peaks of one band.
#[derive(Debug, Clone, Default)]
pub struct Blindscan {
    /// Time the spectrum behind these peaks was acquired.
    pub spectrum_time: Option<i64>,
    pub peaks: VecDeque<PendingPeak>,
}
