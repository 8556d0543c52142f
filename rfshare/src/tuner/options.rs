//! Tuning options.

use serde::Deserialize;

use rfshare_types::RfPath;

/// Purpose of a subscription. Plain tuning requests report exhaustion to
/// the user, scans do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    #[default]
    Tune,
    MuxScan,
    BandScan,
}

impl SubscriptionType {
    pub fn is_scan(self) -> bool {
        !matches!(self, SubscriptionType::Tune)
    }
}

/// Options steering resource selection.
///
/// Loaded from the `[tuning]` section of the configuration file and
/// adjusted per request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TuneOptions {
    /// Tune without relying on the stored tuning parameters.
    pub use_blind_tune: bool,
    /// A power spectrum is wanted (band scans).
    pub need_spectrum: bool,
    pub may_move_dish: bool,
    /// Whether this subscription may send switching commands to the LNB.
    pub may_control_lnb: bool,
    /// Priority subtracted from candidates needing a dish move.
    pub dish_move_penalty: i32,
    /// Priority added to candidates that reuse an already tuned tuner.
    pub resource_reuse_bonus: i32,
    /// Restrictions; empty means unrestricted.
    pub allowed_rf_paths: Vec<RfPath>,
    pub allowed_dish_ids: Vec<i32>,
    pub allowed_card_mac_addresses: Vec<i64>,
    pub subscription_type: SubscriptionType,
    /// Spectrum acquisition range in kHz; 0 means the LNB's band edge.
    pub spectrum_start_freq: u32,
    pub spectrum_end_freq: u32,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            use_blind_tune: false,
            need_spectrum: false,
            may_move_dish: true,
            may_control_lnb: true,
            dish_move_penalty: 1000,
            resource_reuse_bonus: 0,
            allowed_rf_paths: Vec::new(),
            allowed_dish_ids: Vec::new(),
            allowed_card_mac_addresses: Vec::new(),
            subscription_type: SubscriptionType::Tune,
            spectrum_start_freq: 0,
            spectrum_end_freq: 0,
        }
    }
}

impl TuneOptions {
    /// Options for a scan of the given type, based on these defaults.
    pub fn for_scan(&self, subscription_type: SubscriptionType) -> Self {
        Self {
            subscription_type,
            need_spectrum: subscription_type == SubscriptionType::BandScan,
            ..self.clone()
        }
    }

    pub fn allows_rf_path(&self, rf_path: &RfPath) -> bool {
        self.allowed_rf_paths.is_empty() || self.allowed_rf_paths.contains(rf_path)
    }

    pub fn allows_dish(&self, dish_id: i32) -> bool {
        self.allowed_dish_ids.is_empty() || self.allowed_dish_ids.contains(&dish_id)
    }

    pub fn allows_card(&self, card_mac_address: i64) -> bool {
        self.allowed_card_mac_addresses.is_empty()
            || self.allowed_card_mac_addresses.contains(&card_mac_address)
    }
}
