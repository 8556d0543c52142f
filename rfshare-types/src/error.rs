//! Error types for record validation.

use thiserror::Error;

use crate::types::{FeKey, LnbKey};

/// Errors raised when a record is internally inconsistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// LNB has no connection to the given card/RF input.
    #[error("LNB {lnb} has no connection to card {card_mac_address:x} input {rf_input}")]
    NoSuchConnection {
        lnb: LnbKey,
        card_mac_address: i64,
        rf_input: i8,
    },

    /// Frontend does not support any delivery system of the requested type.
    #[error("Frontend {0} does not support the requested delivery system")]
    UnsupportedDelsys(FeKey),

    /// Frequency cannot be received by the LNB.
    #[error("Frequency {frequency} kHz is outside the range of LNB {lnb}")]
    FrequencyOutOfRange { lnb: LnbKey, frequency: u32 },
}
