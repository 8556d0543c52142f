//! Shared RF resource allocation for DVB receivers.
//!
//! Several processes share tuners, LNBs, RF cables and dishes through one
//! record store. Each process reserves the resources it needs in a write
//! transaction; the conflict checker and selector in [`tuner`] decide which
//! frontend and RF path can serve a request without disturbing existing
//! reservations. [`scheduler`] drives mux and band scans on top of that.

pub mod config;
pub mod database;
pub mod logging;
pub mod scheduler;
pub mod tuner;

#[cfg(test)]
mod testutil;
