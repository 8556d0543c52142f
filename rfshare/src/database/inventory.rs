//! Bulk import of hardware and mux records.
//!
//! Stands in for device discovery: an inventory file lists the frontends,
//! LNBs, dishes, satellites and muxes known to the system. Importing it
//! refreshes the static part of each record and keeps the dynamic state:
//! - a frontend keeps its reservation block
//! - a mux keeps its scan-status header
//! - a satellite keeps its band scan entries
//! - a dish keeps its current position

use serde::Deserialize;

use rfshare_types::{Dish, DvbcMux, DvbsMux, DvbtMux, Frontend, Lnb, Satellite};

use super::{Database, Record, Result, Txn};

/// Records to import.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub frontends: Vec<Frontend>,
    pub lnbs: Vec<Lnb>,
    pub dishes: Vec<Dish>,
    pub satellites: Vec<Satellite>,
    pub dvbs_muxes: Vec<DvbsMux>,
    pub dvbc_muxes: Vec<DvbcMux>,
    pub dvbt_muxes: Vec<DvbtMux>,
}

/// Result of importing an inventory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub updated: usize,
}

impl ImportStats {
    pub fn total_changes(&self) -> usize {
        self.inserted + self.updated
    }
}

impl Database {
    /// Merge an inventory into the database in one write transaction.
    pub fn import_inventory(&mut self, inventory: &Inventory) -> Result<ImportStats> {
        let txn = self.write_txn()?;
        let mut stats = ImportStats::default();

        for fe in &inventory.frontends {
            merge(&txn, &mut stats, fe, |new, old| new.sub = old.sub)?;
        }
        for lnb in &inventory.lnbs {
            merge(&txn, &mut stats, lnb, |_, _| {})?;
        }
        for dish in &inventory.dishes {
            merge(&txn, &mut stats, dish, |new, old| {
                new.cur_usals_pos = old.cur_usals_pos;
                new.target_usals_pos = old.target_usals_pos;
            })?;
        }
        for sat in &inventory.satellites {
            merge(&txn, &mut stats, sat, |new, old| new.band_scans = old.band_scans)?;
        }
        for mux in &inventory.dvbs_muxes {
            merge(&txn, &mut stats, mux, |new, old| new.c = old.c)?;
        }
        for mux in &inventory.dvbc_muxes {
            merge(&txn, &mut stats, mux, |new, old| new.c = old.c)?;
        }
        for mux in &inventory.dvbt_muxes {
            merge(&txn, &mut stats, mux, |new, old| new.c = old.c)?;
        }

        txn.commit()?;
        log::info!(
            "Inventory imported: {} inserted, {} updated",
            stats.inserted,
            stats.updated
        );
        Ok(stats)
    }
}

/// Upsert one record, carrying state over from the stored version.
fn merge<R: Record + Clone>(
    txn: &Txn<'_>,
    stats: &mut ImportStats,
    record: &R,
    keep: impl FnOnce(&mut R, R),
) -> Result<()> {
    let mut new = record.clone();
    match txn.find_by_key::<R>(&record.key())? {
        Some(old) => {
            keep(&mut new, old);
            stats.updated += 1;
        }
        None => stats.inserted += 1,
    }
    txn.put_record(&new)
}
