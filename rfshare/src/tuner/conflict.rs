//! Conflict checking between a candidate reservation and the live ones.
//!
//! A reservation controls the LNB exclusively when its polarisation, band
//! or satellite is left unspecified, and may move the dish when the dish
//! is motorised and no USALS position is pinned. Exclusive control cannot
//! coexist with any sharing of the affected resource. Shared resources
//! must agree on what they receive.

use log::debug;

use rfshare_types::{FeKey, FeSubscription, Frontend, Polarisation, RfPath, SubBand};

use super::context::AllocContext;
use crate::database::{Result, Txn};

/// Resources a reservation would occupy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footprint {
    pub owner: u32,
    pub rf_path: RfPath,
    pub dish_movable: bool,
    pub rf_coupler_id: Option<i32>,
    pub sat_pos: Option<i16>,
    pub pol: Option<Polarisation>,
    pub band: Option<SubBand>,
    pub usals_pos: Option<i16>,
}

impl Footprint {
    /// Whether the LNB's switching state (pol/band) is claimed exclusively.
    pub fn lnb_exclusive(&self) -> bool {
        self.sat_pos.is_none() || self.pol.is_none() || self.band.is_none()
    }

    /// Whether the dish may be rotated by this reservation.
    pub fn may_move_dish(&self) -> bool {
        self.dish_movable && self.usals_pos.is_none()
    }

    /// Footprint of an existing satellite reservation.
    pub fn from_subscription(sub: &FeSubscription) -> Option<Self> {
        Some(Self {
            owner: sub.owner,
            rf_path: sub.rf_path?,
            dish_movable: sub.dish_movable,
            rf_coupler_id: sub.rf_coupler_id,
            sat_pos: sub.sat_pos,
            pol: sub.pol,
            band: sub.band,
            usals_pos: sub.usals_pos,
        })
    }

    fn same_sat_band_pol(&self, other: &Footprint) -> bool {
        self.sat_pos.is_some()
            && self.sat_pos == other.sat_pos
            && self.pol == other.pol
            && self.band == other.band
    }
}

/// How many live reservations a candidate would share resources with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub lnb: u32,
    pub tuner: u32,
    pub rf_coupler: u32,
    pub dish: u32,
    /// Owner and config id of the reservations already on the tuner.
    pub shared_owner: Option<u32>,
    pub shared_config_id: Option<i32>,
}

impl ResourceUsage {
    /// The first user of every resource is allowed to control them.
    pub fn is_master(&self) -> bool {
        self.lnb == 0 && self.tuner == 0 && self.rf_coupler == 0 && self.dish == 0
    }

    pub fn shares_tuner(&self) -> bool {
        self.tuner > 0
    }
}

/// Check a candidate against the reservations stored in `txn`.
///
/// Returns `None` if the candidate conflicts with a live reservation.
pub fn check_for_resource_conflicts(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    candidate: &Footprint,
    fe_to_release: Option<&FeKey>,
) -> Result<Option<ResourceUsage>> {
    let frontends = txn.list::<Frontend>()?;
    Ok(check_against(&frontends, ctx, candidate, fe_to_release))
}

/// Like [`check_for_resource_conflicts`] on an already loaded snapshot.
pub fn check_against(
    frontends: &[Frontend],
    ctx: &AllocContext,
    candidate: &Footprint,
    fe_to_release: Option<&FeKey>,
) -> Option<ResourceUsage> {
    let mut usage = ResourceUsage::default();

    for fe in frontends {
        if !fe.sub.is_reserved() || fe_to_release == Some(&fe.k) {
            continue;
        }
        if !ctx.is_owner_alive(fe.sub.owner) {
            debug!(
                "Conflict check: ignoring reservation on {} of dead owner {}",
                fe.k, fe.sub.owner
            );
            continue;
        }
        let Some(other) = Footprint::from_subscription(&fe.sub) else {
            continue;
        };

        let same_lnb = other.rf_path.lnb == candidate.rf_path.lnb;
        let same_dish = other.rf_path.lnb.dish_id == candidate.rf_path.lnb.dish_id;
        let same_tuner = other.rf_path.tuner() == candidate.rf_path.tuner();
        let same_rf_coupler =
            candidate.rf_coupler_id.is_some() && other.rf_coupler_id == candidate.rf_coupler_id;
        let same_sat_band_pol = candidate.same_sat_band_pol(&other);
        let same_positioner = same_dish && (candidate.dish_movable || other.dish_movable);

        let lnb_exclusive = candidate.lnb_exclusive() || other.lnb_exclusive();
        if lnb_exclusive && (same_lnb || same_tuner || same_rf_coupler) {
            debug!("Conflict check: {} needs exclusive LNB control", fe.k);
            return None;
        }
        if same_dish && (candidate.may_move_dish() || other.may_move_dish()) {
            debug!("Conflict check: dish {} may move", other.rf_path.lnb.dish_id);
            return None;
        }
        if same_positioner && candidate.usals_pos != other.usals_pos {
            debug!(
                "Conflict check: dish {} is needed at another position",
                other.rf_path.lnb.dish_id
            );
            return None;
        }
        if same_lnb && !same_sat_band_pol {
            debug!("Conflict check: LNB {} is tuned elsewhere", other.rf_path.lnb);
            return None;
        }
        if same_tuner && !(same_lnb && same_sat_band_pol) {
            debug!("Conflict check: tuner of {} is tuned elsewhere", fe.k);
            return None;
        }
        if same_rf_coupler && !same_sat_band_pol {
            debug!("Conflict check: RF coupler of {} is tuned elsewhere", fe.k);
            return None;
        }

        if same_lnb {
            usage.lnb += 1;
        }
        if same_dish {
            usage.dish += 1;
        }
        if same_rf_coupler {
            usage.rf_coupler += 1;
        }
        if same_tuner {
            usage.tuner += 1;
            if let Some(shared) = usage.shared_config_id {
                assert_eq!(
                    shared,
                    fe.sub.config_id,
                    "reservations sharing tuner {:?} disagree on config id",
                    candidate.rf_path.tuner()
                );
            }
            usage.shared_owner = Some(fe.sub.owner);
            usage.shared_config_id = Some(fe.sub.config_id);
        }
    }

    Some(usage)
}
