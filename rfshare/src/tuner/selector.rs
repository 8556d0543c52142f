//! Best-resource selection.
//!
//! This module provides:
//! - [`find_best_fe_for_lnb`]: best frontend behind one RF path
//! - [`find_best_fe_for_dvbc_dvbt`]: best cable/terrestrial frontend
//! - [`find_fe_and_lnb_for_tuning_to_mux`] and
//!   [`find_fe_and_lnb_for_tuning_to_band`]: best LNB, connection and
//!   frontend for a satellite mux or band
//!
//! Frontends are compared by spectrum capability, then static priority,
//! then whether they are the frontend currently used by the request.
//! LNB candidates are compared by network priority (minus a penalty when
//! the dish has to move), then connection priority, then the priority of
//! the chosen frontend (plus a bonus when an already tuned tuner is reused).

use std::collections::HashMap;

use log::{debug, error};

use rfshare_types::{
    DelsysType, Dish, DvbsMux, FeKey, Frontend, Lnb, LnbConnection, LnbNetwork, Polarisation,
    SubBand,
};

use super::conflict::{check_against, Footprint, ResourceUsage};
use super::context::AllocContext;
use super::options::TuneOptions;
use crate::database::{Result, Txn};

/// Capabilities a frontend must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeRequirements {
    pub need_blind_tune: bool,
    pub need_spectrum: bool,
    pub need_multistream: bool,
    pub symbol_rate: Option<u32>,
    /// Frequency as seen by the frontend, in kHz.
    pub frequency: Option<u32>,
}

impl FeRequirements {
    fn is_met_by(&self, fe: &Frontend) -> bool {
        (!self.need_blind_tune || fe.caps.supports_blindscan)
            && (!self.need_spectrum || fe.caps.spectrum_method.rank() > 0)
            && (!self.need_multistream || fe.caps.supports_multistream)
            && self.symbol_rate.map_or(true, |sr| fe.supports_symbol_rate(sr))
            && self.frequency.map_or(true, |f| fe.supports_frequency(f))
    }
}

/// Winning LNB, connection and frontend for a satellite request.
#[derive(Debug, Clone)]
pub struct FeLnbChoice {
    pub fe: Frontend,
    pub lnb: Lnb,
    pub footprint: Footprint,
    pub usage: ResourceUsage,
    /// The dish is not at the position needed for the satellite.
    pub needs_move: bool,
}

/// Whether a frontend is held by a live reservation other than `fe_to_release`.
fn is_busy(fe: &Frontend, ctx: &AllocContext, fe_to_release: Option<&FeKey>) -> bool {
    fe.sub.is_reserved() && fe_to_release != Some(&fe.k) && ctx.is_owner_alive(fe.sub.owner)
}

/// Whether another frontend of the same adapter is live-reserved for a
/// different delivery system family.
fn adapter_busy_elsewhere(
    frontends: &[Frontend],
    fe: &Frontend,
    delsys_type: DelsysType,
    ctx: &AllocContext,
    fe_to_release: Option<&FeKey>,
) -> bool {
    frontends.iter().any(|other| {
        other.k != fe.k
            && other.k.adapter_mac_address == fe.k.adapter_mac_address
            && other.sub.delsys_type.map_or(false, |t| t != delsys_type)
            && is_busy(other, ctx, fe_to_release)
    })
}

/// Best frontend reaching the RF path of `footprint`.
///
/// With `ignore_subscriptions` set, reservations are disregarded; this
/// answers whether the request could ever be served.
pub fn find_best_fe_for_lnb(
    frontends: &[Frontend],
    ctx: &AllocContext,
    footprint: &Footprint,
    req: &FeRequirements,
    fe_to_release: Option<&FeKey>,
    ignore_subscriptions: bool,
) -> Option<(Frontend, ResourceUsage)> {
    let rf_path = &footprint.rf_path;
    let mut best: Option<((i32, i32, bool), &Frontend, ResourceUsage)> = None;

    for fe in frontends {
        if fe.card_mac_address != rf_path.card_mac_address
            || !fe.has_rf_input(rf_path.rf_input)
            || !fe.supports(DelsysType::Sat)
            || !req.is_met_by(fe)
        {
            continue;
        }

        let usage = if ignore_subscriptions {
            ResourceUsage::default()
        } else {
            if is_busy(fe, ctx, fe_to_release)
                || adapter_busy_elsewhere(frontends, fe, DelsysType::Sat, ctx, fe_to_release)
            {
                continue;
            }
            match check_against(frontends, ctx, footprint, fe_to_release) {
                Some(usage) => usage,
                None => continue,
            }
        };

        let rank = fe.caps.spectrum_method.rank();
        let spectrum_score = if req.need_spectrum { rank } else { -rank };
        let is_current = fe_to_release == Some(&fe.k);
        let score = (spectrum_score, fe.priority, is_current);

        if best.as_ref().map_or(true, |(b, _, _)| score > *b) {
            best = Some((score, fe, usage));
        }
    }

    best.map(|(_, fe, usage)| (fe.clone(), usage))
}

/// Best cable or terrestrial frontend.
#[allow(clippy::too_many_arguments)]
pub fn find_best_fe_for_dvbc_dvbt(
    frontends: &[Frontend],
    ctx: &AllocContext,
    delsys_type: DelsysType,
    req: &FeRequirements,
    options: &TuneOptions,
    fe_to_release: Option<&FeKey>,
    ignore_subscriptions: bool,
) -> Option<Frontend> {
    let mut best: Option<((i32, bool), &Frontend)> = None;

    for fe in frontends {
        if !fe.supports(delsys_type) || !req.is_met_by(fe) || !options.allows_card(fe.card_mac_address)
        {
            continue;
        }
        if !ignore_subscriptions
            && (is_busy(fe, ctx, fe_to_release)
                || frontends.iter().any(|other| {
                    other.k != fe.k
                        && other.k.adapter_mac_address == fe.k.adapter_mac_address
                        && is_busy(other, ctx, fe_to_release)
                }))
        {
            continue;
        }

        let score = (fe.priority, fe_to_release == Some(&fe.k));
        if best.as_ref().map_or(true, |(b, _)| score > *b) {
            best = Some((score, fe));
        }
    }

    best.map(|(_, fe)| fe.clone())
}

/// What a satellite request needs from an LNB.
#[derive(Debug, Clone, Copy)]
enum SatTarget {
    Mux {
        sat_pos: i16,
        frequency: u32,
        pol: Polarisation,
        symbol_rate: u32,
        stream_id: i32,
    },
    Band {
        sat_pos: i16,
        pol: Polarisation,
        band: SubBand,
    },
}

impl SatTarget {
    fn sat_pos(&self) -> i16 {
        match *self {
            SatTarget::Mux { sat_pos, .. } | SatTarget::Band { sat_pos, .. } => sat_pos,
        }
    }

    fn pol(&self) -> Polarisation {
        match *self {
            SatTarget::Mux { pol, .. } | SatTarget::Band { pol, .. } => pol,
        }
    }

    /// Band to use on this LNB, if the LNB can receive the target at all.
    fn band_on(&self, lnb: &Lnb) -> Option<SubBand> {
        match *self {
            SatTarget::Mux { frequency, .. } => lnb.band_for_frequency(frequency),
            SatTarget::Band { band, .. } => lnb.has_band(band).then_some(band),
        }
    }

    fn requirements(&self, lnb: &Lnb, band: SubBand, options: &TuneOptions) -> FeRequirements {
        match *self {
            SatTarget::Mux {
                frequency,
                symbol_rate,
                stream_id,
                ..
            } => {
                let lof = match band {
                    SubBand::Low => lnb.lof_low,
                    SubBand::High => lnb.lof_high,
                };
                FeRequirements {
                    need_blind_tune: options.use_blind_tune,
                    need_spectrum: false,
                    need_multistream: stream_id >= 0,
                    symbol_rate: Some(symbol_rate),
                    frequency: Some(frequency.abs_diff(lof)),
                }
            }
            SatTarget::Band { .. } => FeRequirements {
                need_blind_tune: options.use_blind_tune,
                need_spectrum: options.need_spectrum,
                ..Default::default()
            },
        }
    }

    fn describe(&self) -> String {
        match *self {
            SatTarget::Mux {
                sat_pos,
                frequency,
                pol,
                ..
            } => format!("mux {}{} on sat {}", frequency / 1000, pol, sat_pos),
            SatTarget::Band { sat_pos, pol, band } => {
                format!("sat {} pol {} band {:?}", sat_pos, pol, band)
            }
        }
    }
}

/// Best LNB, connection and frontend for a satellite mux.
pub fn find_fe_and_lnb_for_tuning_to_mux(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    mux: &DvbsMux,
    options: &TuneOptions,
    fe_to_release: Option<&FeKey>,
    ignore_subscriptions: bool,
) -> Result<Option<FeLnbChoice>> {
    let target = SatTarget::Mux {
        sat_pos: mux.k.sat_pos,
        frequency: mux.frequency,
        pol: mux.pol,
        symbol_rate: mux.symbol_rate,
        stream_id: mux.stream_id,
    };
    find_fe_and_lnb(txn, ctx, target, options, fe_to_release, ignore_subscriptions)
}

/// Best LNB, connection and frontend for one band of a satellite.
#[allow(clippy::too_many_arguments)]
pub fn find_fe_and_lnb_for_tuning_to_band(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    sat_pos: i16,
    pol: Polarisation,
    band: SubBand,
    options: &TuneOptions,
    fe_to_release: Option<&FeKey>,
    ignore_subscriptions: bool,
) -> Result<Option<FeLnbChoice>> {
    let target = SatTarget::Band { sat_pos, pol, band };
    find_fe_and_lnb(txn, ctx, target, options, fe_to_release, ignore_subscriptions)
}

/// How an LNB network is reached: position and dish move needed.
struct NetworkAccess {
    priority: i32,
    usals_pos: Option<i16>,
    dish_movable: bool,
    needs_move: bool,
}

fn network_access(
    lnb: &Lnb,
    network: &LnbNetwork,
    dish: Option<&Dish>,
    options: &TuneOptions,
) -> NetworkAccess {
    let priority = if network.priority >= 0 {
        network.priority
    } else {
        lnb.priority
    };
    match dish {
        Some(dish) if dish.movable => {
            let needs_move = !dish.is_at(network.usals_pos);
            NetworkAccess {
                priority: if needs_move {
                    priority - options.dish_move_penalty
                } else {
                    priority
                },
                usals_pos: Some(network.usals_pos),
                dish_movable: true,
                needs_move,
            }
        }
        _ => NetworkAccess {
            priority,
            usals_pos: None,
            dish_movable: false,
            needs_move: false,
        },
    }
}

fn connection_usable(
    lnb: &Lnb,
    conn: &LnbConnection,
    access: &NetworkAccess,
    options: &TuneOptions,
) -> bool {
    if !conn.enabled {
        return false;
    }
    let rf_path = conn.rf_path(lnb.k);
    if !options.allows_rf_path(&rf_path) || !options.allows_card(conn.card_mac_address) {
        return false;
    }
    // Only a connection wired to the positioner may rotate the dish.
    !access.needs_move || (options.may_move_dish && conn.rotor_control.can_move_dish())
}

fn find_fe_and_lnb(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    target: SatTarget,
    options: &TuneOptions,
    fe_to_release: Option<&FeKey>,
    ignore_subscriptions: bool,
) -> Result<Option<FeLnbChoice>> {
    let frontends = txn.list::<Frontend>()?;
    let dishes: HashMap<i32, Dish> = txn
        .list::<Dish>()?
        .into_iter()
        .map(|d| (d.dish_id, d))
        .collect();

    let mut best: Option<((i32, i32, i32), FeLnbChoice)> = None;

    for lnb in txn.list::<Lnb>()? {
        if !lnb.enabled || !lnb.can_be_used || !options.allows_dish(lnb.k.dish_id) {
            continue;
        }
        if !lnb.pol_type.can_pol(target.pol()) {
            continue;
        }
        let Some(band) = target.band_on(&lnb) else {
            continue;
        };
        let Some(network) = lnb.network(target.sat_pos()) else {
            continue;
        };
        let dish = dishes.get(&lnb.k.dish_id);
        if dish.map_or(false, |d| !d.enabled) {
            continue;
        }
        let access = network_access(&lnb, network, dish, options);
        let req = target.requirements(&lnb, band, options);

        for conn in &lnb.connections {
            if !connection_usable(&lnb, conn, &access, options) {
                continue;
            }
            let footprint = Footprint {
                owner: ctx.own_pid,
                rf_path: conn.rf_path(lnb.k),
                dish_movable: access.dish_movable,
                rf_coupler_id: conn.rf_coupler_id,
                sat_pos: Some(target.sat_pos()),
                pol: Some(target.pol()),
                band: Some(band),
                usals_pos: access.usals_pos,
            };
            let Some((fe, usage)) = find_best_fe_for_lnb(
                &frontends,
                ctx,
                &footprint,
                &req,
                fe_to_release,
                ignore_subscriptions,
            ) else {
                continue;
            };

            let bonus = if usage.shares_tuner() {
                options.resource_reuse_bonus
            } else {
                0
            };
            let score = (access.priority, conn.priority, fe.priority + bonus);
            if best.as_ref().map_or(true, |(b, _)| score > *b) {
                best = Some((
                    score,
                    FeLnbChoice {
                        fe,
                        lnb: lnb.clone(),
                        footprint,
                        usage,
                        needs_move: access.needs_move,
                    },
                ));
            }
        }
    }

    if best.is_none() && !ignore_subscriptions {
        if options.subscription_type.is_scan() {
            debug!("No free LNB/frontend for {}", target.describe());
        } else {
            error!(
                "Could not find an available LNB/frontend for {}",
                target.describe()
            );
        }
    }
    Ok(best.map(|(_, choice)| choice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::testutil::*;
    use rfshare_types::{SpectrumMethod, SubscriptionId};

    fn footprint(card: i64) -> Footprint {
        Footprint {
            owner: OWN_PID,
            rf_path: rfshare_types::RfPath::new(LNB_1, card, 0),
            dish_movable: false,
            rf_coupler_id: None,
            sat_pos: Some(1920),
            pol: Some(Polarisation::H),
            band: Some(SubBand::Low),
            usals_pos: None,
        }
    }

    #[test]
    fn test_spectrum_rule() {
        let ctx = test_ctx();
        let mut fft = sat_frontend(ADAPTER_A0, CARD_A, &[0]);
        fft.caps.spectrum_method = SpectrumMethod::Fft;
        let mut sweep = sat_frontend(ADAPTER_A1, CARD_A, &[0]);
        sweep.caps.spectrum_method = SpectrumMethod::Sweep;
        sweep.priority = 5;
        let fes = vec![fft, sweep];

        let spectrum = FeRequirements {
            need_spectrum: true,
            ..Default::default()
        };
        let (fe, _) =
            find_best_fe_for_lnb(&fes, &ctx, &footprint(CARD_A), &spectrum, None, false).unwrap();
        assert_eq!(fe.k, ADAPTER_A0_FE);

        // Without a spectrum request the FFT frontend is kept free.
        let plain = FeRequirements::default();
        let (fe, _) =
            find_best_fe_for_lnb(&fes, &ctx, &footprint(CARD_A), &plain, None, false).unwrap();
        assert_eq!(fe.k, ADAPTER_A1_FE);
    }

    #[test]
    fn test_priority_then_current_adapter() {
        let ctx = test_ctx();
        let a = sat_frontend(ADAPTER_A0, CARD_A, &[0]);
        let b = sat_frontend(ADAPTER_A1, CARD_A, &[0]);
        let fes = vec![a, b];
        let req = FeRequirements::default();

        let (fe, _) = find_best_fe_for_lnb(&fes, &ctx, &footprint(CARD_A), &req, None, false).unwrap();
        assert_eq!(fe.k, ADAPTER_A0_FE);

        let current = ADAPTER_A1_FE;
        let (fe, _) =
            find_best_fe_for_lnb(&fes, &ctx, &footprint(CARD_A), &req, Some(&current), false)
                .unwrap();
        assert_eq!(fe.k, ADAPTER_A1_FE);

        // Higher priority still wins over the current adapter.
        let mut fes = fes;
        fes[0].priority = 1;
        let (fe, _) =
            find_best_fe_for_lnb(&fes, &ctx, &footprint(CARD_A), &req, Some(&current), false)
                .unwrap();
        assert_eq!(fe.k, ADAPTER_A0_FE);
    }

    #[test]
    fn test_busy_and_incapable_frontends_are_skipped() {
        let ctx = test_ctx();
        let mut busy = sat_frontend(ADAPTER_A0, CARD_A, &[0]);
        busy.sub.owner = OTHER_PID;
        busy.sub.subs.push(entry(SubscriptionId(9)));
        let mut slow = sat_frontend(ADAPTER_A1, CARD_A, &[0]);
        slow.caps.symbol_rate_max = 10_000_000;
        let fes = vec![busy, slow];

        let req = FeRequirements {
            symbol_rate: Some(27_500_000),
            ..Default::default()
        };
        assert!(find_best_fe_for_lnb(&fes, &ctx, &footprint(CARD_A), &req, None, false).is_none());
        assert!(find_best_fe_for_lnb(&fes, &ctx, &footprint(CARD_A), &req, None, true).is_some());
    }

    #[test]
    fn test_dvbc_skips_busy_adapter() {
        let ctx = test_ctx();
        let mut sat = sat_frontend(ADAPTER_A0, CARD_A, &[0]);
        sat.delsys.push(rfshare_types::DeliverySystem::DvbC);
        sat.enable_dvbc = true;
        let cable = cable_frontend(ADAPTER_C, 0, 0);
        let mut fes = vec![sat, cable];
        fes[0].priority = 10;

        let opts = TuneOptions::default();
        let req = FeRequirements::default();
        let fe = find_best_fe_for_dvbc_dvbt(&fes, &ctx, DelsysType::Cable, &req, &opts, None, false)
            .unwrap();
        assert_eq!(fe.k, ADAPTER_A0_FE);

        fes[0].sub.owner = OTHER_PID;
        fes[0].sub.subs.push(entry(SubscriptionId(3)));
        let fe = find_best_fe_for_dvbc_dvbt(&fes, &ctx, DelsysType::Cable, &req, &opts, None, false)
            .unwrap();
        assert_eq!(fe.k, FeKey::new(ADAPTER_C, 0));
        assert!(
            find_best_fe_for_dvbc_dvbt(&fes, &ctx, DelsysType::Terrestrial, &req, &opts, None, true)
                .is_none()
        );
    }

    #[test]
    fn test_mux_prefers_lnb_without_dish_move() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = test_ctx();
        {
            let txn = db.write_txn().unwrap();
            txn.put_record(&sat_frontend(ADAPTER_A0, CARD_A, &[0, 1])).unwrap();
            txn.put_record(&motor_dish(0, 1300)).unwrap();
            txn.put_record(&fixed_dish(1)).unwrap();
            // Motorised LNB on rf0 has higher priority but must move to 19.2E.
            let mut motor = universal_lnb(LNB_1, &[(CARD_A, 0)], 1920);
            motor.priority = 10;
            motor.connections[0].rotor_control = rfshare_types::RotorControl::MasterUsals;
            txn.put_record(&motor).unwrap();
            txn.put_record(&universal_lnb(LNB_2, &[(CARD_A, 1)], 1920)).unwrap();
            txn.commit().unwrap();
        }

        let txn = db.read_txn().unwrap();
        let mux = dvbs_mux(1920, 1, 11_494_000, Polarisation::H);
        let opts = TuneOptions::default();
        let choice = find_fe_and_lnb_for_tuning_to_mux(&txn, &ctx, &mux, &opts, None, false)
            .unwrap()
            .unwrap();
        assert_eq!(choice.lnb.k, LNB_2);
        assert!(!choice.needs_move);
        assert_eq!(choice.footprint.band, Some(SubBand::Low));

        let mut no_penalty = opts.clone();
        no_penalty.dish_move_penalty = 0;
        let choice = find_fe_and_lnb_for_tuning_to_mux(&txn, &ctx, &mux, &no_penalty, None, false)
            .unwrap()
            .unwrap();
        assert_eq!(choice.lnb.k, LNB_1);
        assert!(choice.needs_move);
        assert_eq!(choice.footprint.usals_pos, Some(1920));
    }

    #[test]
    fn test_restrictions_and_exhaustion() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = test_ctx();
        seed_single_lnb(&mut db);

        let txn = db.read_txn().unwrap();
        let mut opts = TuneOptions::default();
        opts.allowed_dish_ids = vec![5];
        assert!(find_fe_and_lnb_for_tuning_to_band(
            &txn,
            &ctx,
            1920,
            Polarisation::H,
            SubBand::High,
            &opts,
            None,
            false
        )
        .unwrap()
        .is_none());

        // Circular polarisation is not available on a linear LNB.
        let opts = TuneOptions::default();
        assert!(find_fe_and_lnb_for_tuning_to_band(
            &txn,
            &ctx,
            1920,
            Polarisation::L,
            SubBand::High,
            &opts,
            None,
            false
        )
        .unwrap()
        .is_none());

        let choice = find_fe_and_lnb_for_tuning_to_band(
            &txn,
            &ctx,
            1920,
            Polarisation::V,
            SubBand::High,
            &opts,
            None,
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(choice.fe.k, ADAPTER_A0_FE);
        assert!(choice.usage.is_master());
    }
}
