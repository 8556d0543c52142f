//! Subscription manager: the public reservation API.
//!
//! Every entry point runs inside the caller's write transaction:
//! - an existing compatible reservation is reused when possible
//! - otherwise the caller's previous reservation is released and the
//!   selector picks new resources, which are written to the frontend
//!
//! When no resources are found, the previous reservation has already been
//! released inside the transaction; the caller decides whether to commit.

use log::{debug, info, warn};

use rfshare_types::{
    AnyMux, DelsysType, DvbsMux, FeKey, FeSubscription, Frontend, Lnb, LnbKey, Mux, MuxKey, MuxRef,
    Polarisation, RfPath, ServiceKey, SubBand, SubscriptionEntry, SubscriptionId,
};

use super::conflict::{Footprint, ResourceUsage};
use super::context::AllocContext;
use super::dish::{plan_dish_move, DishPlan};
use super::options::TuneOptions;
use super::selector::{
    find_best_fe_for_dvbc_dvbt, find_best_fe_for_lnb, find_fe_and_lnb_for_tuning_to_band,
    find_fe_and_lnb_for_tuning_to_mux, FeRequirements,
};
use crate::database::{Result, Txn};

/// How a granted subscription relates to what was reserved before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// A frontend was newly reserved.
    NewActiveAdapter,
    /// The subscription kept its frontend and tunes it elsewhere.
    Retune,
    /// The request is already served.
    NoChange,
    /// Attached to a frontend already tuned for another subscription.
    ReuseOther(SubscriptionId),
    /// Same mux, different service.
    NewService,
}

/// A granted reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribed {
    pub subscription_id: SubscriptionId,
    pub change: SubscriptionChange,
    pub fe_key: FeKey,
    /// `None` for cable and terrestrial reservations.
    pub rf_path: Option<RfPath>,
    pub config_id: i32,
    /// Whether this reservation has to send LNB switching commands.
    pub send_lnb_commands: bool,
    pub dish_plan: DishPlan,
}

impl Subscribed {
    /// Whether the device layer has to set up a new active adapter.
    pub fn is_new_aa(&self) -> bool {
        self.change == SubscriptionChange::NewActiveAdapter
    }

    /// Whether the device layer has to tune at all.
    pub fn needs_tune(&self) -> bool {
        matches!(
            self.change,
            SubscriptionChange::NewActiveAdapter | SubscriptionChange::Retune
        )
    }

    pub fn lnb(&self) -> Option<LnbKey> {
        self.rf_path.map(|p| p.lnb)
    }
}

/// Result of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Granted(Subscribed),
    /// Resources exist but are in use; try again later.
    Contended,
    /// No hardware could serve the request even if everything were free.
    PermanentlyImpossible,
}

impl ReservationOutcome {
    pub fn granted(&self) -> Option<&Subscribed> {
        match self {
            ReservationOutcome::Granted(s) => Some(s),
            _ => None,
        }
    }
}

/// Read-only view of one reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub fe_key: FeKey,
    pub owner: u32,
    pub owner_alive: bool,
    pub sub: FeSubscription,
}

/// Frontend holding an entry for `sid` of this process.
fn find_own_entry(frontends: &[Frontend], ctx: &AllocContext, sid: SubscriptionId) -> Option<usize> {
    frontends
        .iter()
        .position(|fe| fe.sub.owner == ctx.own_pid && fe.sub.entry(sid).is_some())
}

/// Remove `sid` from whatever frontend holds it, without complaining if absent.
/// Returns the frontend if it is vacant afterwards.
pub(crate) fn release_entry(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    sid: SubscriptionId,
) -> Result<Option<FeKey>> {
    let mut frontends = txn.list::<Frontend>()?;
    let Some(idx) = find_own_entry(&frontends, ctx, sid) else {
        return Ok(None);
    };
    let fe = &mut frontends[idx];
    fe.sub.remove(sid);
    txn.put_record(fe)?;
    debug!("Released subscription {} on {}", sid, fe.k);
    Ok((!fe.sub.is_reserved()).then_some(fe.k))
}

/// Release a subscription.
///
/// Returns the frontend it was on, or `None` (with a warning and no
/// mutation) if the subscription does not exist.
pub fn unsubscribe(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    sid: SubscriptionId,
) -> Result<Option<FeKey>> {
    let mut frontends = txn.list::<Frontend>()?;
    let Some(idx) = find_own_entry(&frontends, ctx, sid) else {
        warn!("Unsubscribe: subscription {} not found", sid);
        return Ok(None);
    };
    let fe = &mut frontends[idx];
    fe.sub.remove(sid);
    txn.put_record(fe)?;
    info!("Subscription {} released {}", sid, fe.k);
    Ok(Some(fe.k))
}

fn new_entry(sid: SubscriptionId, has_mux: bool, service: Option<ServiceKey>) -> SubscriptionEntry {
    SubscriptionEntry {
        subscription_id: sid,
        has_mux,
        service,
    }
}

fn subscribed(sid: SubscriptionId, change: SubscriptionChange, fe: &Frontend) -> Subscribed {
    Subscribed {
        subscription_id: sid,
        change,
        fe_key: fe.k,
        rf_path: fe.sub.rf_path,
        config_id: fe.sub.config_id,
        send_lnb_commands: false,
        dish_plan: DishPlan::None,
    }
}

fn sat_params(mux: MuxRef<'_>) -> Option<&DvbsMux> {
    match mux {
        MuxRef::Sat(m) => Some(m),
        _ => None,
    }
}

fn mux_key_of(mux: MuxRef<'_>) -> MuxKey {
    match mux {
        MuxRef::Sat(m) => m.k,
        MuxRef::Cable(m) => m.k,
        MuxRef::Terrestrial(m) => m.k,
    }
}

fn mux_delsys_type(mux: MuxRef<'_>) -> DelsysType {
    match mux {
        MuxRef::Sat(_) => DelsysType::Sat,
        MuxRef::Cable(_) => DelsysType::Cable,
        MuxRef::Terrestrial(_) => DelsysType::Terrestrial,
    }
}

fn mux_frequency(mux: MuxRef<'_>) -> u32 {
    match mux {
        MuxRef::Sat(m) => m.frequency,
        MuxRef::Cable(m) => m.frequency,
        MuxRef::Terrestrial(m) => m.frequency,
    }
}

/// Whether the subscription's own reservation on `fe` can be retuned to `mux`
/// without selecting new resources.
fn can_retune_in_place(txn: &Txn<'_>, fe: &Frontend, mux: MuxRef<'_>) -> Result<bool> {
    let sub = &fe.sub;
    if sub.subs.len() != 1 || sub.delsys_type != Some(mux_delsys_type(mux)) {
        return Ok(false);
    }
    let Some(sat_mux) = sat_params(mux) else {
        return Ok(fe.supports(mux_delsys_type(mux)));
    };

    let Some(rf_path) = sub.rf_path else {
        return Ok(false);
    };
    let Some(lnb) = txn.find_by_key::<Lnb>(&rf_path.lnb)? else {
        return Ok(false);
    };
    let Some(band) = lnb.band_for_frequency(sat_mux.frequency) else {
        return Ok(false);
    };
    if !lnb.pol_type.can_pol(sat_mux.pol) || !fe.supports_symbol_rate(sat_mux.symbol_rate) {
        return Ok(false);
    }
    let Some(network) = lnb.network(sat_mux.k.sat_pos) else {
        return Ok(false);
    };
    if sub.dish_movable && sub.usals_pos.is_some() && sub.usals_pos != Some(network.usals_pos) {
        return Ok(false);
    }

    let footprint = Footprint::from_subscription(sub);
    let exclusive = footprint.as_ref().map_or(false, |f| f.lnb_exclusive());
    Ok(exclusive
        || (sub.sat_pos == Some(sat_mux.k.sat_pos)
            && sub.pol == Some(sat_mux.pol)
            && sub.band == Some(band)))
}

/// Find a reservation that already serves (or can cheaply serve) `mux`.
///
/// Read only; see [`subscribe_mux`] for how a match is applied.
pub fn matching_existing_subscription(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    sid: SubscriptionId,
    mux: MuxRef<'_>,
    service: Option<&ServiceKey>,
) -> Result<Option<(SubscriptionChange, FeKey)>> {
    let key = mux_key_of(mux);
    let frontends = txn.list::<Frontend>()?;
    let own = find_own_entry(&frontends, ctx, sid).map(|idx| &frontends[idx]);

    if let Some(fe) = own {
        if fe.sub.mux_key == Some(key) {
            let same_service = fe.sub.entry(sid).map_or(false, |e| e.service.as_ref() == service);
            let change = if same_service {
                SubscriptionChange::NoChange
            } else {
                SubscriptionChange::NewService
            };
            return Ok(Some((change, fe.k)));
        }
    }

    let other = frontends.iter().find(|fe| {
        fe.sub.owner == ctx.own_pid
            && fe.sub.mux_key == Some(key)
            && fe.sub.entry(sid).is_none()
            && fe.sub.delsys_type == Some(mux_delsys_type(mux))
    });
    if let Some(fe) = other {
        if let Some(first) = fe.sub.subs.first() {
            return Ok(Some((
                SubscriptionChange::ReuseOther(first.subscription_id),
                fe.k,
            )));
        }
    }

    if let Some(fe) = own {
        if can_retune_in_place(txn, fe, mux)? {
            return Ok(Some((SubscriptionChange::Retune, fe.k)));
        }
    }
    Ok(None)
}

/// Apply a match found by [`matching_existing_subscription`].
#[allow(clippy::too_many_arguments)]
fn apply_existing_match(
    txn: &Txn<'_>,
    ctx: &AllocContext,
    sid: SubscriptionId,
    change: SubscriptionChange,
    fe_key: FeKey,
    mux: MuxRef<'_>,
    service: Option<ServiceKey>,
    options: &TuneOptions,
) -> Result<Subscribed> {
    if let SubscriptionChange::ReuseOther(_) = change {
        release_entry(txn, ctx, sid)?;
    }
    let mut fe = txn.get::<Frontend>(&fe_key)?;

    let mut send_lnb_commands = false;
    match change {
        SubscriptionChange::NoChange => {}
        SubscriptionChange::NewService => {
            if let Some(entry) = fe.sub.entry_mut(sid) {
                entry.service = service;
            }
        }
        SubscriptionChange::ReuseOther(other) => {
            info!("Subscription {} reuses {} of subscription {}", sid, fe.k, other);
            fe.sub.subs.push(new_entry(sid, true, service));
        }
        SubscriptionChange::Retune => {
            fe.sub.mux_key = Some(mux_key_of(mux));
            fe.sub.frequency = Some(mux_frequency(mux));
            if let Some(entry) = fe.sub.entry_mut(sid) {
                entry.has_mux = true;
                entry.service = service;
            }
            send_lnb_commands = options.may_control_lnb
                && Footprint::from_subscription(&fe.sub).map_or(false, |f| f.lnb_exclusive());
        }
        SubscriptionChange::NewActiveAdapter => {}
    }
    if change != SubscriptionChange::NoChange {
        txn.put_record(&fe)?;
    }

    let mut result = subscribed(sid, change, &fe);
    result.send_lnb_commands = send_lnb_commands;
    Ok(result)
}

/// Distinguish "busy now" from "never possible" after a failed selection.
fn classify_failure(possible: bool) -> ReservationOutcome {
    if possible {
        ReservationOutcome::Contended
    } else {
        ReservationOutcome::PermanentlyImpossible
    }
}

/// Write a satellite reservation to the chosen frontend.
#[allow(clippy::too_many_arguments)]
fn write_sat_reservation(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: SubscriptionId,
    mut fe: Frontend,
    footprint: &Footprint,
    usage: &ResourceUsage,
    mux: Option<&DvbsMux>,
    service: Option<ServiceKey>,
    old_fe: Option<FeKey>,
    options: &TuneOptions,
) -> Result<Subscribed> {
    let config_id = match (usage.shared_owner, usage.shared_config_id) {
        (Some(owner), Some(id)) => {
            debug!("Joining tuner chain {} of owner {}", id, owner);
            id
        }
        _ => ctx.seq.next_config_id(),
    };
    if fe.sub.is_reserved() {
        debug!(
            "Reclaiming {} from dead owner {}",
            fe.k, fe.sub.owner
        );
    }
    fe.sub = FeSubscription {
        owner: ctx.own_pid,
        config_id,
        delsys_type: Some(DelsysType::Sat),
        rf_path: Some(footprint.rf_path),
        dish_movable: footprint.dish_movable,
        rf_coupler_id: footprint.rf_coupler_id,
        sat_pos: footprint.sat_pos,
        pol: footprint.pol,
        band: footprint.band,
        usals_pos: footprint.usals_pos,
        mux_key: mux.map(|m| m.k),
        frequency: mux.map(|m| m.frequency),
        subs: vec![new_entry(sid, mux.is_some(), service)],
    };
    txn.put_record(&fe)?;

    let dish_plan = plan_dish_move(txn, footprint, usage, options)?;
    let change = if old_fe == Some(fe.k) {
        SubscriptionChange::Retune
    } else {
        SubscriptionChange::NewActiveAdapter
    };
    info!(
        "Subscription {} reserved {} via {} (config {})",
        sid, fe.k, footprint.rf_path, config_id
    );

    let mut result = subscribed(sid, change, &fe);
    result.send_lnb_commands = options.may_control_lnb
        && usage.lnb == 0
        && usage.tuner == 0
        && usage.rf_coupler == 0;
    result.dish_plan = dish_plan;
    Ok(result)
}

/// Reserve a frontend and LNB for a satellite mux.
#[allow(clippy::too_many_arguments)]
pub fn reserve_fe_lnb_for_mux(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: SubscriptionId,
    mux: &DvbsMux,
    service: Option<ServiceKey>,
    options: &TuneOptions,
    old_fe: Option<FeKey>,
) -> Result<ReservationOutcome> {
    let Some(choice) =
        find_fe_and_lnb_for_tuning_to_mux(txn, ctx, mux, options, old_fe.as_ref(), false)?
    else {
        let possible =
            find_fe_and_lnb_for_tuning_to_mux(txn, ctx, mux, options, None, true)?.is_some();
        return Ok(classify_failure(possible));
    };
    let subscribed = write_sat_reservation(
        txn,
        ctx,
        sid,
        choice.fe,
        &choice.footprint,
        &choice.usage,
        Some(mux),
        service,
        old_fe,
        options,
    )?;
    Ok(ReservationOutcome::Granted(subscribed))
}

/// Reserve a frontend and LNB for one band of a satellite.
#[allow(clippy::too_many_arguments)]
pub fn reserve_fe_lnb_for_sat_band(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: SubscriptionId,
    sat_pos: i16,
    pol: Polarisation,
    band: SubBand,
    options: &TuneOptions,
    old_fe: Option<FeKey>,
) -> Result<ReservationOutcome> {
    let Some(choice) = find_fe_and_lnb_for_tuning_to_band(
        txn,
        ctx,
        sat_pos,
        pol,
        band,
        options,
        old_fe.as_ref(),
        false,
    )?
    else {
        let possible =
            find_fe_and_lnb_for_tuning_to_band(txn, ctx, sat_pos, pol, band, options, None, true)?
                .is_some();
        return Ok(classify_failure(possible));
    };
    let subscribed = write_sat_reservation(
        txn,
        ctx,
        sid,
        choice.fe,
        &choice.footprint,
        &choice.usage,
        None,
        None,
        old_fe,
        options,
    )?;
    Ok(ReservationOutcome::Granted(subscribed))
}

/// Reserve a frontend for a cable or terrestrial mux.
pub fn reserve_fe_for_dvbc_or_dvbt_mux(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: SubscriptionId,
    mux: MuxRef<'_>,
    service: Option<ServiceKey>,
    options: &TuneOptions,
    old_fe: Option<FeKey>,
) -> Result<ReservationOutcome> {
    let (delsys_type, req) = match mux {
        MuxRef::Cable(m) => (
            DelsysType::Cable,
            FeRequirements {
                symbol_rate: Some(m.symbol_rate),
                frequency: Some(m.frequency),
                ..Default::default()
            },
        ),
        MuxRef::Terrestrial(m) => (
            DelsysType::Terrestrial,
            FeRequirements {
                need_multistream: m.stream_id >= 0,
                frequency: Some(m.frequency),
                ..Default::default()
            },
        ),
        MuxRef::Sat(m) => {
            return reserve_fe_lnb_for_mux(txn, ctx, sid, m, service, options, old_fe);
        }
    };

    let frontends = txn.list::<Frontend>()?;
    let best = find_best_fe_for_dvbc_dvbt(
        &frontends,
        ctx,
        delsys_type,
        &req,
        options,
        old_fe.as_ref(),
        false,
    );
    let Some(mut fe) = best else {
        let possible = find_best_fe_for_dvbc_dvbt(
            &frontends,
            ctx,
            delsys_type,
            &req,
            options,
            None,
            true,
        )
        .is_some();
        if !possible && !options.subscription_type.is_scan() {
            log::error!(
                "Could not find an available {} frontend for mux {}",
                delsys_type.name(),
                mux_key_of(mux)
            );
        }
        return Ok(classify_failure(possible));
    };

    fe.sub = FeSubscription {
        owner: ctx.own_pid,
        config_id: ctx.seq.next_config_id(),
        delsys_type: Some(delsys_type),
        mux_key: Some(mux_key_of(mux)),
        frequency: Some(mux_frequency(mux)),
        subs: vec![new_entry(sid, true, service)],
        ..Default::default()
    };
    txn.put_record(&fe)?;
    info!("Subscription {} reserved {} for {}", sid, fe.k, delsys_type.name());

    let change = if old_fe == Some(fe.k) {
        SubscriptionChange::Retune
    } else {
        SubscriptionChange::NewActiveAdapter
    };
    Ok(ReservationOutcome::Granted(subscribed(sid, change, &fe)))
}

/// Subscribe to a mux of any delivery system.
///
/// A `None` subscription id allocates a new one.
pub fn subscribe_mux<M: Mux>(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: Option<SubscriptionId>,
    mux: &M,
    service: Option<ServiceKey>,
    options: &TuneOptions,
) -> Result<ReservationOutcome> {
    let sid = sid.unwrap_or_else(|| ctx.seq.next_subscription_id());
    let mux = mux.mux_ref();

    if let Some((change, fe_key)) =
        matching_existing_subscription(txn, ctx, sid, mux, service.as_ref())?
    {
        let subscribed =
            apply_existing_match(txn, ctx, sid, change, fe_key, mux, service, options)?;
        return Ok(ReservationOutcome::Granted(subscribed));
    }

    let old_fe = release_entry(txn, ctx, sid)?;
    match mux {
        MuxRef::Sat(m) => reserve_fe_lnb_for_mux(txn, ctx, sid, m, service, options, old_fe),
        MuxRef::Cable(_) | MuxRef::Terrestrial(_) => {
            reserve_fe_for_dvbc_or_dvbt_mux(txn, ctx, sid, mux, service, options, old_fe)
        }
    }
}

/// [`subscribe_mux`] for a mux of unknown variant.
pub fn subscribe_any_mux(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: Option<SubscriptionId>,
    mux: &AnyMux,
    service: Option<ServiceKey>,
    options: &TuneOptions,
) -> Result<ReservationOutcome> {
    match mux {
        AnyMux::Sat(m) => subscribe_mux(txn, ctx, sid, m, service, options),
        AnyMux::Cable(m) => subscribe_mux(txn, ctx, sid, m, service, options),
        AnyMux::Terrestrial(m) => subscribe_mux(txn, ctx, sid, m, service, options),
    }
}

/// Subscribe to one band of a satellite, e.g. for a spectrum scan.
#[allow(clippy::too_many_arguments)]
pub fn subscribe_sat_band(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: Option<SubscriptionId>,
    sat_pos: i16,
    pol: Polarisation,
    band: SubBand,
    options: &TuneOptions,
) -> Result<ReservationOutcome> {
    let sid = sid.unwrap_or_else(|| ctx.seq.next_subscription_id());

    let frontends = txn.list::<Frontend>()?;
    if let Some(idx) = find_own_entry(&frontends, ctx, sid) {
        let fe = &frontends[idx];
        if fe.sub.mux_key.is_none()
            && fe.sub.sat_pos == Some(sat_pos)
            && fe.sub.pol == Some(pol)
            && fe.sub.band == Some(band)
        {
            return Ok(ReservationOutcome::Granted(subscribed(
                sid,
                SubscriptionChange::NoChange,
                fe,
            )));
        }
    }

    let old_fe = release_entry(txn, ctx, sid)?;
    reserve_fe_lnb_for_sat_band(txn, ctx, sid, sat_pos, pol, band, options, old_fe)
}

/// Subscribe to an RF path with exclusive control of its LNB.
///
/// With `usals_pos` set (or when the dish may not be moved) the dish stays
/// pinned and may be shared with other reservations on the same position.
pub fn subscribe_rf_path(
    txn: &Txn<'_>,
    ctx: &mut AllocContext,
    sid: Option<SubscriptionId>,
    rf_path: RfPath,
    usals_pos: Option<i16>,
    options: &TuneOptions,
) -> Result<ReservationOutcome> {
    let sid = sid.unwrap_or_else(|| ctx.seq.next_subscription_id());

    let frontends = txn.list::<Frontend>()?;
    if let Some(idx) = find_own_entry(&frontends, ctx, sid) {
        let fe = &frontends[idx];
        if fe.sub.rf_path == Some(rf_path)
            && fe.sub.sat_pos.is_none()
            && fe.sub.mux_key.is_none()
            && (usals_pos.is_none() || fe.sub.usals_pos == usals_pos)
        {
            return Ok(ReservationOutcome::Granted(subscribed(
                sid,
                SubscriptionChange::NoChange,
                fe,
            )));
        }
    }

    let old_fe = release_entry(txn, ctx, sid)?;
    let lnb = txn.get::<Lnb>(&rf_path.lnb)?;
    let conn = lnb.connection_for(&rf_path)?;
    let dish = txn.find_by_key::<rfshare_types::Dish>(&rf_path.lnb.dish_id)?;
    let dish_movable = dish.as_ref().map_or(false, |d| d.movable);
    let usals_pos = match (&dish, usals_pos) {
        (Some(d), None) if d.movable => {
            if options.may_move_dish && conn.rotor_control.can_move_dish() {
                None
            } else {
                Some(d.cur_usals_pos)
            }
        }
        (_, pos) => pos.filter(|_| dish_movable),
    };

    let footprint = Footprint {
        owner: ctx.own_pid,
        rf_path,
        dish_movable,
        rf_coupler_id: conn.rf_coupler_id,
        sat_pos: None,
        pol: None,
        band: None,
        usals_pos,
    };
    let req = FeRequirements {
        need_blind_tune: options.use_blind_tune,
        need_spectrum: options.need_spectrum,
        ..Default::default()
    };
    let frontends = txn.list::<Frontend>()?;
    let best = if options.allows_card(rf_path.card_mac_address) {
        find_best_fe_for_lnb(&frontends, ctx, &footprint, &req, old_fe.as_ref(), false)
    } else {
        None
    };
    let Some((fe, usage)) = best else {
        let possible =
            find_best_fe_for_lnb(&frontends, ctx, &footprint, &req, None, true).is_some();
        if !options.subscription_type.is_scan() {
            log::error!("Could not find an available frontend for {}", rf_path);
        }
        return Ok(classify_failure(possible));
    };

    let subscribed = write_sat_reservation(
        txn, ctx, sid, fe, &footprint, &usage, None, None, old_fe, options,
    )?;
    Ok(ReservationOutcome::Granted(subscribed))
}

/// Clear every reservation whose owner process is gone.
pub fn release_dead_owner_reservations(txn: &Txn<'_>, ctx: &AllocContext) -> Result<usize> {
    let mut released = 0;
    for mut fe in txn.list::<Frontend>()? {
        if fe.sub.is_reserved() && !ctx.is_owner_alive(fe.sub.owner) {
            info!(
                "Releasing {} held by dead process {} ({} subscriptions)",
                fe.k,
                fe.sub.owner,
                fe.sub.subs.len()
            );
            fe.sub = FeSubscription::default();
            txn.put_record(&fe)?;
            released += 1;
        }
    }
    Ok(released)
}

/// Release every reservation of this process.
pub fn release_all_subscriptions(
    txn: &Txn<'_>,
    ctx: &AllocContext,
) -> Result<Vec<SubscriptionId>> {
    let mut released = Vec::new();
    for mut fe in txn.list::<Frontend>()? {
        if fe.sub.is_reserved() && fe.sub.owner == ctx.own_pid {
            released.extend(fe.sub.subs.iter().map(|e| e.subscription_id));
            fe.sub = FeSubscription::default();
            txn.put_record(&fe)?;
        }
    }
    if !released.is_empty() {
        info!("Released {} subscriptions", released.len());
    }
    Ok(released)
}

/// All current reservations, with owner liveness.
pub fn list_reservations(txn: &Txn<'_>, ctx: &AllocContext) -> Result<Vec<ReservationInfo>> {
    Ok(txn
        .list::<Frontend>()?
        .into_iter()
        .filter(|fe| fe.sub.is_reserved())
        .map(|fe| ReservationInfo {
            fe_key: fe.k,
            owner: fe.sub.owner,
            owner_alive: ctx.is_owner_alive(fe.sub.owner),
            sub: fe.sub,
        })
        .collect())
}
