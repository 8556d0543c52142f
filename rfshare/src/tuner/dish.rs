//! Dish movement planning.

use log::info;

use rfshare_types::Dish;

use super::conflict::{Footprint, ResourceUsage};
use super::options::TuneOptions;
use crate::database::{Result, Txn};

/// What the device layer has to do with the dish before tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DishPlan {
    /// Fixed dish, or the reservation shares the dish and may not touch it.
    #[default]
    None,
    InPosition { dish_id: i32, usals_pos: i16 },
    Move {
        dish_id: i32,
        from: i16,
        to: i16,
        estimated_secs: u32,
    },
}

impl DishPlan {
    pub fn is_move(&self) -> bool {
        matches!(self, DishPlan::Move { .. })
    }
}

/// Plan the dish for a new reservation and record a move target.
///
/// Only the sole user of a motorised dish gets a plan.
pub fn plan_dish_move(
    txn: &Txn<'_>,
    footprint: &Footprint,
    usage: &ResourceUsage,
    options: &TuneOptions,
) -> Result<DishPlan> {
    if !footprint.dish_movable || usage.dish > 0 {
        return Ok(DishPlan::None);
    }
    let dish_id = footprint.rf_path.lnb.dish_id;
    let Some(mut dish) = txn.find_by_key::<Dish>(&dish_id)? else {
        return Ok(DishPlan::None);
    };

    let target = match footprint.usals_pos {
        Some(target) => target,
        None => {
            return Ok(DishPlan::InPosition {
                dish_id,
                usals_pos: dish.cur_usals_pos,
            })
        }
    };
    if dish.is_at(target) || !options.may_move_dish {
        return Ok(DishPlan::InPosition {
            dish_id,
            usals_pos: dish.cur_usals_pos,
        });
    }

    let plan = DishPlan::Move {
        dish_id,
        from: dish.cur_usals_pos,
        to: target,
        estimated_secs: dish.move_duration_secs(target),
    };
    info!(
        "Dish {}: moving from {} to {}",
        dish_id, dish.cur_usals_pos, target
    );
    dish.target_usals_pos = target;
    txn.put_record(&dish)?;
    Ok(plan)
}

/// Record the position a dish reached.
pub fn record_dish_position(txn: &Txn<'_>, dish_id: i32, usals_pos: i16) -> Result<()> {
    let mut dish = txn.get::<Dish>(&dish_id)?;
    dish.cur_usals_pos = usals_pos;
    dish.target_usals_pos = usals_pos;
    txn.put_record(&dish)
}
