//! Shared RF resource allocation.
//!
//! This module provides:
//! - [`OwnerProbe`]: liveness of the processes owning reservations
//! - [`AllocContext`]: own process id, id sequences and the probe
//! - [`conflict`]: whether a candidate reservation can coexist with the live ones
//! - [`selector`]: best frontend/LNB/RF path for a request
//! - [`subscription`]: the reservation API used by tuning and scanning
//! - [`dish`]: dish movement planning for the master of a dish

pub mod conflict;
pub mod context;
pub mod dish;
pub mod liveness;
pub mod options;
pub mod selector;
pub mod subscription;

pub use conflict::{check_for_resource_conflicts, Footprint, ResourceUsage};
pub use context::{AllocContext, Sequence};
pub use dish::{plan_dish_move, record_dish_position, DishPlan};
pub use liveness::{OwnerProbe, ProcessProbe, StaticProbe};
pub use options::{SubscriptionType, TuneOptions};
pub use selector::{FeLnbChoice, FeRequirements};
pub use subscription::{
    list_reservations, release_all_subscriptions, release_dead_owner_reservations,
    subscribe_any_mux, subscribe_mux, subscribe_rf_path, subscribe_sat_band, unsubscribe,
    ReservationInfo, ReservationOutcome, Subscribed, SubscriptionChange,
};
