//! Service layer: expedition orchestration.
//!
//! [`ExpeditionService`] writes storage, updates the cache, notifies
//! connected players, and broadcasts each change through the relay.
//! [`InviteCoordinator`] runs player commands on top of it.

pub mod expedition_service;
pub mod invite_coordinator;

pub use expedition_service::{CreateRequest, ExpeditionService};
pub use invite_coordinator::{InviteCoordinator, PlayerCommand};
