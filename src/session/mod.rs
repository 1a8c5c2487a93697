//! Session layer: the players connected to this zone process.
//!
//! Expedition logic never reaches into a global entity list. It is handed
//! a [`SessionDirectory`] that can look players up, deliver updates to
//! them, and read or change the little per-player state expeditions care
//! about: their lockouts, their expedition, and their pending invite.

pub mod local;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{CharacterId, ClientUpdate, ExpeditionId, LockoutTimer};

pub use local::LocalSessions;

/// An invitation a player has not answered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvite {
    /// Expedition the invite is for.
    pub expedition_id: ExpeditionId,
    /// Name of whoever sent it.
    pub inviter_name: String,
    /// Member to swap out on acceptance, for swap invites.
    pub swap_remove_name: Option<String>,
}

/// Snapshot of one connected player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandle {
    /// Character id.
    pub character_id: CharacterId,
    /// Display name.
    pub name: String,
    /// Zone the player is in.
    pub zone_id: u32,
    /// Instance the player is in, `0` if none.
    pub instance_id: u32,
    /// Expedition the player belongs to.
    pub expedition_id: Option<ExpeditionId>,
    /// Unanswered invite.
    pub pending_invite: Option<PendingInvite>,
}

impl ClientHandle {
    /// Creates a handle for a player with no expedition state.
    #[must_use]
    pub fn new(character_id: CharacterId, name: impl Into<String>, zone_id: u32, instance_id: u32) -> Self {
        Self {
            character_id,
            name: name.into(),
            zone_id,
            instance_id,
            expedition_id: None,
            pending_invite: None,
        }
    }

    /// Id of the expedition the pending invite is from.
    #[must_use]
    pub fn pending_invite_id(&self) -> Option<ExpeditionId> {
        self.pending_invite.as_ref().map(|i| i.expedition_id)
    }
}

/// Players connected to this process.
///
/// Delivery is fire-and-forget. Lookups by name ignore case.
pub trait SessionDirectory: Send + Sync + fmt::Debug {
    /// Connected player by character id.
    fn find_by_id(&self, id: CharacterId) -> Option<ClientHandle>;

    /// Connected player by name.
    fn find_by_name(&self, name: &str) -> Option<ClientHandle>;

    /// Every connected player.
    fn connected(&self) -> Vec<ClientHandle>;

    /// Queues an update for a player. Unknown ids are ignored.
    fn send(&self, id: CharacterId, update: ClientUpdate);

    /// The player's lockouts for one expedition name.
    fn lockouts(&self, id: CharacterId, expedition_name: &str) -> Vec<LockoutTimer>;

    /// Adds or refreshes one of the player's lockouts.
    fn add_lockout(&self, id: CharacterId, lockout: LockoutTimer);

    /// Removes one of the player's lockouts.
    fn remove_lockout(&self, id: CharacterId, expedition_name: &str, event_name: &str);

    /// Removes all of the player's lockouts for an expedition name.
    fn remove_all_lockouts(&self, id: CharacterId, expedition_name: &str);

    /// Sets or clears the player's expedition.
    fn set_expedition_id(&self, id: CharacterId, expedition_id: Option<ExpeditionId>);

    /// Sets or clears the player's pending invite.
    fn set_pending_invite(&self, id: CharacterId, invite: Option<PendingInvite>);
}
