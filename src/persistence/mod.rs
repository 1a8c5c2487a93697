//! Persistence layer: the expedition tables.
//!
//! [`ExpeditionStore`] lists every storage call expedition logic makes.
//! [`PostgresExpeditionStore`] implements it with `sqlx::PgPool`;
//! [`InMemoryExpeditionStore`] keeps the same tables in memory for tests
//! and local runs.
//!
//! Writes return the number of affected rows so callers can apply the
//! storage failure policy. Every call fails with
//! [`ExpeditionError::Storage`] when the backend does.

pub mod memory;
pub mod models;
pub mod postgres;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::domain::{CharacterId, ExpeditionId, Leader, LockoutTimer, Member};
use crate::error::ExpeditionError;

pub use memory::InMemoryExpeditionStore;
pub use models::{ExpeditionMemberRow, NewExpedition};
pub use postgres::PostgresExpeditionStore;

/// Storage calls used by expedition logic.
#[async_trait]
#[allow(clippy::missing_errors_doc)]
pub trait ExpeditionStore: Send + Sync + fmt::Debug {
    /// Inserts an expedition and returns its new id.
    async fn insert_expedition(&self, expedition: &NewExpedition) -> Result<ExpeditionId, ExpeditionError>;

    /// Inserts current members.
    async fn insert_members(&self, id: ExpeditionId, members: &[Member]) -> Result<u64, ExpeditionError>;

    /// Inserts one current member, or marks a past member current again.
    async fn insert_member(&self, id: ExpeditionId, member: &Member) -> Result<u64, ExpeditionError>;

    /// Marks a member removed. The row stays for member history.
    async fn update_member_removed(
        &self,
        id: ExpeditionId,
        character_id: CharacterId,
    ) -> Result<u64, ExpeditionError>;

    /// Marks every member removed.
    async fn update_all_members_removed(&self, id: ExpeditionId) -> Result<u64, ExpeditionError>;

    /// Inserts or refreshes one expedition lockout.
    async fn insert_lockout(&self, id: ExpeditionId, lockout: &LockoutTimer) -> Result<u64, ExpeditionError>;

    /// Inserts or refreshes several expedition lockouts.
    async fn insert_lockouts(&self, id: ExpeditionId, lockouts: &[LockoutTimer]) -> Result<u64, ExpeditionError>;

    /// Deletes an expedition lockout.
    async fn delete_lockout(&self, id: ExpeditionId, event_name: &str) -> Result<u64, ExpeditionError>;

    /// Stores the lock flag.
    async fn update_lock_state(&self, id: ExpeditionId, locked: bool) -> Result<u64, ExpeditionError>;

    /// Stores the leader.
    async fn update_leader(&self, id: ExpeditionId, leader: &Leader) -> Result<u64, ExpeditionError>;

    /// Stores the replay-on-join flag.
    async fn update_replay_on_join(&self, id: ExpeditionId, enabled: bool) -> Result<u64, ExpeditionError>;

    /// Member rows of one expedition in join order.
    ///
    /// A member who left and rejoined counts from the rejoin, matching
    /// the order a cache that saw the changes live would hold.
    async fn load_expedition(&self, id: ExpeditionId) -> Result<Vec<ExpeditionMemberRow>, ExpeditionError>;

    /// Member rows of every expedition, ordered by expedition then join order.
    async fn load_all_expeditions(&self) -> Result<Vec<ExpeditionMemberRow>, ExpeditionError>;

    /// Leader as stored.
    async fn get_leader(&self, id: ExpeditionId) -> Result<Option<Leader>, ExpeditionError>;

    /// Lockouts of several expeditions, keyed by expedition.
    async fn load_lockouts(
        &self,
        ids: &[ExpeditionId],
    ) -> Result<HashMap<ExpeditionId, Vec<LockoutTimer>>, ExpeditionError>;

    /// Expedition owning an instance.
    async fn get_expedition_id_from_instance_id(
        &self,
        instance_id: u32,
    ) -> Result<Option<ExpeditionId>, ExpeditionError>;

    /// Deletes a character's staged lockouts.
    async fn delete_pending_character_lockouts(&self, character_id: CharacterId) -> Result<u64, ExpeditionError>;

    /// Deletes staged lockouts of several characters.
    async fn delete_all_members_pending_lockouts(
        &self,
        character_ids: &[CharacterId],
    ) -> Result<u64, ExpeditionError>;

    /// Inserts lockouts for one character, staged when `pending` is set.
    async fn insert_character_lockouts(
        &self,
        character_id: CharacterId,
        lockouts: &[LockoutTimer],
        pending: bool,
    ) -> Result<u64, ExpeditionError>;

    /// Grants one lockout to several characters.
    async fn insert_members_lockout(
        &self,
        character_ids: &[CharacterId],
        lockout: &LockoutTimer,
    ) -> Result<u64, ExpeditionError>;

    /// Revokes one lockout from several characters.
    async fn delete_members_lockout(
        &self,
        character_ids: &[CharacterId],
        expedition_name: &str,
        event_name: &str,
    ) -> Result<u64, ExpeditionError>;

    /// Revokes every lockout a character holds for an expedition name.
    async fn delete_character_lockouts(
        &self,
        character_id: CharacterId,
        expedition_name: &str,
    ) -> Result<u64, ExpeditionError>;
}
