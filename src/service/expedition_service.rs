//! Expedition service: storage-backed, replicated expedition mutations.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::domain::{
    CharacterId, ClientUpdate, ExpeditionCache, ExpeditionGroup, ExpeditionId, InstancedZoneRef,
    Leader, LocationKind, LockoutTimer, Member, MemberEntry, MemberStatus, Notice, ProcessIdentity,
    ZoneLocation,
};
use crate::error::ExpeditionError;
use crate::persistence::NewExpedition;
use crate::relay::{CharacterEntry, RelayMessage, SettingKind};
use crate::session::ClientHandle;
use crate::zone_context::ZoneContext;

use super::invite_coordinator::InviteCoordinator;

/// Everything needed to create an expedition.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Expedition name.
    pub name: String,
    /// Minimum members.
    pub min_players: u32,
    /// Maximum members.
    pub max_players: u32,
    /// Leader, also listed in `members`.
    pub leader: Leader,
    /// Initial members.
    pub members: Vec<Member>,
    /// Instance created for the expedition.
    pub instanced_zone: InstancedZoneRef,
    /// Lockouts the expedition starts with.
    pub lockouts: Vec<LockoutTimer>,
}

impl CreateRequest {
    fn validate(&self) -> Result<(), ExpeditionError> {
        if self.name.trim().is_empty() {
            return Err(ExpeditionError::InvalidRequest("expedition name is empty".to_string()));
        }
        if self.min_players == 0 || self.min_players > self.max_players {
            return Err(ExpeditionError::InvalidRequest(format!(
                "invalid player limits {}..={}",
                self.min_players, self.max_players
            )));
        }
        let count = u32::try_from(self.members.len()).unwrap_or(u32::MAX);
        if count < self.min_players || count > self.max_players {
            return Err(ExpeditionError::InvalidRequest(format!(
                "{count} members outside {}..={}",
                self.min_players, self.max_players
            )));
        }
        if !self.members.iter().any(|m| m.id == self.leader.id) {
            return Err(ExpeditionError::InvalidRequest(format!(
                "leader {} is not a member",
                self.leader.name
            )));
        }
        Ok(())
    }
}

/// Orchestration layer for expedition mutations.
///
/// Owns this process's [`ExpeditionCache`] and [`ZoneContext`]. Local
/// mutations follow the pattern: write storage, mutate the cache, notify
/// connected players, broadcast. Relay-applied changes skip storage and
/// the broadcast.
#[derive(Debug)]
pub struct ExpeditionService {
    ctx: ZoneContext,
    cache: ExpeditionCache,
}

impl ExpeditionService {
    /// Creates a service with an empty cache.
    #[must_use]
    pub fn new(ctx: ZoneContext) -> Self {
        Self {
            ctx,
            cache: ExpeditionCache::new(),
        }
    }

    /// Process context.
    #[must_use]
    pub const fn context(&self) -> &ZoneContext {
        &self.ctx
    }

    /// Identity of this process.
    #[must_use]
    pub const fn identity(&self) -> ProcessIdentity {
        self.ctx.identity
    }

    /// This process's cached expeditions.
    #[must_use]
    pub const fn cache(&self) -> &ExpeditionCache {
        &self.cache
    }

    /// Cached expedition by id.
    #[must_use]
    pub fn expedition(&self, id: ExpeditionId) -> Option<&ExpeditionGroup> {
        self.cache.get(id)
    }

    /// Leader commands and invite flows.
    pub fn invites(&mut self) -> InviteCoordinator<'_> {
        InviteCoordinator::new(self)
    }

    /// Expedition owning an instance, falling back to storage when the
    /// instance is not cached.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::Storage`] if the storage lookup fails.
    pub async fn find_by_instance_id(&self, instance_id: u32) -> Result<Option<ExpeditionId>, ExpeditionError> {
        if let Some(expedition) = self.cache.find_by_instance_id(instance_id) {
            return Ok(Some(expedition.id()));
        }
        self.ctx.store.get_expedition_id_from_instance_id(instance_id).await
    }

    /// Creates an expedition.
    ///
    /// Returns `Ok(None)` when a member already belongs to another
    /// expedition; the leader is told who.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::InvalidRequest`] for malformed requests,
    /// [`ExpeditionError::InstanceUnavailable`] without an instance, and
    /// storage errors from the insert or, under the abort policy, from
    /// the writes after it.
    pub async fn create(&mut self, request: CreateRequest) -> Result<Option<ExpeditionId>, ExpeditionError> {
        request.validate()?;

        let mut has_conflict = false;
        for member in &request.members {
            if self.cache.find_by_character(member.id).is_some() {
                self.ctx.notify_character(
                    &request.leader.name,
                    Notice::OtherBelongs {
                        requester: request.leader.name.clone(),
                        name: member.name.clone(),
                    },
                );
                has_conflict = true;
            }
        }
        if has_conflict {
            tracing::debug!(name = %request.name, leader = %request.leader.name, "creation denied");
            return Ok(None);
        }

        if request.instanced_zone.instance_id() == 0 {
            self.ctx
                .notify_character(&request.leader.name, Notice::InstanceUnavailable);
            return Err(ExpeditionError::InstanceUnavailable);
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        let id = self
            .ctx
            .store
            .insert_expedition(&NewExpedition {
                uuid: uuid.clone(),
                instance_id: request.instanced_zone.instance_id(),
                zone_id: request.instanced_zone.zone_id(),
                name: request.name.clone(),
                leader: request.leader.clone(),
                min_players: request.min_players,
                max_players: request.max_players,
            })
            .await?;

        let member_ids: Vec<CharacterId> = request.members.iter().map(|m| m.id).collect();
        let result = self.ctx.store.insert_members(id, &request.members).await;
        self.ctx.check_write("insert_members", result)?;
        let result = self
            .ctx
            .store
            .delete_all_members_pending_lockouts(&member_ids)
            .await;
        self.ctx
            .check_call("delete_all_members_pending_lockouts", result)?;
        if !request.lockouts.is_empty() {
            let result = self.ctx.store.insert_lockouts(id, &request.lockouts).await;
            self.ctx.check_write("insert_lockouts", result)?;
        }

        let mut expedition = ExpeditionGroup::new(
            id,
            uuid,
            request.name.clone(),
            request.leader.clone(),
            request.min_players,
            request.max_players,
            request.instanced_zone,
        );
        for member in &request.members {
            expedition.add_internal_member(member.id, &member.name, member.status, true);
            expedition.instanced_zone_mut().add_character(member.id);
        }
        expedition.set_lockouts(request.lockouts);

        tracing::info!(
            expedition_id = %id,
            name = %expedition.name(),
            instance_id = expedition.instanced_zone().instance_id(),
            leader = %expedition.leader().name,
            min_players = expedition.min_players(),
            max_players = expedition.max_players(),
            "expedition created"
        );

        send_updates_to_zone_members(&self.ctx, &expedition, false, false);
        self.cache.insert(expedition);
        self.ctx.broadcast(RelayMessage::Create { expedition_id: id });
        self.ctx.notify_character(
            &request.leader.name,
            Notice::ExpeditionAvailable {
                expedition: request.name,
            },
        );
        Ok(Some(id))
    }

    /// Replaces the cache with every expedition in storage, then asks the
    /// coordinator for the status of all their members in one query.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::Storage`] if loading fails.
    pub async fn cache_all(&mut self) -> Result<usize, ExpeditionError> {
        let started = Instant::now();
        let rows = self.ctx.store.load_all_expeditions().await?;
        let mut ids: Vec<ExpeditionId> = rows.iter().map(|r| r.expedition_id).collect();
        ids.dedup();
        let mut lockouts = self.ctx.store.load_lockouts(&ids).await?;

        self.cache.clear();
        let ctx = &self.ctx;
        let members = self.cache.load_rows(rows, &mut lockouts, |expedition| {
            send_updates_to_zone_members(ctx, expedition, false, false);
        });
        self.query_online_members(&members);

        tracing::info!(
            count = self.cache.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "cached expeditions"
        );
        Ok(self.cache.len())
    }

    /// Loads one expedition from storage into the cache.
    ///
    /// Returns `false` if storage has no such expedition.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::Storage`] if loading fails.
    pub async fn cache_expedition(&mut self, id: ExpeditionId) -> Result<bool, ExpeditionError> {
        let rows = self.ctx.store.load_expedition(id).await?;
        if rows.is_empty() {
            tracing::debug!(expedition_id = %id, "expedition not found in storage");
            return Ok(false);
        }
        let mut lockouts = self.ctx.store.load_lockouts(&[id]).await?;
        let ctx = &self.ctx;
        let members = self.cache.load_rows(rows, &mut lockouts, |expedition| {
            send_updates_to_zone_members(ctx, expedition, false, false);
        });
        self.query_online_members(&members);
        tracing::debug!(expedition_id = %id, "expedition cached");
        Ok(true)
    }

    fn query_online_members(&self, members: &[(ExpeditionId, CharacterId)]) {
        if members.is_empty() {
            return;
        }
        let entries: Vec<CharacterEntry> = members
            .iter()
            .map(|(expedition_id, character_id)| CharacterEntry::query(*expedition_id, *character_id))
            .collect();
        for query in RelayMessage::online_members_queries(&entries) {
            self.ctx.broadcast(query);
        }
    }

    /// Adds a member.
    ///
    /// Returns `false` without side effects if the character is already
    /// a member. Capacity and lockout rules are not checked here.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn add_member(
        &mut self,
        id: ExpeditionId,
        character_id: CharacterId,
        name: &str,
    ) -> Result<bool, ExpeditionError> {
        let expedition = self.cached(id)?;
        if expedition.has_member(character_id) {
            return Ok(false);
        }

        let member = Member::new(character_id, name, MemberStatus::Online);
        let result = self.ctx.store.insert_member(id, &member).await;
        self.ctx.check_write("insert_member", result)?;

        self.process_member_added(id, character_id, name);
        self.ctx.broadcast(RelayMessage::MemberChange {
            expedition_id: id,
            char_id: character_id,
            char_name: name.to_string(),
            removed: false,
        });
        tracing::debug!(expedition_id = %id, character = name, "member added");
        Ok(true)
    }

    /// Removes a member by name and replaces the leader if needed.
    ///
    /// Returns `false` if nobody by that name is a member.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn remove_member(&mut self, id: ExpeditionId, name: &str) -> Result<bool, ExpeditionError> {
        let expedition = self.cached(id)?;
        let Some(member) = expedition.member_named(name).cloned() else {
            return Ok(false);
        };
        let was_leader = member.id == expedition.leader().id;

        let result = self.ctx.store.update_member_removed(id, member.id).await;
        self.ctx.check_write("update_member_removed", result)?;

        self.process_member_removed(id, member.id, &member.name)
            .await?;
        self.ctx.broadcast(RelayMessage::MemberChange {
            expedition_id: id,
            char_id: member.id,
            char_name: member.name.clone(),
            removed: true,
        });
        tracing::debug!(expedition_id = %id, character = %member.name, "member removed");

        if was_leader {
            self.choose_new_leader(id).await?;
        }
        Ok(true)
    }

    /// Replaces one member with another.
    ///
    /// Both storage writes happen first, then the removal and the add are
    /// applied back to back so no relay message can land between them.
    /// Returns `false` if `remove_name` is not a member.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn swap_member(
        &mut self,
        id: ExpeditionId,
        add_id: CharacterId,
        add_name: &str,
        remove_name: &str,
    ) -> Result<bool, ExpeditionError> {
        let expedition = self.cached(id)?;
        let Some(removed) = expedition.member_named(remove_name).cloned() else {
            return Ok(false);
        };
        let was_leader = removed.id == expedition.leader().id;

        let result = self.ctx.store.update_member_removed(id, removed.id).await;
        self.ctx.check_write("update_member_removed", result)?;
        let added = Member::new(add_id, add_name, MemberStatus::Online);
        let result = self.ctx.store.insert_member(id, &added).await;
        self.ctx.check_write("insert_member", result)?;

        self.process_member_removed(id, removed.id, &removed.name)
            .await?;
        self.process_member_added(id, add_id, add_name);
        self.ctx.broadcast(RelayMessage::MemberSwap {
            expedition_id: id,
            remove_char_id: removed.id,
            remove_char_name: removed.name.clone(),
            add_char_id: add_id,
            add_char_name: add_name.to_string(),
        });
        tracing::debug!(
            expedition_id = %id,
            removed = %removed.name,
            added = add_name,
            "member swapped"
        );

        let has_members = self.cache.get(id).is_some_and(|e| e.member_count() > 0);
        if was_leader && has_members {
            self.choose_new_leader(id).await?;
        }
        Ok(true)
    }

    /// Removes every member. Member history is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn remove_all_members(&mut self, id: ExpeditionId) -> Result<(), ExpeditionError> {
        let expedition = self.cached(id)?;
        let member_ids: Vec<CharacterId> = expedition.members().iter().map(|m| m.id).collect();
        let has_history = !expedition.member_history().is_empty();

        if !member_ids.is_empty() {
            let result = self
                .ctx
                .store
                .delete_all_members_pending_lockouts(&member_ids)
                .await;
            self.ctx
                .check_call("delete_all_members_pending_lockouts", result)?;
        }
        if has_history {
            let result = self.ctx.store.update_all_members_removed(id).await;
            self.ctx.check_write("update_all_members_removed", result)?;
        }

        if let Some(expedition) = self.cache.get_mut(id) {
            expedition.instanced_zone_mut().remove_all_characters();
            send_updates_to_zone_members(&self.ctx, expedition, true, true);
            expedition.clear_members();
        }
        self.ctx
            .broadcast(RelayMessage::MembersRemoved { expedition_id: id });
        tracing::debug!(expedition_id = %id, "all members removed");
        Ok(())
    }

    /// Hands leadership to the first other member in storage order.
    ///
    /// Returns `false` and leaves the leader as it is when nobody else is
    /// left.
    ///
    /// # Errors
    ///
    /// Under the abort policy, returns storage errors.
    pub async fn choose_new_leader(&mut self, id: ExpeditionId) -> Result<bool, ExpeditionError> {
        let next = self
            .cache
            .get(id)
            .and_then(ExpeditionGroup::fallback_leader)
            .map(|m| Leader::new(m.id, m.name.clone()));
        let Some(next) = next else {
            return Ok(false);
        };
        if let Some(expedition) = self.cache.get(id) {
            tracing::debug!(
                expedition_id = %id,
                old = %expedition.leader().name,
                new = %next.name,
                "replacing leader"
            );
        }
        self.set_new_leader(id, next).await?;
        Ok(true)
    }

    /// Makes `leader` the expedition leader.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn set_new_leader(&mut self, id: ExpeditionId, leader: Leader) -> Result<(), ExpeditionError> {
        self.cached(id)?;
        let result = self.ctx.store.update_leader(id, &leader).await;
        self.ctx.check_write("update_leader", result)?;

        self.process_leader_changed(id, leader.clone());
        self.ctx.broadcast(RelayMessage::LeaderChanged {
            expedition_id: id,
            char_id: leader.id,
            char_name: leader.name,
        });
        Ok(())
    }

    /// Starts or restarts an event lockout for the expedition and its
    /// members.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn add_lockout(
        &mut self,
        id: ExpeditionId,
        event_name: &str,
        duration_secs: u32,
    ) -> Result<(), ExpeditionError> {
        let expedition = self.cached(id)?;
        let lockout = LockoutTimer::starting_at(
            expedition.uuid(),
            expedition.name(),
            event_name,
            duration_secs,
            Utc::now(),
        );
        let member_ids: Vec<CharacterId> = expedition.members().iter().map(|m| m.id).collect();

        let result = self.ctx.store.insert_lockout(id, &lockout).await;
        self.ctx.check_write("insert_lockout", result)?;
        if !member_ids.is_empty() {
            let result = self
                .ctx
                .store
                .insert_members_lockout(&member_ids, &lockout)
                .await;
            self.ctx.check_write("insert_members_lockout", result)?;
        }

        self.process_lockout_update(id, &lockout, false).await?;
        self.ctx.broadcast(RelayMessage::Lockout {
            expedition_id: id,
            event_name: lockout.event_name().to_string(),
            expire_time: lockout.expire_at().timestamp(),
            duration: lockout.duration_secs(),
            remove: false,
        });
        tracing::debug!(expedition_id = %id, event = event_name, duration_secs, "lockout added");
        Ok(())
    }

    /// Removes an event lockout from the expedition and its members.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn remove_lockout(&mut self, id: ExpeditionId, event_name: &str) -> Result<(), ExpeditionError> {
        let expedition = self.cached(id)?;
        let lockout = LockoutTimer::new(
            expedition.uuid(),
            expedition.name(),
            event_name,
            Utc::now(),
            0,
        );
        let member_ids: Vec<CharacterId> = expedition.members().iter().map(|m| m.id).collect();

        let result = self.ctx.store.delete_lockout(id, event_name).await;
        self.ctx.check_call("delete_lockout", result)?;
        if !member_ids.is_empty() {
            let result = self
                .ctx
                .store
                .delete_members_lockout(&member_ids, lockout.expedition_name(), event_name)
                .await;
            self.ctx.check_call("delete_members_lockout", result)?;
        }

        self.process_lockout_update(id, &lockout, true).await?;
        self.ctx.broadcast(RelayMessage::Lockout {
            expedition_id: id,
            event_name: event_name.to_string(),
            expire_time: 0,
            duration: 0,
            remove: true,
        });
        tracing::debug!(expedition_id = %id, event = event_name, "lockout removed");
        Ok(())
    }

    /// Locks or unlocks the expedition for new invitations.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn set_locked(&mut self, id: ExpeditionId, locked: bool) -> Result<(), ExpeditionError> {
        self.cached(id)?;
        let result = self.ctx.store.update_lock_state(id, locked).await;
        self.ctx.check_write("update_lock_state", result)?;
        self.apply_setting(SettingKind::LockState, id, locked);
        self.ctx.broadcast(RelayMessage::Setting {
            kind: SettingKind::LockState,
            expedition_id: id,
            enabled: locked,
        });
        Ok(())
    }

    /// Enables or disables granting a fresh replay timer on join.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::ExpeditionNotFound`] for an uncached
    /// expedition and, under the abort policy, storage errors.
    pub async fn set_replay_on_join(&mut self, id: ExpeditionId, enabled: bool) -> Result<(), ExpeditionError> {
        self.cached(id)?;
        let result = self.ctx.store.update_replay_on_join(id, enabled).await;
        self.ctx.check_write("update_replay_on_join", result)?;
        self.apply_setting(SettingKind::ReplayOnJoin, id, enabled);
        self.ctx.broadcast(RelayMessage::Setting {
            kind: SettingKind::ReplayOnJoin,
            expedition_id: id,
            enabled,
        });
        Ok(())
    }

    /// Sets a member's status and broadcasts it. Non-members are ignored.
    pub fn set_member_status(&mut self, id: ExpeditionId, character_id: CharacterId, status: MemberStatus) {
        let Some(expedition) = self.cache.get_mut(id) else {
            return;
        };
        if update_member_status(&self.ctx, expedition, character_id, status) {
            self.ctx.broadcast(RelayMessage::MemberStatus {
                expedition_id: id,
                character_id,
                status,
            });
        }
    }

    /// Changes one of the instance's locations and broadcasts it.
    pub fn set_location(&mut self, id: ExpeditionId, kind: LocationKind, location: ZoneLocation) {
        let Some(expedition) = self.cache.get(id) else {
            return;
        };
        let dz_zone_id = expedition.instanced_zone().zone_id();
        let dz_instance_id = expedition.instanced_zone().instance_id();
        self.apply_location(kind, id, location);
        self.ctx.broadcast(RelayMessage::DzLocation {
            kind,
            owner_id: id,
            dz_zone_id,
            dz_instance_id,
            location,
        });
    }

    /// Restores a newly connected character's expedition window and
    /// marks them online, or in the dynamic zone when this process is
    /// their expedition's instance.
    pub fn on_client_connected(&mut self, character_id: CharacterId) {
        let Some(id) = self
            .cache
            .find_by_character(character_id)
            .map(ExpeditionGroup::id)
        else {
            self.ctx.sessions.set_expedition_id(character_id, None);
            return;
        };
        let Some(expedition) = self.cache.get(id) else {
            return;
        };
        send_window(&self.ctx, expedition, character_id);
        self.ctx
            .sessions
            .send(character_id, ClientUpdate::LockoutTimers);

        let status = if expedition.instanced_zone().is_current_zone(self.ctx.identity) {
            MemberStatus::InDynamicZone
        } else {
            MemberStatus::Online
        };
        self.set_member_status(id, character_id, status);
    }

    /// Handles a character leaving this process. Their pending invite is
    /// handed to the coordinator, and a logout marks them offline.
    pub fn on_client_disconnected(&mut self, handle: &ClientHandle, logged_out: bool) {
        self.stash_pending_invite(handle);
        if !logged_out {
            return;
        }
        let id = self
            .cache
            .find_by_character(handle.character_id)
            .map(ExpeditionGroup::id);
        if let Some(id) = id {
            self.set_member_status(id, handle.character_id, MemberStatus::Offline);
        }
    }

    /// Forwards a character's unanswered invite to the coordinator.
    pub fn stash_pending_invite(&self, handle: &ClientHandle) {
        let Some(invite) = &handle.pending_invite else {
            return;
        };
        tracing::debug!(
            character = %handle.name,
            inviter = %invite.inviter_name,
            expedition_id = %invite.expedition_id,
            "saving pending invite"
        );
        self.ctx.broadcast(RelayMessage::SaveInvite {
            character_name: handle.name.clone(),
            expedition_id: invite.expedition_id,
            inviter_name: invite.inviter_name.clone(),
            swap_remove_name: invite.swap_remove_name.clone().unwrap_or_default(),
        });
    }

    // Relay-applied changes. None of these broadcast.

    /// Evicts an expedition the coordinator deleted, silently clearing
    /// its members' windows.
    pub fn apply_deleted(&mut self, id: ExpeditionId) {
        let Some(expedition) = self.cache.get(id) else {
            return;
        };
        send_updates_to_zone_members(&self.ctx, expedition, true, false);
        self.cache.remove(id);
        tracing::info!(expedition_id = %id, "expedition evicted from cache");
    }

    /// Applies a remote remove-all.
    pub fn apply_members_removed(&mut self, id: ExpeditionId) {
        let Some(expedition) = self.cache.get_mut(id) else {
            return;
        };
        send_updates_to_zone_members(&self.ctx, expedition, true, true);
        expedition.instanced_zone_mut().remove_all_characters();
        expedition.clear_members();
    }

    /// Applies a remote member add or removal.
    ///
    /// # Errors
    ///
    /// Under the abort policy, returns storage errors from clearing a
    /// removed local member's staged lockouts.
    pub async fn apply_member_change(
        &mut self,
        id: ExpeditionId,
        character_id: CharacterId,
        name: &str,
        removed: bool,
    ) -> Result<(), ExpeditionError> {
        if removed {
            self.process_member_removed(id, character_id, name).await
        } else {
            self.process_member_added(id, character_id, name);
            Ok(())
        }
    }

    /// Applies a remote swap.
    ///
    /// # Errors
    ///
    /// Under the abort policy, returns storage errors from clearing a
    /// removed local member's staged lockouts.
    pub async fn apply_member_swap(
        &mut self,
        id: ExpeditionId,
        removed: (CharacterId, &str),
        added: (CharacterId, &str),
    ) -> Result<(), ExpeditionError> {
        self.process_member_removed(id, removed.0, removed.1).await?;
        self.process_member_added(id, added.0, added.1);
        Ok(())
    }

    /// Applies a remote member status change.
    pub fn apply_member_status(&mut self, id: ExpeditionId, character_id: CharacterId, status: MemberStatus) {
        if let Some(expedition) = self.cache.get_mut(id) {
            update_member_status(&self.ctx, expedition, character_id, status);
        }
    }

    /// Applies a remote leader change.
    pub fn apply_leader_changed(&mut self, id: ExpeditionId, leader: Leader) {
        self.process_leader_changed(id, leader);
    }

    /// Applies a remote lockout add or removal, rebuilding the timer with
    /// this expedition's uuid and name.
    ///
    /// # Errors
    ///
    /// Under the abort policy, returns storage errors from granting the
    /// lockout to non-members inside the instance.
    pub async fn apply_lockout(
        &mut self,
        id: ExpeditionId,
        event_name: &str,
        expire_time: i64,
        duration_secs: u32,
        remove: bool,
    ) -> Result<(), ExpeditionError> {
        let Some(expedition) = self.cache.get(id) else {
            return Ok(());
        };
        let expire_at = DateTime::<Utc>::from_timestamp(expire_time, 0).unwrap_or_else(Utc::now);
        let lockout = LockoutTimer::new(
            expedition.uuid(),
            expedition.name(),
            event_name,
            expire_at,
            duration_secs,
        );
        self.process_lockout_update(id, &lockout, remove).await
    }

    /// Applies a remote lock or replay-on-join change.
    pub fn apply_setting(&mut self, kind: SettingKind, id: ExpeditionId, enabled: bool) {
        let Some(expedition) = self.cache.get_mut(id) else {
            return;
        };
        match kind {
            SettingKind::LockState => expedition.set_locked(enabled),
            SettingKind::ReplayOnJoin => expedition.set_replay_on_join(enabled),
        }
        tracing::debug!(expedition_id = %id, ?kind, enabled, "setting changed");
    }

    /// Applies a location change. Compass changes refresh connected
    /// members' compass.
    pub fn apply_location(&mut self, kind: LocationKind, id: ExpeditionId, location: ZoneLocation) {
        let Some(expedition) = self.cache.get_mut(id) else {
            return;
        };
        expedition
            .instanced_zone_mut()
            .set_location(kind, location);
        if kind == LocationKind::Compass {
            for member in expedition.members() {
                self.ctx
                    .sessions
                    .send(member.id, ClientUpdate::Compass(Some(location)));
            }
        }
    }

    /// Applies the coordinator's answer to an online-members query.
    pub fn apply_online_members(&mut self, entries: &[CharacterEntry]) {
        for entry in entries {
            let Some(expedition) = self.cache.get_mut(entry.expedition_id) else {
                continue;
            };
            let status = if !entry.online {
                MemberStatus::Offline
            } else if expedition.instanced_zone().is_instance_id(entry.instance_id) {
                MemberStatus::InDynamicZone
            } else {
                MemberStatus::Online
            };
            update_member_status(&self.ctx, expedition, entry.character_id, status);
        }
    }

    /// Removes lockouts from a character connected to this process. An
    /// empty `event_name` removes all of the expedition's lockouts.
    ///
    /// # Errors
    ///
    /// Under the abort policy, returns storage errors.
    pub async fn apply_remove_character_lockouts(
        &mut self,
        character_name: &str,
        expedition_name: &str,
        event_name: &str,
    ) -> Result<(), ExpeditionError> {
        let Some(handle) = self.ctx.sessions.find_by_name(character_name) else {
            return Ok(());
        };
        let id = handle.character_id;
        if event_name.is_empty() {
            let result = self
                .ctx
                .store
                .delete_character_lockouts(id, expedition_name)
                .await;
            self.ctx.check_call("delete_character_lockouts", result)?;
            self.ctx.sessions.remove_all_lockouts(id, expedition_name);
        } else {
            let result = self
                .ctx
                .store
                .delete_members_lockout(&[id], expedition_name, event_name)
                .await;
            self.ctx.check_call("delete_members_lockout", result)?;
            self.ctx
                .sessions
                .remove_lockout(id, expedition_name, event_name);
        }
        self.ctx.sessions.send(id, ClientUpdate::LockoutTimers);
        Ok(())
    }

    /// Applies a new instance duration.
    pub fn apply_duration(&mut self, id: ExpeditionId, duration_secs: u32) {
        if let Some(expedition) = self.cache.get_mut(id) {
            expedition
                .instanced_zone_mut()
                .set_duration(duration_secs, Utc::now());
            tracing::debug!(expedition_id = %id, duration_secs, "instance duration changed");
        }
    }

    /// Warns connected members that the instance is about to expire.
    pub fn apply_expire_warning(&self, id: ExpeditionId, minutes: u32) {
        let Some(expedition) = self.cache.get(id) else {
            return;
        };
        for member in expedition.members() {
            self.ctx
                .sessions
                .send(member.id, Notice::ExpireWarning { minutes }.into());
        }
    }

    /// Delivers a relayed notice if the character is connected here.
    pub fn deliver_notice(&self, character_name: &str, notice: Notice) {
        if let Some(handle) = self.ctx.sessions.find_by_name(character_name) {
            self.ctx.sessions.send(handle.character_id, notice.into());
        }
    }

    fn cached(&self, id: ExpeditionId) -> Result<&ExpeditionGroup, ExpeditionError> {
        self.cache
            .get(id)
            .ok_or(ExpeditionError::ExpeditionNotFound(id))
    }

    fn process_member_added(&mut self, id: ExpeditionId, character_id: CharacterId, name: &str) {
        let ctx = &self.ctx;
        let Some(expedition) = self.cache.get_mut(id) else {
            return;
        };
        let notice = Notice::MemberAdded {
            name: name.to_string(),
            expedition: expedition.name().to_string(),
        };

        let leader_id = expedition.leader().id;
        if ctx.sessions.find_by_id(leader_id).is_some() {
            ctx.sessions.send(leader_id, notice.clone().into());
        }
        if ctx.sessions.find_by_id(character_id).is_some() {
            ctx.sessions.set_expedition_id(character_id, Some(id));
            ctx.sessions.send(character_id, notice.into());
        }

        expedition.add_internal_member(character_id, name, MemberStatus::Online, true);
        expedition.instanced_zone_mut().add_character(character_id);
        send_updates_to_zone_members(ctx, expedition, false, false);
    }

    async fn process_member_removed(
        &mut self,
        id: ExpeditionId,
        character_id: CharacterId,
        name: &str,
    ) -> Result<(), ExpeditionError> {
        let Some(expedition) = self.cache.get(id) else {
            return Ok(());
        };
        if expedition.member_count() == 0 {
            return Ok(());
        }
        let removed_is_local =
            expedition.has_member(character_id) && self.ctx.sessions.find_by_id(character_id).is_some();

        if removed_is_local {
            let result = self
                .ctx
                .store
                .delete_pending_character_lockouts(character_id)
                .await;
            self.ctx
                .check_call("delete_pending_character_lockouts", result)?;
        }

        let ctx = &self.ctx;
        let Some(expedition) = self.cache.get_mut(id) else {
            return Ok(());
        };
        for member in expedition.members() {
            ctx.sessions.send(
                member.id,
                ClientUpdate::MemberListName {
                    name: name.to_string(),
                    added: false,
                },
            );
        }
        if removed_is_local {
            ctx.sessions.set_expedition_id(character_id, None);
            ctx.sessions.send(character_id, ClientUpdate::Compass(None));
            ctx.sessions
                .send(character_id, ClientUpdate::ExpeditionInfo(None));
            ctx.sessions.send(
                character_id,
                Notice::Removed {
                    name: name.to_string(),
                    expedition: expedition.name().to_string(),
                }
                .into(),
            );
        }

        expedition.remove_internal_member(character_id);
        expedition
            .instanced_zone_mut()
            .remove_character(character_id);
        tracing::debug!(
            expedition_id = %id,
            character = name,
            members = expedition.member_count(),
            "processed member removal"
        );
        Ok(())
    }

    fn process_leader_changed(&mut self, id: ExpeditionId, leader: Leader) {
        let Some(expedition) = self.cache.get_mut(id) else {
            return;
        };
        let name = leader.name.clone();
        expedition.set_leader(leader);
        for member in expedition.members() {
            self.ctx
                .sessions
                .send(member.id, ClientUpdate::LeaderName(name.clone()));
        }
        tracing::debug!(expedition_id = %id, leader = %name, "leader changed");
    }

    async fn process_lockout_update(
        &mut self,
        id: ExpeditionId,
        lockout: &LockoutTimer,
        remove: bool,
    ) -> Result<(), ExpeditionError> {
        let Some(expedition) = self.cache.get(id) else {
            return Ok(());
        };

        // inside the instance, everyone present gets new lockouts so that
        // leaving the expedition just before a lockout does not dodge it
        let mut non_members = Vec::new();
        if !remove && expedition.instanced_zone().is_current_zone(self.ctx.identity) {
            non_members = self
                .ctx
                .sessions
                .connected()
                .into_iter()
                .filter(|c| c.expedition_id != Some(id))
                .map(|c| c.character_id)
                .collect();
        }
        if !non_members.is_empty() {
            let result = self
                .ctx
                .store
                .insert_members_lockout(&non_members, lockout)
                .await;
            self.ctx.check_write("insert_members_lockout", result)?;
        }

        let ctx = &self.ctx;
        let Some(expedition) = self.cache.get_mut(id) else {
            return Ok(());
        };
        if remove {
            expedition.remove_lockout(lockout.event_name());
        } else {
            expedition.apply_lockout(lockout.clone());
        }
        for member in expedition.members() {
            if remove {
                ctx.sessions
                    .remove_lockout(member.id, lockout.expedition_name(), lockout.event_name());
            } else {
                ctx.sessions.add_lockout(member.id, lockout.clone());
            }
        }
        for character_id in non_members {
            ctx.sessions.add_lockout(character_id, lockout.clone());
        }
        Ok(())
    }
}

/// Sends the full expedition window to one connected character.
fn send_window(ctx: &ZoneContext, expedition: &ExpeditionGroup, character_id: CharacterId) {
    let compass = expedition.instanced_zone().location(LocationKind::Compass);
    ctx.sessions
        .set_expedition_id(character_id, Some(expedition.id()));
    ctx.sessions
        .send(character_id, ClientUpdate::Compass(Some(compass)));
    ctx.sessions
        .send(character_id, ClientUpdate::ExpeditionInfo(Some(expedition.info())));
    ctx.sessions
        .send(character_id, ClientUpdate::MemberList(expedition.member_entries()));
}

/// Refreshes or clears the window of every member connected here.
fn send_updates_to_zone_members(
    ctx: &ZoneContext,
    expedition: &ExpeditionGroup,
    clear: bool,
    message_on_clear: bool,
) {
    for member in expedition.members() {
        if ctx.sessions.find_by_id(member.id).is_none() {
            continue;
        }
        if clear {
            ctx.sessions.set_expedition_id(member.id, None);
            ctx.sessions.send(member.id, ClientUpdate::Compass(None));
            ctx.sessions.send(member.id, ClientUpdate::ExpeditionInfo(None));
            ctx.sessions.send(member.id, ClientUpdate::MemberList(Vec::new()));
        } else {
            send_window(ctx, expedition, member.id);
        }
        ctx.sessions.send(member.id, ClientUpdate::LockoutTimers);
        if clear && message_on_clear {
            ctx.sessions.send(
                member.id,
                Notice::Removed {
                    name: member.name.clone(),
                    expedition: expedition.name().to_string(),
                }
                .into(),
            );
        }
    }
}

/// Sets a member's status and sends the single-entry update to members
/// connected here. Returns `false` for non-members.
fn update_member_status(
    ctx: &ZoneContext,
    expedition: &mut ExpeditionGroup,
    character_id: CharacterId,
    status: MemberStatus,
) -> bool {
    let Some(name) = expedition.member(character_id).map(|m| m.name.clone()) else {
        return false;
    };
    expedition.set_member_status(character_id, status);
    let entry = MemberEntry { name, status };
    for member in expedition.members() {
        ctx.sessions
            .send(member.id, ClientUpdate::MemberListStatus(entry.clone()));
    }
    true
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use super::*;
    use crate::config::{ExpeditionSettings, StorageFailurePolicy};
    use crate::persistence::{ExpeditionStore, InMemoryExpeditionStore};
    use crate::relay::{RelayBus, RelayEnvelope};
    use crate::session::{LocalSessions, SessionDirectory};

    const IDENTITY: ProcessIdentity = ProcessIdentity::new(202, 0);

    struct Fixture {
        service: ExpeditionService,
        sessions: Arc<LocalSessions>,
        store: Arc<InMemoryExpeditionStore>,
        relay: broadcast::Receiver<RelayEnvelope>,
    }

    fn fixture(identity: ProcessIdentity, policy: StorageFailurePolicy) -> Fixture {
        let sessions = Arc::new(LocalSessions::new());
        let store = Arc::new(InMemoryExpeditionStore::new());
        let bus = RelayBus::new(64);
        let relay = bus.subscribe();
        let ctx = ZoneContext::new(
            identity,
            Arc::clone(&sessions) as Arc<dyn SessionDirectory>,
            Arc::clone(&store) as Arc<dyn ExpeditionStore>,
            Arc::new(bus),
            ExpeditionSettings {
                verify_leader_with_database: false,
                storage_failure_policy: policy,
            },
        );
        Fixture {
            service: ExpeditionService::new(ctx),
            sessions,
            store,
            relay,
        }
    }

    fn connect(f: &Fixture, id: u32, name: &str) {
        f.sessions.connect(
            ClientHandle::new(CharacterId::new(id), name, IDENTITY.zone_id, 0),
            Vec::new(),
        );
    }

    fn request(names: &[&str]) -> CreateRequest {
        let members: Vec<Member> = names
            .iter()
            .zip(1u32..)
            .map(|(name, id)| Member::new(CharacterId::new(id), *name, MemberStatus::Online))
            .collect();
        CreateRequest {
            name: "Deepest Guk".to_string(),
            min_players: 1,
            max_players: 6,
            leader: Leader::new(CharacterId::new(1), names.first().copied().unwrap_or_default()),
            members,
            instanced_zone: InstancedZoneRef::new(1050, 293),
            lockouts: Vec::new(),
        }
    }

    async fn created(f: &mut Fixture, names: &[&str]) -> ExpeditionId {
        let Ok(Some(id)) = f.service.create(request(names)).await else {
            panic!("creation failed");
        };
        id
    }

    fn drain(rx: &mut broadcast::Receiver<RelayEnvelope>) -> Vec<RelayMessage> {
        let mut messages = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            messages.push(envelope.message);
        }
        messages
    }

    #[tokio::test]
    async fn create_caches_broadcasts_and_notifies_leader() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        connect(&f, 1, "Alpha");
        let id = created(&mut f, &["Alpha", "Bravo"]).await;

        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected cached expedition");
        };
        assert_eq!(expedition.member_count(), 2);
        assert!(drain(&mut f.relay).contains(&RelayMessage::Create { expedition_id: id }));

        let updates = f.sessions.drain_updates(CharacterId::new(1));
        assert!(updates.contains(&ClientUpdate::Notice(Notice::ExpeditionAvailable {
            expedition: "Deepest Guk".to_string()
        })));
        let Some(handle) = f.sessions.find_by_id(CharacterId::new(1)) else {
            panic!("expected session");
        };
        assert_eq!(handle.expedition_id, Some(id));
    }

    #[tokio::test]
    async fn create_rejects_members_of_other_expeditions() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        created(&mut f, &["Alpha"]).await;
        let result = f.service.create(request(&["Alpha", "Bravo"])).await;
        assert!(matches!(result, Ok(None)));
        assert_eq!(f.service.cache().len(), 1);
    }

    #[tokio::test]
    async fn create_requires_instance_and_valid_limits() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let mut no_instance = request(&["Alpha"]);
        no_instance.instanced_zone = InstancedZoneRef::new(0, 293);
        assert!(matches!(
            f.service.create(no_instance).await,
            Err(ExpeditionError::InstanceUnavailable)
        ));

        let mut bad_limits = request(&["Alpha"]);
        bad_limits.min_players = 3;
        assert!(matches!(
            f.service.create(bad_limits).await,
            Err(ExpeditionError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn add_member_is_noop_for_existing_member() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let id = created(&mut f, &["Alpha"]).await;
        drain(&mut f.relay);

        assert!(matches!(
            f.service.add_member(id, CharacterId::new(1), "Alpha").await,
            Ok(false)
        ));
        assert!(drain(&mut f.relay).is_empty());
        assert!(matches!(
            f.service.add_member(id, CharacterId::new(2), "Bravo").await,
            Ok(true)
        ));
        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        assert!(expedition.instanced_zone().characters().contains(&CharacterId::new(2)));
    }

    #[tokio::test]
    async fn removing_leader_promotes_next_member() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let id = created(&mut f, &["Alpha", "Bravo", "Charlie"]).await;
        assert!(matches!(f.service.remove_member(id, "alpha").await, Ok(true)));

        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        assert_eq!(expedition.leader().name, "Bravo");
        assert!(expedition.was_member(CharacterId::new(1)));
        let Ok(Some(stored)) = f.store.get_leader(id).await else {
            panic!("expected stored leader");
        };
        assert_eq!(stored.name, "Bravo");
    }

    #[tokio::test]
    async fn removing_last_member_keeps_stale_leader() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let id = created(&mut f, &["Alpha"]).await;
        assert!(matches!(f.service.remove_member(id, "Alpha").await, Ok(true)));
        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        assert_eq!(expedition.member_count(), 0);
        assert_eq!(expedition.leader().name, "Alpha");
    }

    #[tokio::test]
    async fn swap_keeps_member_count_and_history() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let id = created(&mut f, &["Alpha", "Bravo"]).await;
        let swapped = f
            .service
            .swap_member(id, CharacterId::new(9), "Zulu", "Bravo")
            .await;
        assert!(matches!(swapped, Ok(true)));

        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        assert_eq!(expedition.member_count(), 2);
        assert!(expedition.was_member(CharacterId::new(2)));
        assert!(expedition.was_member(CharacterId::new(9)));
        assert!(!expedition.has_member(CharacterId::new(2)));
    }

    #[tokio::test]
    async fn lockout_reaches_connected_members() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        connect(&f, 2, "Bravo");
        let id = created(&mut f, &["Alpha", "Bravo"]).await;
        let Ok(()) = f.service.add_lockout(id, "Ritual", 60).await else {
            panic!("add_lockout failed");
        };
        assert_eq!(f.sessions.lockouts(CharacterId::new(2), "Deepest Guk").len(), 1);
        assert_eq!(f.store.character_lockouts(CharacterId::new(1)).await.len(), 1);

        let Ok(()) = f.service.remove_lockout(id, "Ritual").await else {
            panic!("remove_lockout failed");
        };
        assert!(f.sessions.lockouts(CharacterId::new(2), "Deepest Guk").is_empty());
        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        assert!(!expedition.has_lockout("Ritual"));
    }

    #[tokio::test]
    async fn adding_a_lockout_again_restarts_it() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let id = created(&mut f, &["Alpha"]).await;
        let Ok(()) = f.service.add_lockout(id, "Ritual", 3600).await else {
            panic!("add_lockout failed");
        };
        let before = Utc::now();
        let Ok(()) = f.service.add_lockout(id, "Ritual", 60).await else {
            panic!("add_lockout failed");
        };
        let after = Utc::now();

        let Some(lockout) = f
            .service
            .expedition(id)
            .and_then(|e| e.lockouts().get("Ritual"))
            .cloned()
        else {
            panic!("expected lockout");
        };
        assert_eq!(lockout.duration_secs(), 60);
        assert!(lockout.expire_at() >= before + chrono::Duration::seconds(60));
        assert!(lockout.expire_at() <= after + chrono::Duration::seconds(60));

        let held = f.store.character_lockouts(CharacterId::new(1)).await;
        assert_eq!(held.len(), 1);
        assert!(held.iter().all(|(l, _)| l.expire_at() == lockout.expire_at()));
    }

    #[tokio::test]
    async fn instance_process_grants_lockouts_to_non_members() {
        let dz = ProcessIdentity::new(293, 1050);
        let mut f = fixture(dz, StorageFailurePolicy::Proceed);
        f.sessions
            .connect(ClientHandle::new(CharacterId::new(50), "Straggler", 293, 1050), Vec::new());
        let id = created(&mut f, &["Alpha"]).await;
        let Ok(()) = f.service.add_lockout(id, "Ritual", 60).await else {
            panic!("add_lockout failed");
        };
        assert_eq!(f.sessions.lockouts(CharacterId::new(50), "Deepest Guk").len(), 1);
        assert_eq!(f.store.character_lockouts(CharacterId::new(50)).await.len(), 1);
    }

    #[tokio::test]
    async fn abort_policy_leaves_cache_untouched() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Abort);
        let id = created(&mut f, &["Alpha"]).await;
        drain(&mut f.relay);
        f.store.set_fail_writes(true);

        let result = f.service.set_locked(id, true).await;
        assert!(matches!(result, Err(ExpeditionError::Storage(_))));
        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        assert!(!expedition.is_locked());
        assert!(drain(&mut f.relay).is_empty());
    }

    #[tokio::test]
    async fn proceed_policy_applies_despite_failures() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let id = created(&mut f, &["Alpha"]).await;
        f.store.set_fail_writes(true);
        let Ok(()) = f.service.set_locked(id, true).await else {
            panic!("proceed should not fail");
        };
        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        assert!(expedition.is_locked());
    }

    #[tokio::test]
    async fn online_reply_marks_instance_members() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        let id = created(&mut f, &["Alpha", "Bravo", "Charlie"]).await;
        f.service.apply_online_members(&[
            CharacterEntry {
                expedition_id: id,
                character_id: CharacterId::new(1),
                zone_id: 293,
                instance_id: 1050,
                online: true,
            },
            CharacterEntry {
                online: true,
                instance_id: 0,
                ..CharacterEntry::query(id, CharacterId::new(2))
            },
            CharacterEntry::query(id, CharacterId::new(3)),
        ]);
        let Some(expedition) = f.service.expedition(id) else {
            panic!("expected expedition");
        };
        let statuses: Vec<MemberStatus> = expedition.members().iter().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![
                MemberStatus::InDynamicZone,
                MemberStatus::Online,
                MemberStatus::Offline
            ]
        );
    }

    #[tokio::test]
    async fn cache_all_loads_and_queries_members_once() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        created(&mut f, &["Alpha", "Bravo"]).await;
        let mut second = request(&["Charlie"]);
        second.members = vec![Member::new(CharacterId::new(3), "Charlie", MemberStatus::Online)];
        second.leader = Leader::new(CharacterId::new(3), "Charlie");
        second.instanced_zone = InstancedZoneRef::new(1051, 293);
        let Ok(Some(_)) = f.service.create(second).await else {
            panic!("second creation failed");
        };
        drain(&mut f.relay);

        let Ok(count) = f.service.cache_all().await else {
            panic!("cache_all failed");
        };
        assert_eq!(count, 2);
        let queries: Vec<RelayMessage> = drain(&mut f.relay)
            .into_iter()
            .filter(|m| matches!(m, RelayMessage::OnlineMembersQuery { .. }))
            .collect();
        assert_eq!(queries.len(), 1);
        assert!(matches!(
            queries.first(),
            Some(RelayMessage::OnlineMembersQuery { entries }) if entries.len() == 3
        ));
    }

    #[tokio::test]
    async fn deleted_expedition_is_evicted() {
        let mut f = fixture(IDENTITY, StorageFailurePolicy::Proceed);
        connect(&f, 1, "Alpha");
        let id = created(&mut f, &["Alpha"]).await;
        f.service.apply_deleted(id);
        assert!(f.service.expedition(id).is_none());
        let Some(handle) = f.sessions.find_by_id(CharacterId::new(1)) else {
            panic!("expected session");
        };
        assert_eq!(handle.expedition_id, None);
    }
}
