//! Leader commands and the invite flows that may cross process
//! boundaries.
//!
//! A target connected to this process is handled directly. Otherwise the
//! command goes to the coordinator as a request, and the process holding
//! the target finishes it when the matching continuation comes back.

use chrono::Utc;

use super::expedition_service::ExpeditionService;
use crate::domain::{
    AddCandidate, CharacterId, ClientUpdate, ExpeditionGroup, ExpeditionId, InviteWindow, Leader,
    LockoutTimer, MemberStatus, Notice,
};
use crate::error::ExpeditionError;
use crate::relay::{DzCommand, RelayMessage};
use crate::session::{ClientHandle, PendingInvite};
use crate::zone_context::ZoneContext;

/// Member name shown when every member is kicked at once.
const KICK_EVERYONE: &str = "Everyone";

/// A command typed by a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    /// Invite a character.
    AddPlayer {
        /// Character to invite.
        name: String,
    },
    /// Invite a character in place of a member.
    SwapPlayer {
        /// Member to replace.
        remove_name: String,
        /// Character to invite.
        add_name: String,
    },
    /// Remove a member.
    RemovePlayer {
        /// Member to remove.
        name: String,
    },
    /// Hand leadership to another member.
    MakeLeader {
        /// New leader.
        name: String,
    },
    /// Leave the expedition.
    Quit,
    /// List the leader and members.
    PlayerList,
    /// Remove every member.
    KickPlayers,
    /// Answer the pending invite.
    InviteResponse {
        /// Whether the invite was accepted.
        accepted: bool,
    },
}

/// Runs player commands against an [`ExpeditionService`].
#[derive(Debug)]
pub struct InviteCoordinator<'a> {
    service: &'a mut ExpeditionService,
    ctx: ZoneContext,
}

impl<'a> InviteCoordinator<'a> {
    pub(super) fn new(service: &'a mut ExpeditionService) -> Self {
        let ctx = service.context().clone();
        Self { service, ctx }
    }

    /// Runs a command issued by a player connected to this process.
    ///
    /// Validation failures are reported to the player and are not errors.
    ///
    /// # Errors
    ///
    /// Propagates storage errors under the abort policy.
    pub async fn handle(&mut self, requester: CharacterId, command: PlayerCommand) -> Result<(), ExpeditionError> {
        let Some(handle) = self.ctx.sessions.find_by_id(requester) else {
            tracing::debug!(character_id = %requester, "command from unknown session dropped");
            return Ok(());
        };

        if let PlayerCommand::InviteResponse { accepted } = command {
            return self.dz_invite_response(&handle, accepted).await;
        }

        let Some(id) = self.expedition_of(&handle) else {
            self.send(&handle, Notice::NotAssigned);
            return Ok(());
        };

        match command {
            PlayerCommand::AddPlayer { name } => {
                self.dz_add_player(&handle, id, &name).await;
                Ok(())
            }
            PlayerCommand::SwapPlayer {
                remove_name,
                add_name,
            } => {
                self.dz_swap_player(&handle, id, &remove_name, &add_name)
                    .await;
                Ok(())
            }
            PlayerCommand::RemovePlayer { name } => self.dz_remove_player(&handle, id, &name).await,
            PlayerCommand::MakeLeader { name } => self.dz_make_leader(&handle, id, &name).await,
            PlayerCommand::Quit => self.dz_quit(&handle, id).await,
            PlayerCommand::PlayerList => {
                self.dz_player_list(&handle, id);
                Ok(())
            }
            PlayerCommand::KickPlayers => self.dz_kick_players(&handle, id).await,
            PlayerCommand::InviteResponse { .. } => Ok(()),
        }
    }

    /// Invites a character, locally or through the coordinator.
    pub async fn dz_add_player(&self, requester: &ClientHandle, id: ExpeditionId, add_name: &str) {
        if self.confirm_leader(requester, id).await {
            self.add_player(requester, id, add_name, None);
        }
    }

    /// Invites a character to replace a member.
    pub async fn dz_swap_player(
        &self,
        requester: &ClientHandle,
        id: ExpeditionId,
        remove_name: &str,
        add_name: &str,
    ) {
        if !self.confirm_leader(requester, id).await {
            return;
        }
        let is_member = self
            .service
            .expedition(id)
            .is_some_and(|e| e.has_member_named(remove_name));
        if remove_name.is_empty() || !is_member {
            self.send(
                requester,
                Notice::SwapCannotRemove {
                    name: format_name(remove_name),
                },
            );
            return;
        }
        self.add_player(requester, id, add_name, Some(remove_name));
    }

    /// Removes a member on the leader's behalf.
    ///
    /// # Errors
    ///
    /// Propagates storage errors under the abort policy.
    pub async fn dz_remove_player(
        &mut self,
        requester: &ClientHandle,
        id: ExpeditionId,
        name: &str,
    ) -> Result<(), ExpeditionError> {
        if !self.confirm_leader(requester, id).await {
            return Ok(());
        }
        let name = format_name(name);
        let expedition = self.expedition_name(id);
        tracing::debug!(expedition_id = %id, requester = %requester.name, target = %name, "remove player");

        if self.service.remove_member(id, &name).await? {
            self.send(requester, Notice::Removed { name, expedition });
        } else {
            self.send(requester, Notice::NotMember { name });
        }
        Ok(())
    }

    /// Hands leadership to another member.
    ///
    /// Storage is only updated once the new leader's session is found,
    /// here or in the process answering the coordinator's request.
    ///
    /// # Errors
    ///
    /// Propagates storage errors under the abort policy.
    pub async fn dz_make_leader(
        &mut self,
        requester: &ClientHandle,
        id: ExpeditionId,
        name: &str,
    ) -> Result<(), ExpeditionError> {
        if !self.confirm_leader(requester, id).await {
            return Ok(());
        }
        let name = format_name(name);
        if name.is_empty() {
            self.send(requester, Notice::MakeLeaderNotOnline { name });
            return Ok(());
        }
        let is_member = self
            .service
            .expedition(id)
            .is_some_and(|e| e.has_member_named(&name));
        if !is_member {
            self.send(requester, Notice::NotMember { name });
            return Ok(());
        }

        match self.ctx.sessions.find_by_name(&name) {
            Some(new_leader) => {
                self.process_make_leader(id, Some(requester), Some(new_leader), &name, true)
                    .await
            }
            None => {
                self.ctx
                    .broadcast(RelayMessage::MakeLeaderRequest(DzCommand {
                        expedition_id: id,
                        requester_name: requester.name.clone(),
                        target_name: name,
                        remove_name: String::new(),
                        is_char_online: false,
                    }));
                Ok(())
            }
        }
    }

    /// Leaves the expedition. Needs no leadership.
    ///
    /// # Errors
    ///
    /// Propagates storage errors under the abort policy.
    pub async fn dz_quit(&mut self, requester: &ClientHandle, id: ExpeditionId) -> Result<(), ExpeditionError> {
        self.service.remove_member(id, &requester.name).await?;
        Ok(())
    }

    /// Lists the leader and members to the requester.
    pub fn dz_player_list(&self, requester: &ClientHandle, id: ExpeditionId) {
        let Some(expedition) = self.service.expedition(id) else {
            return;
        };
        let names = expedition
            .members()
            .iter()
            .map(|m| m.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.send(
            requester,
            Notice::Leader {
                name: expedition.leader().name.clone(),
            },
        );
        self.send(requester, Notice::Members { names });
    }

    /// Removes every member on the leader's behalf.
    ///
    /// # Errors
    ///
    /// Propagates storage errors under the abort policy.
    pub async fn dz_kick_players(
        &mut self,
        requester: &ClientHandle,
        id: ExpeditionId,
    ) -> Result<(), ExpeditionError> {
        if !self.confirm_leader(requester, id).await {
            return Ok(());
        }
        let expedition = self.expedition_name(id);
        self.service.remove_all_members(id).await?;
        self.send(
            requester,
            Notice::Removed {
                name: KICK_EVERYONE.to_string(),
                expedition,
            },
        );
        Ok(())
    }

    /// Answers the requester's pending invite.
    ///
    /// The invite is cleared first, then every add rule runs again since
    /// the expedition may have changed while the invite was open.
    ///
    /// # Errors
    ///
    /// Propagates storage errors under the abort policy.
    pub async fn dz_invite_response(&mut self, invitee: &ClientHandle, accepted: bool) -> Result<(), ExpeditionError> {
        let Some(invite) = invitee.pending_invite.clone() else {
            tracing::debug!(character = %invitee.name, "invite response without a pending invite");
            return Ok(());
        };
        self.ctx
            .sessions
            .set_pending_invite(invitee.character_id, None);

        let id = invite.expedition_id;
        let Some(expedition) = self.service.expedition(id) else {
            return Ok(());
        };
        let leader_name = expedition.leader().name.clone();
        tracing::debug!(
            expedition_id = %id,
            character = %invitee.name,
            accepted,
            swap = invite.swap_remove_name.as_deref().unwrap_or_default(),
            "invite response"
        );

        if !accepted {
            self.ctx.notify_character(
                &leader_name,
                Notice::InviteDeclined {
                    name: invitee.name.clone(),
                },
            );
            return Ok(());
        }

        let swap_remove_name = invite.swap_remove_name.as_deref();
        let now = Utc::now();
        let lockouts = self
            .ctx
            .sessions
            .lockouts(invitee.character_id, expedition.name());

        let mut has_conflicts = expedition.is_locked();
        if expedition.is_locked() {
            self.ctx
                .notify_character(&leader_name, Notice::NotAllowingInvites);
        } else {
            let candidate = AddCandidate {
                id: invitee.character_id,
                name: &invitee.name,
                instance_id: invitee.instance_id,
                expedition_id: invitee.expedition_id,
                pending_invite: None,
                lockouts: &lockouts,
            };
            let conflicts = expedition.add_conflicts(&candidate, swap_remove_name.is_some(), now);
            for conflict in &conflicts {
                self.ctx
                    .notify_character(&leader_name, conflict.notice(&invitee.name));
            }
            has_conflicts = !conflicts.is_empty();
        }
        if swap_remove_name.is_some_and(|name| !expedition.has_member_named(name)) {
            has_conflicts = true;
        }

        if has_conflicts {
            self.ctx.notify_character(
                &leader_name,
                Notice::InviteError {
                    name: invitee.name.clone(),
                },
            );
            return Ok(());
        }

        self.ctx.notify_character(
            &leader_name,
            Notice::InviteAccepted {
                name: invitee.name.clone(),
            },
        );

        let join = expedition.lockouts_for_new_member(&lockouts, now);
        let in_instance = expedition.instanced_zone().is_current_zone(self.ctx.identity);
        self.grant_join_lockouts(invitee.character_id, join.replay, join.pending, in_instance)
            .await?;

        let cid = invitee.character_id;
        match swap_remove_name {
            Some(remove_name) => {
                self.service
                    .swap_member(id, cid, &invitee.name, remove_name)
                    .await?;
            }
            None => {
                self.service.add_member(id, cid, &invitee.name).await?;
            }
        }

        if in_instance {
            self.service
                .set_member_status(id, cid, MemberStatus::InDynamicZone);
        }
        Ok(())
    }

    /// Finishes an invite the coordinator routed here.
    ///
    /// With the target online, the process holding them runs the add
    /// rules and sends the invite. Otherwise the process holding the
    /// inviter tells them the target is not online.
    pub fn continue_add_player(&self, command: &DzCommand) {
        if !command.is_char_online {
            if let Some(inviter) = self.ctx.sessions.find_by_name(&command.requester_name) {
                let name = format_name(&command.target_name);
                self.send(&inviter, Notice::NotOnline { name: name.clone() });
                self.send(&inviter, Notice::InviteFailed { name });
            }
            return;
        }

        if !self.service.cache().contains(command.expedition_id) {
            return;
        }
        if let Some(target) = self.ctx.sessions.find_by_name(&command.target_name) {
            self.try_add_client(
                command.expedition_id,
                &target,
                &command.requester_name,
                &command.target_name,
                command.swap_remove_name(),
            );
        }
    }

    /// Finishes a leadership change the coordinator routed here.
    ///
    /// # Errors
    ///
    /// Propagates storage errors under the abort policy.
    pub async fn continue_make_leader(&mut self, command: &DzCommand) -> Result<(), ExpeditionError> {
        if !self.service.cache().contains(command.expedition_id) {
            return Ok(());
        }
        let old_leader = self.ctx.sessions.find_by_name(&command.requester_name);
        let new_leader = self.ctx.sessions.find_by_name(&command.target_name);
        self.process_make_leader(
            command.expedition_id,
            old_leader.as_ref(),
            new_leader,
            &command.target_name,
            command.is_char_online,
        )
        .await
    }

    fn expedition_of(&self, handle: &ClientHandle) -> Option<ExpeditionId> {
        handle
            .expedition_id
            .filter(|id| self.service.cache().contains(*id))
            .or_else(|| {
                self.service
                    .cache()
                    .find_by_character(handle.character_id)
                    .map(ExpeditionGroup::id)
            })
    }

    fn expedition_name(&self, id: ExpeditionId) -> String {
        self.service
            .expedition(id)
            .map(|e| e.name().to_string())
            .unwrap_or_default()
    }

    async fn confirm_leader(&self, requester: &ClientHandle, id: ExpeditionId) -> bool {
        let leader = if self.ctx.settings.verify_leader_with_database {
            match self.ctx.store.get_leader(id).await {
                Ok(leader) => leader,
                Err(e) => {
                    tracing::warn!(expedition_id = %id, error = %e, "failed to read leader");
                    None
                }
            }
        } else {
            self.service.expedition(id).map(|e| e.leader().clone())
        };

        let Some(leader) = leader.filter(|l| l.id.get() != 0) else {
            self.send(requester, Notice::UnableToRetrieveLeader);
            return false;
        };
        if leader.id != requester.character_id {
            self.send(requester, Notice::NotLeader { leader: leader.name });
            return false;
        }
        true
    }

    fn add_player(
        &self,
        requester: &ClientHandle,
        id: ExpeditionId,
        add_name: &str,
        swap_remove_name: Option<&str>,
    ) {
        let Some(expedition) = self.service.expedition(id) else {
            return;
        };

        let failure = if expedition.is_locked() {
            Some(Notice::NotAllowingInvites)
        } else if add_name.is_empty() {
            Some(Notice::NotOnline {
                name: String::new(),
            })
        } else if expedition
            .member_named(add_name)
            .is_some_and(|m| m.status != MemberStatus::Offline)
        {
            Some(Notice::AlreadyPart {
                name: add_name.to_string(),
            })
        } else {
            None
        };
        if let Some(notice) = failure {
            self.send(requester, notice);
            self.send(
                requester,
                Notice::InviteFailed {
                    name: format_name(add_name),
                },
            );
            return;
        }

        match self.ctx.sessions.find_by_name(add_name) {
            Some(target) => self.try_add_client(id, &target, &requester.name, add_name, swap_remove_name),
            None => {
                tracing::debug!(expedition_id = %id, target = add_name, "target not local, asking coordinator");
                self.ctx
                    .broadcast(RelayMessage::AddPlayerRequest(DzCommand {
                        expedition_id: id,
                        requester_name: requester.name.clone(),
                        target_name: add_name.to_string(),
                        remove_name: swap_remove_name.unwrap_or_default().to_string(),
                        is_char_online: false,
                    }));
            }
        }
    }

    fn try_add_client(
        &self,
        id: ExpeditionId,
        target: &ClientHandle,
        inviter_name: &str,
        orig_add_name: &str,
        swap_remove_name: Option<&str>,
    ) {
        let Some(expedition) = self.service.expedition(id) else {
            return;
        };
        tracing::debug!(
            expedition_id = %id,
            inviter = inviter_name,
            target = %target.name,
            swap = swap_remove_name.unwrap_or_default(),
            "add player"
        );

        let lockouts = self
            .ctx
            .sessions
            .lockouts(target.character_id, expedition.name());
        let candidate = AddCandidate {
            id: target.character_id,
            name: &target.name,
            instance_id: target.instance_id,
            expedition_id: target.expedition_id,
            pending_invite: target.pending_invite_id(),
            lockouts: &lockouts,
        };
        let conflicts = expedition.add_conflicts(&candidate, swap_remove_name.is_some(), Utc::now());

        if conflicts.is_empty() {
            // the inviter sees the name as they typed it
            let name = orig_add_name.to_string();
            let notice = match swap_remove_name {
                Some(_) => Notice::SwapInvited { name },
                None => Notice::Invited { name },
            };
            self.ctx.notify_character(inviter_name, notice);
            self.send_invite(expedition, target, inviter_name, swap_remove_name, &lockouts);
            return;
        }

        for conflict in &conflicts {
            self.ctx
                .notify_character(inviter_name, conflict.notice(&target.name));
        }
        if swap_remove_name.is_none() {
            self.ctx.notify_character(
                inviter_name,
                Notice::InviteFailed {
                    name: target.name.clone(),
                },
            );
        }
    }

    fn send_invite(
        &self,
        expedition: &ExpeditionGroup,
        target: &ClientHandle,
        inviter_name: &str,
        swap_remove_name: Option<&str>,
        lockouts: &[LockoutTimer],
    ) {
        let cid = target.character_id;
        let sessions = &self.ctx.sessions;
        sessions.set_pending_invite(
            cid,
            Some(PendingInvite {
                expedition_id: expedition.id(),
                inviter_name: inviter_name.to_string(),
                swap_remove_name: swap_remove_name.map(str::to_string),
            }),
        );
        sessions.send(
            cid,
            Notice::AskedToJoin {
                leader: expedition.leader().name.clone(),
                expedition: expedition.name().to_string(),
            }
            .into(),
        );

        let warnings = expedition.invite_warnings(lockouts, Utc::now());
        if !warnings.is_empty() {
            sessions.send(
                cid,
                Notice::LockoutWarningHeader {
                    expedition: expedition.name().to_string(),
                }
                .into(),
            );
        }
        for (event, remaining) in warnings {
            sessions.send(cid, Notice::LockoutWarning { event, remaining }.into());
        }

        sessions.send(
            cid,
            ClientUpdate::Invite(InviteWindow {
                inviter_name: inviter_name.to_string(),
                expedition_name: expedition.name().to_string(),
                swap_name: swap_remove_name.map(str::to_string),
                dz_zone_id: expedition.instanced_zone().zone_id(),
                dz_instance_id: expedition.instanced_zone().instance_id(),
            }),
        );
    }

    async fn grant_join_lockouts(
        &self,
        character_id: CharacterId,
        replay: Option<LockoutTimer>,
        pending: Vec<LockoutTimer>,
        in_instance: bool,
    ) -> Result<(), ExpeditionError> {
        let store = &self.ctx.store;
        let result = store.delete_pending_character_lockouts(character_id).await;
        self.ctx
            .check_call("delete_pending_character_lockouts", result)?;

        if let Some(replay) = replay {
            let result = store
                .insert_character_lockouts(character_id, std::slice::from_ref(&replay), false)
                .await;
            self.ctx.check_write("insert_character_lockouts", result)?;
            self.ctx.sessions.add_lockout(character_id, replay);
        }

        if pending.is_empty() {
            return Ok(());
        }
        if in_instance {
            let result = store
                .insert_character_lockouts(character_id, &pending, false)
                .await;
            self.ctx.check_write("insert_character_lockouts", result)?;
            for lockout in pending {
                self.ctx.sessions.add_lockout(character_id, lockout);
            }
        } else {
            // staged until the character enters the instance
            let result = store
                .insert_character_lockouts(character_id, &pending, true)
                .await;
            self.ctx
                .check_call("insert_pending_character_lockouts", result)?;
        }
        Ok(())
    }

    async fn process_make_leader(
        &mut self,
        id: ExpeditionId,
        old_leader: Option<&ClientHandle>,
        new_leader: Option<ClientHandle>,
        new_leader_name: &str,
        is_online: bool,
    ) -> Result<(), ExpeditionError> {
        if let Some(old_leader) = old_leader {
            let name = new_leader_name.to_string();
            let notice = if is_online {
                Notice::MakeLeaderName { name }
            } else {
                Notice::MakeLeaderNotOnline { name }
            };
            self.send(old_leader, notice);
        }

        let new_leader = new_leader.or_else(|| self.ctx.sessions.find_by_name(new_leader_name));
        if let Some(new_leader) = new_leader {
            self.send(&new_leader, Notice::MakeLeaderYou);
            self.service
                .set_new_leader(id, Leader::new(new_leader.character_id, new_leader.name))
                .await?;
        }
        Ok(())
    }

    fn send(&self, handle: &ClientHandle, notice: Notice) {
        self.ctx.sessions.send(handle.character_id, notice.into());
    }
}

/// Capitalizes a typed name the way character names are stored.
fn format_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use tokio::sync::broadcast;

    use super::*;
    use crate::config::{ExpeditionSettings, StorageFailurePolicy};
    use crate::domain::{InstancedZoneRef, Member, ProcessIdentity, REPLAY_TIMER_NAME};
    use crate::persistence::{ExpeditionStore, InMemoryExpeditionStore};
    use crate::relay::{RelayBus, RelayEnvelope};
    use crate::service::CreateRequest;
    use crate::session::{LocalSessions, SessionDirectory};

    const ZONE: ProcessIdentity = ProcessIdentity::new(202, 0);

    struct Fixture {
        service: ExpeditionService,
        sessions: Arc<LocalSessions>,
        store: Arc<InMemoryExpeditionStore>,
        relay: broadcast::Receiver<RelayEnvelope>,
        id: ExpeditionId,
    }

    fn cid(id: u32) -> CharacterId {
        CharacterId::new(id)
    }

    async fn fixture(max_players: u32, verify_with_database: bool) -> Fixture {
        let sessions = Arc::new(LocalSessions::new());
        let store = Arc::new(InMemoryExpeditionStore::new());
        let bus = RelayBus::new(64);
        let relay = bus.subscribe();
        let ctx = ZoneContext::new(
            ZONE,
            Arc::clone(&sessions) as Arc<dyn SessionDirectory>,
            Arc::clone(&store) as Arc<dyn ExpeditionStore>,
            Arc::new(bus),
            ExpeditionSettings {
                verify_leader_with_database: verify_with_database,
                storage_failure_policy: StorageFailurePolicy::Proceed,
            },
        );
        let mut service = ExpeditionService::new(ctx);
        sessions.connect(ClientHandle::new(cid(1), "Leader", 202, 0), Vec::new());
        let Ok(Some(id)) = service
            .create(CreateRequest {
                name: "Plane of Fear".to_string(),
                min_players: 1,
                max_players,
                leader: Leader::new(cid(1), "Leader"),
                members: vec![Member::new(cid(1), "Leader", MemberStatus::Online)],
                instanced_zone: InstancedZoneRef::new(3000, 72),
                lockouts: Vec::new(),
            })
            .await
        else {
            panic!("creation failed");
        };
        sessions.drain_updates(cid(1));
        Fixture {
            service,
            sessions,
            store,
            relay,
            id,
        }
    }

    fn notices(sessions: &LocalSessions, id: CharacterId) -> Vec<Notice> {
        sessions
            .drain_updates(id)
            .into_iter()
            .filter_map(|u| match u {
                ClientUpdate::Notice(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    async fn run(f: &mut Fixture, requester: u32, command: PlayerCommand) {
        let Ok(()) = f.service.invites().handle(cid(requester), command).await else {
            panic!("command failed");
        };
    }

    #[test]
    fn names_are_capitalized() {
        assert_eq!(format_name(" fIRIONA "), "Firiona");
        assert_eq!(format_name(""), "");
    }

    #[tokio::test]
    async fn local_invite_and_accept_adds_member() {
        let mut f = fixture(6, false).await;
        f.sessions
            .connect(ClientHandle::new(cid(2), "Guest", 202, 0), Vec::new());

        run(&mut f, 1, PlayerCommand::AddPlayer { name: "guest".to_string() }).await;
        assert!(notices(&f.sessions, cid(1)).contains(&Notice::Invited {
            name: "guest".to_string()
        }));
        let Some(guest) = f.sessions.find_by_id(cid(2)) else {
            panic!("expected guest");
        };
        assert_eq!(guest.pending_invite_id(), Some(f.id));

        run(&mut f, 2, PlayerCommand::InviteResponse { accepted: true }).await;
        let Some(expedition) = f.service.expedition(f.id) else {
            panic!("expected expedition");
        };
        assert!(expedition.has_member(cid(2)));
        assert!(notices(&f.sessions, cid(1)).contains(&Notice::InviteAccepted {
            name: "Guest".to_string()
        }));
        let Some(guest) = f.sessions.find_by_id(cid(2)) else {
            panic!("expected guest");
        };
        assert_eq!(guest.pending_invite, None);
    }

    #[tokio::test]
    async fn full_expedition_rejects_invite_without_messaging_target() {
        let mut f = fixture(1, false).await;
        f.sessions
            .connect(ClientHandle::new(cid(2), "Seventh", 202, 0), Vec::new());
        run(&mut f, 1, PlayerCommand::AddPlayer { name: "Seventh".to_string() }).await;

        let leader = notices(&f.sessions, cid(1));
        assert!(leader.contains(&Notice::ExceedMax { max_players: 1 }));
        assert!(leader.contains(&Notice::InviteFailed {
            name: "Seventh".to_string()
        }));
        assert!(f.sessions.drain_updates(cid(2)).is_empty());
    }

    #[tokio::test]
    async fn locked_expedition_short_circuits() {
        let mut f = fixture(6, false).await;
        let Ok(()) = f.service.set_locked(f.id, true).await else {
            panic!("lock failed");
        };
        run(&mut f, 1, PlayerCommand::AddPlayer { name: "Anyone".to_string() }).await;
        assert_eq!(
            notices(&f.sessions, cid(1)),
            vec![
                Notice::NotAllowingInvites,
                Notice::InviteFailed {
                    name: "Anyone".to_string()
                }
            ]
        );
    }

    #[tokio::test]
    async fn unknown_target_is_asked_of_the_coordinator() {
        let mut f = fixture(6, false).await;
        while f.relay.try_recv().is_ok() {}
        run(&mut f, 1, PlayerCommand::AddPlayer { name: "Faraway".to_string() }).await;
        let Ok(envelope) = f.relay.try_recv() else {
            panic!("expected request");
        };
        assert!(matches!(
            envelope.message,
            RelayMessage::AddPlayerRequest(DzCommand { ref target_name, .. }) if target_name == "Faraway"
        ));
    }

    #[tokio::test]
    async fn non_leader_commands_are_refused() {
        let mut f = fixture(6, false).await;
        f.sessions
            .connect(ClientHandle::new(cid(2), "Guest", 202, 0), Vec::new());
        let Ok(true) = f.service.add_member(f.id, cid(2), "Guest").await else {
            panic!("add failed");
        };
        f.sessions.drain_updates(cid(2));
        run(&mut f, 2, PlayerCommand::KickPlayers).await;
        assert_eq!(
            notices(&f.sessions, cid(2)),
            vec![Notice::NotLeader {
                leader: "Leader".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn database_leader_check_uses_storage() {
        let mut f = fixture(6, true).await;
        let Ok(_) = f.store.update_leader(f.id, &Leader::new(cid(9), "Other")).await else {
            panic!("update failed");
        };
        run(&mut f, 1, PlayerCommand::KickPlayers).await;
        assert_eq!(
            notices(&f.sessions, cid(1)),
            vec![Notice::NotLeader {
                leader: "Other".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn commands_without_expedition_report_not_assigned() {
        let mut f = fixture(6, false).await;
        f.sessions
            .connect(ClientHandle::new(cid(5), "Loner", 202, 0), Vec::new());
        run(&mut f, 5, PlayerCommand::PlayerList).await;
        assert_eq!(notices(&f.sessions, cid(5)), vec![Notice::NotAssigned]);
    }

    #[tokio::test]
    async fn make_leader_to_local_member() {
        let mut f = fixture(6, false).await;
        f.sessions
            .connect(ClientHandle::new(cid(2), "Guest", 202, 0), Vec::new());
        let Ok(true) = f.service.add_member(f.id, cid(2), "Guest").await else {
            panic!("add failed");
        };
        f.sessions.drain_updates(cid(1));
        f.sessions.drain_updates(cid(2));

        run(&mut f, 1, PlayerCommand::MakeLeader { name: "guest".to_string() }).await;
        let Some(expedition) = f.service.expedition(f.id) else {
            panic!("expected expedition");
        };
        assert_eq!(expedition.leader().id, cid(2));
        assert!(notices(&f.sessions, cid(1)).contains(&Notice::MakeLeaderName {
            name: "Guest".to_string()
        }));
        assert!(notices(&f.sessions, cid(2)).contains(&Notice::MakeLeaderYou));
    }

    #[tokio::test]
    async fn swap_requires_current_member() {
        let mut f = fixture(6, false).await;
        run(
            &mut f,
            1,
            PlayerCommand::SwapPlayer {
                remove_name: "nobody".to_string(),
                add_name: "Guest".to_string(),
            },
        )
        .await;
        assert_eq!(
            notices(&f.sessions, cid(1)),
            vec![Notice::SwapCannotRemove {
                name: "Nobody".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn accepted_swap_fails_if_target_already_left() {
        let mut f = fixture(6, false).await;
        f.sessions
            .connect(ClientHandle::new(cid(3), "Newcomer", 202, 0), Vec::new());
        let Ok(true) = f.service.add_member(f.id, cid(2), "Old").await else {
            panic!("add failed");
        };
        run(
            &mut f,
            1,
            PlayerCommand::SwapPlayer {
                remove_name: "Old".to_string(),
                add_name: "Newcomer".to_string(),
            },
        )
        .await;
        let Ok(true) = f.service.remove_member(f.id, "Old").await else {
            panic!("remove failed");
        };
        f.sessions.drain_updates(cid(1));

        run(&mut f, 3, PlayerCommand::InviteResponse { accepted: true }).await;
        assert!(notices(&f.sessions, cid(1)).contains(&Notice::InviteError {
            name: "Newcomer".to_string()
        }));
        let Some(expedition) = f.service.expedition(f.id) else {
            panic!("expected expedition");
        };
        assert!(!expedition.has_member(cid(3)));
    }

    #[tokio::test]
    async fn joiner_gets_fresh_replay_and_staged_event_lockouts() {
        let mut f = fixture(6, false).await;
        let Ok(()) = f.service.add_lockout(f.id, REPLAY_TIMER_NAME, 3600).await else {
            panic!("replay lockout failed");
        };
        let Ok(()) = f.service.add_lockout(f.id, "Dracoliche", 7200).await else {
            panic!("event lockout failed");
        };
        f.sessions
            .connect(ClientHandle::new(cid(2), "Guest", 202, 0), Vec::new());
        run(&mut f, 1, PlayerCommand::AddPlayer { name: "Guest".to_string() }).await;
        let invite = notices(&f.sessions, cid(2));
        assert!(invite.iter().any(|n| matches!(n, Notice::LockoutWarning { event, .. } if event == "Dracoliche")));

        run(&mut f, 2, PlayerCommand::InviteResponse { accepted: true }).await;
        let held = f.sessions.lockouts(cid(2), "Plane of Fear");
        assert_eq!(held.len(), 1);
        let Some(replay) = held.first() else {
            panic!("expected replay lockout");
        };
        assert!(replay.is_replay_timer());
        assert!(replay.expire_at() > Utc::now() + Duration::seconds(3500));

        let stored = f.store.character_lockouts(cid(2)).await;
        assert!(stored.iter().any(|(l, pending)| l.event_name() == "Dracoliche" && *pending));
    }

    #[tokio::test]
    async fn player_list_joins_names() {
        let mut f = fixture(6, false).await;
        let Ok(true) = f.service.add_member(f.id, cid(2), "Guest").await else {
            panic!("add failed");
        };
        f.sessions.drain_updates(cid(1));
        run(&mut f, 1, PlayerCommand::PlayerList).await;
        assert_eq!(
            notices(&f.sessions, cid(1)),
            vec![
                Notice::Leader {
                    name: "Leader".to_string()
                },
                Notice::Members {
                    names: "Leader, Guest".to_string()
                }
            ]
        );
    }

    #[tokio::test]
    async fn declined_invite_tells_leader() {
        let mut f = fixture(6, false).await;
        f.sessions
            .connect(ClientHandle::new(cid(2), "Guest", 202, 0), Vec::new());
        run(&mut f, 1, PlayerCommand::AddPlayer { name: "Guest".to_string() }).await;
        f.sessions.drain_updates(cid(1));
        run(&mut f, 2, PlayerCommand::InviteResponse { accepted: false }).await;
        assert_eq!(
            notices(&f.sessions, cid(1)),
            vec![Notice::InviteDeclined {
                name: "Guest".to_string()
            }]
        );
    }
}
