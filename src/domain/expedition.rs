//! The expedition aggregate.
//!
//! [`ExpeditionGroup`] holds one expedition's state as cached by a zone
//! process and owns the rules that do not need the outside world: the
//! add-conflict checks, the leader fallback, and which lockouts a new
//! member inherits. Storage writes, player notifications, and relay
//! broadcasts wrap these methods in
//! [`crate::service::ExpeditionService`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instanced_zone::InstancedZoneRef;
use super::lockout::{LockoutTimer, REPLAY_TIMER_NAME, TimeRemaining};
use super::member::{Member, MemberStatus};
use super::notice::{ExpeditionInfo, MemberEntry, Notice};
use super::{CharacterId, ExpeditionId};

/// Character id and name of the expedition leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Leader character id.
    pub id: CharacterId,
    /// Leader display name.
    pub name: String,
}

impl Leader {
    /// Creates a leader reference.
    #[must_use]
    pub fn new(id: CharacterId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The state of a would-be member that the add-conflict rules look at.
///
/// Built from the invitee's session when the check runs.
#[derive(Debug, Clone)]
pub struct AddCandidate<'a> {
    /// Character id.
    pub id: CharacterId,
    /// Display name.
    pub name: &'a str,
    /// Instance the character is standing in, `0` if none.
    pub instance_id: u32,
    /// Expedition the character already belongs to.
    pub expedition_id: Option<ExpeditionId>,
    /// Expedition the character has an unanswered invite from.
    pub pending_invite: Option<ExpeditionId>,
    /// The character's lockouts for this expedition's name.
    pub lockouts: &'a [LockoutTimer],
}

/// One reason a character cannot be invited or added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddConflict {
    /// Standing inside an instance.
    InInstance,
    /// Already in this expedition.
    AlreadyPart,
    /// Already in another expedition.
    AlreadyAssigned,
    /// Holds this expedition's replay timer without being a past member.
    ReplayTimer(TimeRemaining),
    /// Holds an event lockout this expedition does not have.
    EventTimer {
        /// Event name.
        event: String,
        /// Time left.
        remaining: TimeRemaining,
    },
    /// The expedition is full.
    ExceedMax(u32),
    /// Has an invite pending from this expedition.
    InvitePending,
    /// Has an invite pending from another expedition.
    InvitePendingOther,
}

impl AddConflict {
    /// Message explaining the conflict to the leader.
    #[must_use]
    pub fn notice(&self, name: &str) -> Notice {
        let name = name.to_string();
        match self {
            Self::InInstance => Notice::LeaveZoneFirst { name },
            Self::AlreadyPart => Notice::AlreadyPart { name },
            Self::AlreadyAssigned => Notice::AlreadyAssigned { name },
            Self::ReplayTimer(remaining) => Notice::ReplayTimer {
                name,
                remaining: *remaining,
            },
            Self::EventTimer { event, remaining } => Notice::EventTimer {
                name,
                event: event.clone(),
                remaining: *remaining,
            },
            Self::ExceedMax(max_players) => Notice::ExceedMax {
                max_players: *max_players,
            },
            Self::InvitePending => Notice::InvitePending { name },
            Self::InvitePendingOther => Notice::InvitePendingOther { name },
        }
    }
}

/// Lockouts a newly joined member receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinLockouts {
    /// Event lockouts staged until the member enters the instance.
    pub pending: Vec<LockoutTimer>,
    /// Freshly reset replay timer granted immediately.
    pub replay: Option<LockoutTimer>,
}

/// One expedition as cached by a zone process.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpeditionGroup {
    id: ExpeditionId,
    uuid: String,
    name: String,
    leader: Leader,
    min_players: u32,
    max_players: u32,
    members: Vec<Member>,
    member_history: BTreeSet<CharacterId>,
    lockouts: BTreeMap<String, LockoutTimer>,
    locked: bool,
    replay_on_join: bool,
    instanced_zone: InstancedZoneRef,
}

impl ExpeditionGroup {
    /// Creates an expedition with no members or lockouts, unlocked and
    /// granting replay timers on join.
    #[must_use]
    pub fn new(
        id: ExpeditionId,
        uuid: impl Into<String>,
        name: impl Into<String>,
        leader: Leader,
        min_players: u32,
        max_players: u32,
        instanced_zone: InstancedZoneRef,
    ) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            name: name.into(),
            leader,
            min_players,
            max_players,
            members: Vec::new(),
            member_history: BTreeSet::new(),
            lockouts: BTreeMap::new(),
            locked: false,
            replay_on_join: true,
            instanced_zone,
        }
    }

    /// Storage id.
    #[must_use]
    pub const fn id(&self) -> ExpeditionId {
        self.id
    }

    /// Incarnation uuid embedded in every lockout this expedition grants.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Expedition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current leader.
    #[must_use]
    pub const fn leader(&self) -> &Leader {
        &self.leader
    }

    /// Minimum members required at creation.
    #[must_use]
    pub const fn min_players(&self) -> u32 {
        self.min_players
    }

    /// Maximum members.
    #[must_use]
    pub const fn max_players(&self) -> u32 {
        self.max_players
    }

    /// Current members in storage order.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Number of current members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Every character ever added to this incarnation.
    #[must_use]
    pub const fn member_history(&self) -> &BTreeSet<CharacterId> {
        &self.member_history
    }

    /// Returns `true` if the character was ever a member.
    #[must_use]
    pub fn was_member(&self, id: CharacterId) -> bool {
        self.member_history.contains(&id)
    }

    /// Lockouts keyed by event name.
    #[must_use]
    pub const fn lockouts(&self) -> &BTreeMap<String, LockoutTimer> {
        &self.lockouts
    }

    /// Returns `true` if the expedition has a lockout for the event.
    #[must_use]
    pub fn has_lockout(&self, event_name: &str) -> bool {
        self.lockouts.contains_key(event_name)
    }

    /// The expedition's replay timer, if it has one.
    #[must_use]
    pub fn replay_lockout(&self) -> Option<&LockoutTimer> {
        self.lockouts.get(REPLAY_TIMER_NAME)
    }

    /// Returns `true` while new invitations are blocked.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns `true` if joiners immediately receive a fresh replay timer.
    #[must_use]
    pub const fn replay_on_join(&self) -> bool {
        self.replay_on_join
    }

    /// The expedition's instance.
    #[must_use]
    pub const fn instanced_zone(&self) -> &InstancedZoneRef {
        &self.instanced_zone
    }

    /// Mutable access to the expedition's instance.
    pub fn instanced_zone_mut(&mut self) -> &mut InstancedZoneRef {
        &mut self.instanced_zone
    }

    /// Replaces the instance reference, used when bulk loading.
    pub fn set_instanced_zone(&mut self, instanced_zone: InstancedZoneRef) {
        self.instanced_zone = instanced_zone;
    }

    /// Returns `true` if the character is a current member.
    #[must_use]
    pub fn has_member(&self, id: CharacterId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    /// Returns `true` if a current member has this name (case-insensitive).
    #[must_use]
    pub fn has_member_named(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.has_name(name))
    }

    /// Current member by id.
    #[must_use]
    pub fn member(&self, id: CharacterId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Current member by name (case-insensitive).
    #[must_use]
    pub fn member_named(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.has_name(name))
    }

    /// Records a member without side effects.
    ///
    /// The character always enters the history. It joins the member list
    /// only when `is_current` is set and it is not already listed.
    /// Returns `true` if the member list grew.
    pub fn add_internal_member(
        &mut self,
        id: CharacterId,
        name: &str,
        status: MemberStatus,
        is_current: bool,
    ) -> bool {
        self.member_history.insert(id);
        if !is_current || self.has_member(id) {
            return false;
        }
        self.members.push(Member::new(id, name, status));
        true
    }

    /// Drops a member from the list without side effects. History is kept.
    pub fn remove_internal_member(&mut self, id: CharacterId) -> Option<Member> {
        let index = self.members.iter().position(|m| m.id == id)?;
        Some(self.members.remove(index))
    }

    /// Empties the member list, returning the removed members.
    pub fn clear_members(&mut self) -> Vec<Member> {
        std::mem::take(&mut self.members)
    }

    /// Updates a member's status. Returns `false` if not a member.
    pub fn set_member_status(&mut self, id: CharacterId, status: MemberStatus) -> bool {
        match self.members.iter_mut().find(|m| m.id == id) {
            Some(member) => {
                member.status = status;
                true
            }
            None => false,
        }
    }

    /// Replaces the leader.
    pub fn set_leader(&mut self, leader: Leader) {
        self.leader = leader;
    }

    /// First member in storage order who is not the current leader.
    ///
    /// `None` when nobody else is left, in which case leadership stays as
    /// it is until a later membership change or deletion.
    #[must_use]
    pub fn fallback_leader(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.id != self.leader.id)
    }

    /// Inserts or overwrites the lockout for its event.
    pub fn apply_lockout(&mut self, lockout: LockoutTimer) {
        self.lockouts
            .insert(lockout.event_name().to_string(), lockout);
    }

    /// Replaces every lockout, used when bulk loading.
    pub fn set_lockouts(&mut self, lockouts: impl IntoIterator<Item = LockoutTimer>) {
        self.lockouts = lockouts
            .into_iter()
            .map(|l| (l.event_name().to_string(), l))
            .collect();
    }

    /// Removes the lockout for an event.
    pub fn remove_lockout(&mut self, event_name: &str) -> Option<LockoutTimer> {
        self.lockouts.remove(event_name)
    }

    /// Sets the lock flag.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Sets the replay-on-join flag.
    pub fn set_replay_on_join(&mut self, replay_on_join: bool) {
        self.replay_on_join = replay_on_join;
    }

    /// Runs every add-conflict rule and returns all that fail.
    ///
    /// The rules are independent; each failing one is reported. The
    /// capacity rule is skipped for swaps, which replace one member with
    /// another.
    #[must_use]
    pub fn add_conflicts(
        &self,
        candidate: &AddCandidate<'_>,
        swapping: bool,
        now: DateTime<Utc>,
    ) -> Vec<AddConflict> {
        let mut conflicts = Vec::new();

        if candidate.instance_id != 0 {
            conflicts.push(AddConflict::InInstance);
        }

        match candidate.expedition_id {
            Some(id) if id == self.id => conflicts.push(AddConflict::AlreadyPart),
            Some(_) => conflicts.push(AddConflict::AlreadyAssigned),
            None => {}
        }

        let own_lockouts = candidate
            .lockouts
            .iter()
            .filter(|l| l.expedition_name() == self.name && !l.is_expired(now));

        for lockout in own_lockouts {
            if lockout.is_replay_timer() {
                // past members of this incarnation may always come back
                if !self.was_member(candidate.id) {
                    conflicts.push(AddConflict::ReplayTimer(lockout.time_remaining(now)));
                }
            } else if !self.has_lockout(lockout.event_name()) {
                conflicts.push(AddConflict::EventTimer {
                    event: lockout.event_name().to_string(),
                    remaining: lockout.time_remaining(now),
                });
            }
        }

        let at_capacity = u32::try_from(self.members.len()).unwrap_or(u32::MAX) >= self.max_players;
        if !swapping && at_capacity {
            conflicts.push(AddConflict::ExceedMax(self.max_players));
        }

        match candidate.pending_invite {
            Some(id) if id == self.id => conflicts.push(AddConflict::InvitePending),
            Some(_) => conflicts.push(AddConflict::InvitePendingOther),
            None => {}
        }

        conflicts
    }

    /// Lockouts of this incarnation an invitee lacks and would be given
    /// on entering the instance, replay timer excluded.
    #[must_use]
    pub fn invite_warnings(
        &self,
        candidate_lockouts: &[LockoutTimer],
        now: DateTime<Utc>,
    ) -> Vec<(String, TimeRemaining)> {
        self.lockouts
            .values()
            .filter(|l| {
                !l.is_replay_timer()
                    && !l.is_expired(now)
                    && l.is_from_expedition(&self.uuid)
                    && !holds_event(candidate_lockouts, &self.name, l.event_name())
            })
            .map(|l| (l.event_name().to_string(), l.time_remaining(now)))
            .collect()
    }

    /// Splits this incarnation's lockouts that a joining character lacks
    /// into the staged event lockouts and the immediate replay timer.
    ///
    /// The replay timer is re-armed from `now` rather than copied, and is
    /// only granted while replay-on-join is enabled.
    #[must_use]
    pub fn lockouts_for_new_member(
        &self,
        candidate_lockouts: &[LockoutTimer],
        now: DateTime<Utc>,
    ) -> JoinLockouts {
        let mut join = JoinLockouts::default();
        let missing = self.lockouts.values().filter(|l| {
            l.is_from_expedition(&self.uuid)
                && !holds_event(candidate_lockouts, &self.name, l.event_name())
        });

        for lockout in missing {
            if lockout.is_replay_timer() {
                if self.replay_on_join {
                    join.replay = Some(lockout.reset_from(now));
                }
            } else if !lockout.is_expired(now) {
                join.pending.push(lockout.clone());
            }
        }
        join
    }

    /// Window header for members.
    #[must_use]
    pub fn info(&self) -> ExpeditionInfo {
        ExpeditionInfo {
            expedition_name: self.name.clone(),
            leader_name: self.leader.name.clone(),
            max_players: self.max_players,
        }
    }

    /// Window member list.
    #[must_use]
    pub fn member_entries(&self) -> Vec<MemberEntry> {
        self.members
            .iter()
            .map(|m| MemberEntry {
                name: m.name.clone(),
                status: m.status,
            })
            .collect()
    }
}

fn holds_event(lockouts: &[LockoutTimer], expedition_name: &str, event_name: &str) -> bool {
    lockouts
        .iter()
        .any(|l| l.expedition_name() == expedition_name && l.event_name() == event_name)
}
