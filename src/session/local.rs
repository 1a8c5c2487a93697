//! In-process session table.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{ClientHandle, PendingInvite, SessionDirectory};
use crate::domain::{CharacterId, ClientUpdate, ExpeditionId, LockoutTimer};

#[derive(Debug)]
struct Session {
    handle: ClientHandle,
    lockouts: Vec<LockoutTimer>,
    outbox: Vec<ClientUpdate>,
}

/// [`SessionDirectory`] backed by a map of connected players.
///
/// Updates sent to a player are queued until the transport drains them
/// with [`LocalSessions::drain_updates`].
#[derive(Debug, Default)]
pub struct LocalSessions {
    sessions: RwLock<BTreeMap<CharacterId, Session>>,
}

impl LocalSessions {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connected player with the lockouts loaded for them.
    pub fn connect(&self, handle: ClientHandle, lockouts: Vec<LockoutTimer>) {
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(
            handle.character_id,
            Session {
                handle,
                lockouts,
                outbox: Vec::new(),
            },
        );
    }

    /// Removes a player, returning their last state.
    pub fn disconnect(&self, id: CharacterId) -> Option<ClientHandle> {
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(&id).map(|s| s.handle)
    }

    /// Takes every update queued for a player.
    pub fn drain_updates(&self, id: CharacterId) -> Vec<ClientUpdate> {
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        map.get_mut(&id)
            .map(|s| std::mem::take(&mut s.outbox))
            .unwrap_or_default()
    }

    /// Every lockout the player holds.
    #[must_use]
    pub fn all_lockouts(&self, id: CharacterId) -> Vec<LockoutTimer> {
        let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&id).map(|s| s.lockouts.clone()).unwrap_or_default()
    }

    fn with_session<F>(&self, id: CharacterId, f: F)
    where
        F: FnOnce(&mut Session),
    {
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = map.get_mut(&id) {
            f(session);
        }
    }
}

impl SessionDirectory for LocalSessions {
    fn find_by_id(&self, id: CharacterId) -> Option<ClientHandle> {
        let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&id).map(|s| s.handle.clone())
    }

    fn find_by_name(&self, name: &str) -> Option<ClientHandle> {
        if name.is_empty() {
            return None;
        }
        let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .find(|s| s.handle.name.eq_ignore_ascii_case(name))
            .map(|s| s.handle.clone())
    }

    fn connected(&self) -> Vec<ClientHandle> {
        let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        map.values().map(|s| s.handle.clone()).collect()
    }

    fn send(&self, id: CharacterId, update: ClientUpdate) {
        tracing::trace!(character_id = %id, ?update, "client update");
        self.with_session(id, |s| s.outbox.push(update));
    }

    fn lockouts(&self, id: CharacterId, expedition_name: &str) -> Vec<LockoutTimer> {
        let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&id)
            .map(|s| {
                s.lockouts
                    .iter()
                    .filter(|l| l.expedition_name() == expedition_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn add_lockout(&self, id: CharacterId, lockout: LockoutTimer) {
        self.with_session(id, |s| {
            s.lockouts.retain(|l| {
                l.expedition_name() != lockout.expedition_name()
                    || l.event_name() != lockout.event_name()
            });
            s.lockouts.push(lockout);
        });
    }

    fn remove_lockout(&self, id: CharacterId, expedition_name: &str, event_name: &str) {
        self.with_session(id, |s| {
            s.lockouts.retain(|l| {
                l.expedition_name() != expedition_name || l.event_name() != event_name
            });
        });
    }

    fn remove_all_lockouts(&self, id: CharacterId, expedition_name: &str) {
        self.with_session(id, |s| {
            s.lockouts.retain(|l| l.expedition_name() != expedition_name);
        });
    }

    fn set_expedition_id(&self, id: CharacterId, expedition_id: Option<ExpeditionId>) {
        self.with_session(id, |s| s.handle.expedition_id = expedition_id);
    }

    fn set_pending_invite(&self, id: CharacterId, invite: Option<PendingInvite>) {
        self.with_session(id, |s| s.handle.pending_invite = invite);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::Notice;

    fn sessions_with(id: u32, name: &str) -> LocalSessions {
        let sessions = LocalSessions::new();
        sessions.connect(ClientHandle::new(CharacterId::new(id), name, 202, 0), Vec::new());
        sessions
    }

    #[test]
    fn find_by_name_ignores_case() {
        let sessions = sessions_with(1, "Tunare");
        let Some(handle) = sessions.find_by_name("tunare") else {
            panic!("expected session");
        };
        assert_eq!(handle.character_id, CharacterId::new(1));
        assert!(sessions.find_by_name("").is_none());
    }

    #[test]
    fn send_queues_until_drained() {
        let sessions = sessions_with(1, "Tunare");
        sessions.send(CharacterId::new(1), Notice::MakeLeaderYou.into());
        sessions.send(CharacterId::new(2), Notice::MakeLeaderYou.into());
        assert_eq!(sessions.drain_updates(CharacterId::new(1)).len(), 1);
        assert!(sessions.drain_updates(CharacterId::new(1)).is_empty());
    }

    #[test]
    fn add_lockout_replaces_same_event() {
        let sessions = sessions_with(1, "Tunare");
        let id = CharacterId::new(1);
        let now = Utc::now();
        sessions.add_lockout(id, LockoutTimer::starting_at("u", "Exp", "Ritual", 60, now));
        sessions.add_lockout(id, LockoutTimer::starting_at("u", "Exp", "Ritual", 120, now));
        sessions.add_lockout(id, LockoutTimer::starting_at("u", "Other", "Ritual", 60, now));
        assert_eq!(sessions.lockouts(id, "Exp").len(), 1);
        assert_eq!(sessions.all_lockouts(id).len(), 2);

        sessions.remove_all_lockouts(id, "Exp");
        assert!(sessions.lockouts(id, "Exp").is_empty());
        sessions.remove_lockout(id, "Other", "Ritual");
        assert!(sessions.all_lockouts(id).is_empty());
    }

    #[test]
    fn expedition_and_invite_are_tracked() {
        let sessions = sessions_with(1, "Tunare");
        let id = CharacterId::new(1);
        sessions.set_expedition_id(id, Some(ExpeditionId::new(4)));
        sessions.set_pending_invite(
            id,
            Some(PendingInvite {
                expedition_id: ExpeditionId::new(5),
                inviter_name: "Leader".to_string(),
                swap_remove_name: None,
            }),
        );
        let Some(handle) = sessions.find_by_id(id) else {
            panic!("expected session");
        };
        assert_eq!(handle.expedition_id, Some(ExpeditionId::new(4)));
        assert_eq!(handle.pending_invite_id(), Some(ExpeditionId::new(5)));
        assert!(sessions.disconnect(id).is_some());
        assert!(sessions.find_by_id(id).is_none());
    }
}
