//! In-memory implementation of [`ExpeditionStore`].
//!
//! Mirrors the PostgreSQL tables closely enough that affected-row counts
//! match: upserts report one row per input, updates report matched rows,
//! and staged lockout inserts skip rows that already exist.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::ExpeditionStore;
use super::models::{ExpeditionMemberRow, NewExpedition};
use crate::domain::{CharacterId, ExpeditionId, Leader, LockoutTimer, Member};
use crate::error::ExpeditionError;

#[derive(Debug, Clone)]
struct ExpeditionRecord {
    uuid: String,
    instance_id: u32,
    zone_id: u32,
    name: String,
    leader: Leader,
    min_players: u32,
    max_players: u32,
    add_replay_on_join: bool,
    is_locked: bool,
}

#[derive(Debug, Clone)]
struct MemberRecord {
    name: String,
    is_current: bool,
    joined_seq: u64,
}

#[derive(Debug, Clone)]
struct CharacterLockoutRecord {
    lockout: LockoutTimer,
    is_pending: bool,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u32,
    next_join_seq: u64,
    expeditions: BTreeMap<ExpeditionId, ExpeditionRecord>,
    members: BTreeMap<(ExpeditionId, CharacterId), MemberRecord>,
    lockouts: BTreeMap<(ExpeditionId, String), LockoutTimer>,
    character_lockouts: BTreeMap<(CharacterId, String, String), CharacterLockoutRecord>,
}

impl Tables {
    fn rows_for(&self, id: ExpeditionId) -> Vec<ExpeditionMemberRow> {
        let Some(expedition) = self.expeditions.get(&id) else {
            return Vec::new();
        };
        let mut members: Vec<_> = self
            .members
            .range((id, CharacterId::new(0))..=(id, CharacterId::new(u32::MAX)))
            .collect();
        members.sort_by_key(|(_, member)| member.joined_seq);
        members
            .into_iter()
            .map(|((_, character_id), member)| ExpeditionMemberRow {
                expedition_id: id,
                uuid: expedition.uuid.clone(),
                instance_id: expedition.instance_id,
                zone_id: expedition.zone_id,
                expedition_name: expedition.name.clone(),
                leader_id: expedition.leader.id,
                leader_name: expedition.leader.name.clone(),
                min_players: expedition.min_players,
                max_players: expedition.max_players,
                add_replay_on_join: expedition.add_replay_on_join,
                is_locked: expedition.is_locked,
                character_id: *character_id,
                character_name: member.name.clone(),
                is_current_member: member.is_current,
            })
            .collect()
    }

    fn upsert_character_lockout(&mut self, character_id: CharacterId, lockout: &LockoutTimer, pending: bool) -> u64 {
        let key = (
            character_id,
            lockout.expedition_name().to_string(),
            lockout.event_name().to_string(),
        );
        if pending && self.character_lockouts.contains_key(&key) {
            return 0;
        }
        self.character_lockouts.insert(
            key,
            CharacterLockoutRecord {
                lockout: lockout.clone(),
                is_pending: pending,
            },
        );
        1
    }
}

/// [`ExpeditionStore`] over `tokio::sync::Mutex`-guarded maps.
#[derive(Debug, Default)]
pub struct InMemoryExpeditionStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl InMemoryExpeditionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a storage error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// A character's stored lockouts with their pending flag.
    pub async fn character_lockouts(&self, character_id: CharacterId) -> Vec<(LockoutTimer, bool)> {
        let tables = self.tables.lock().await;
        tables
            .character_lockouts
            .iter()
            .filter(|((id, _, _), _)| *id == character_id)
            .map(|(_, r)| (r.lockout.clone(), r.is_pending))
            .collect()
    }

    fn check_write(&self) -> Result<(), ExpeditionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ExpeditionError::Storage("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExpeditionStore for InMemoryExpeditionStore {
    async fn insert_expedition(&self, expedition: &NewExpedition) -> Result<ExpeditionId, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        tables.next_id = tables.next_id.saturating_add(1);
        let id = ExpeditionId::new(tables.next_id);
        tables.expeditions.insert(
            id,
            ExpeditionRecord {
                uuid: expedition.uuid.clone(),
                instance_id: expedition.instance_id,
                zone_id: expedition.zone_id,
                name: expedition.name.clone(),
                leader: expedition.leader.clone(),
                min_players: expedition.min_players,
                max_players: expedition.max_players,
                add_replay_on_join: true,
                is_locked: false,
            },
        );
        Ok(id)
    }

    async fn insert_members(&self, id: ExpeditionId, members: &[Member]) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        for member in members {
            let key = (id, member.id);
            let kept = tables
                .members
                .get(&key)
                .filter(|m| m.is_current)
                .map(|m| m.joined_seq);
            let joined_seq = match kept {
                Some(seq) => seq,
                None => {
                    tables.next_join_seq += 1;
                    tables.next_join_seq
                }
            };
            tables.members.insert(
                key,
                MemberRecord {
                    name: member.name.clone(),
                    is_current: true,
                    joined_seq,
                },
            );
        }
        Ok(members.len() as u64)
    }

    async fn insert_member(&self, id: ExpeditionId, member: &Member) -> Result<u64, ExpeditionError> {
        self.insert_members(id, std::slice::from_ref(member)).await
    }

    async fn update_member_removed(
        &self,
        id: ExpeditionId,
        character_id: CharacterId,
    ) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        Ok(tables
            .members
            .get_mut(&(id, character_id))
            .map_or(0, |m| {
                m.is_current = false;
                1
            }))
    }

    async fn update_all_members_removed(&self, id: ExpeditionId) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        let mut affected = 0;
        for ((expedition_id, _), member) in &mut tables.members {
            if *expedition_id == id {
                member.is_current = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn insert_lockout(&self, id: ExpeditionId, lockout: &LockoutTimer) -> Result<u64, ExpeditionError> {
        self.insert_lockouts(id, std::slice::from_ref(lockout)).await
    }

    async fn insert_lockouts(&self, id: ExpeditionId, lockouts: &[LockoutTimer]) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        for lockout in lockouts {
            tables
                .lockouts
                .insert((id, lockout.event_name().to_string()), lockout.clone());
        }
        Ok(lockouts.len() as u64)
    }

    async fn delete_lockout(&self, id: ExpeditionId, event_name: &str) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        Ok(u64::from(tables.lockouts.remove(&(id, event_name.to_string())).is_some()))
    }

    async fn update_lock_state(&self, id: ExpeditionId, locked: bool) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        Ok(tables.expeditions.get_mut(&id).map_or(0, |e| {
            e.is_locked = locked;
            1
        }))
    }

    async fn update_leader(&self, id: ExpeditionId, leader: &Leader) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        Ok(tables.expeditions.get_mut(&id).map_or(0, |e| {
            e.leader = leader.clone();
            1
        }))
    }

    async fn update_replay_on_join(&self, id: ExpeditionId, enabled: bool) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        Ok(tables.expeditions.get_mut(&id).map_or(0, |e| {
            e.add_replay_on_join = enabled;
            1
        }))
    }

    async fn load_expedition(&self, id: ExpeditionId) -> Result<Vec<ExpeditionMemberRow>, ExpeditionError> {
        let tables = self.tables.lock().await;
        Ok(tables.rows_for(id))
    }

    async fn load_all_expeditions(&self) -> Result<Vec<ExpeditionMemberRow>, ExpeditionError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .expeditions
            .keys()
            .flat_map(|id| tables.rows_for(*id))
            .collect())
    }

    async fn get_leader(&self, id: ExpeditionId) -> Result<Option<Leader>, ExpeditionError> {
        let tables = self.tables.lock().await;
        Ok(tables.expeditions.get(&id).map(|e| e.leader.clone()))
    }

    async fn load_lockouts(
        &self,
        ids: &[ExpeditionId],
    ) -> Result<HashMap<ExpeditionId, Vec<LockoutTimer>>, ExpeditionError> {
        let tables = self.tables.lock().await;
        let mut lockouts: HashMap<ExpeditionId, Vec<LockoutTimer>> = HashMap::new();
        for ((id, _), lockout) in &tables.lockouts {
            if ids.contains(id) {
                lockouts.entry(*id).or_default().push(lockout.clone());
            }
        }
        Ok(lockouts)
    }

    async fn get_expedition_id_from_instance_id(
        &self,
        instance_id: u32,
    ) -> Result<Option<ExpeditionId>, ExpeditionError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .expeditions
            .iter()
            .find(|(_, e)| e.instance_id == instance_id)
            .map(|(id, _)| *id))
    }

    async fn delete_pending_character_lockouts(&self, character_id: CharacterId) -> Result<u64, ExpeditionError> {
        self.delete_all_members_pending_lockouts(std::slice::from_ref(&character_id))
            .await
    }

    async fn delete_all_members_pending_lockouts(
        &self,
        character_ids: &[CharacterId],
    ) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        let before = tables.character_lockouts.len();
        tables
            .character_lockouts
            .retain(|(id, _, _), r| !(r.is_pending && character_ids.contains(id)));
        Ok((before - tables.character_lockouts.len()) as u64)
    }

    async fn insert_character_lockouts(
        &self,
        character_id: CharacterId,
        lockouts: &[LockoutTimer],
        pending: bool,
    ) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        Ok(lockouts
            .iter()
            .map(|l| tables.upsert_character_lockout(character_id, l, pending))
            .sum())
    }

    async fn insert_members_lockout(
        &self,
        character_ids: &[CharacterId],
        lockout: &LockoutTimer,
    ) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        Ok(character_ids
            .iter()
            .map(|id| tables.upsert_character_lockout(*id, lockout, false))
            .sum())
    }

    async fn delete_members_lockout(
        &self,
        character_ids: &[CharacterId],
        expedition_name: &str,
        event_name: &str,
    ) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        let before = tables.character_lockouts.len();
        tables.character_lockouts.retain(|(id, name, event), r| {
            r.is_pending
                || !character_ids.contains(id)
                || name != expedition_name
                || event != event_name
        });
        Ok((before - tables.character_lockouts.len()) as u64)
    }

    async fn delete_character_lockouts(
        &self,
        character_id: CharacterId,
        expedition_name: &str,
    ) -> Result<u64, ExpeditionError> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        let before = tables.character_lockouts.len();
        tables
            .character_lockouts
            .retain(|(id, name, _), _| *id != character_id || name != expedition_name);
        Ok((before - tables.character_lockouts.len()) as u64)
    }
}
