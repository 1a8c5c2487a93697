//! Per-process expedition registry.
//!
//! [`ExpeditionCache`] holds every expedition this zone process knows
//! about, keyed by id. It is owned by the zone's single event-loop task,
//! so it needs no interior locking. Copies of the same expedition in
//! other processes are kept convergent by relay messages only.

use std::collections::{BTreeMap, HashMap};

use super::expedition::{ExpeditionGroup, Leader};
use super::instanced_zone::InstancedZoneRef;
use super::lockout::LockoutTimer;
use super::member::MemberStatus;
use super::{CharacterId, ExpeditionId};
use crate::persistence::ExpeditionMemberRow;

/// All expeditions cached by one zone process.
#[derive(Debug, Default)]
pub struct ExpeditionCache {
    expeditions: BTreeMap<ExpeditionId, ExpeditionGroup>,
}

impl ExpeditionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an expedition.
    pub fn insert(&mut self, expedition: ExpeditionGroup) {
        self.expeditions.insert(expedition.id(), expedition);
    }

    /// Expedition by id.
    #[must_use]
    pub fn get(&self, id: ExpeditionId) -> Option<&ExpeditionGroup> {
        self.expeditions.get(&id)
    }

    /// Mutable expedition by id.
    pub fn get_mut(&mut self, id: ExpeditionId) -> Option<&mut ExpeditionGroup> {
        self.expeditions.get_mut(&id)
    }

    /// Evicts an expedition.
    pub fn remove(&mut self, id: ExpeditionId) -> Option<ExpeditionGroup> {
        self.expeditions.remove(&id)
    }

    /// Drops every cached expedition.
    pub fn clear(&mut self) {
        self.expeditions.clear();
    }

    /// Returns `true` if the expedition is cached.
    #[must_use]
    pub fn contains(&self, id: ExpeditionId) -> bool {
        self.expeditions.contains_key(&id)
    }

    /// Expedition the character is a current member of.
    #[must_use]
    pub fn find_by_character(&self, id: CharacterId) -> Option<&ExpeditionGroup> {
        self.expeditions.values().find(|e| e.has_member(id))
    }

    /// Expedition a character with this name is a current member of.
    #[must_use]
    pub fn find_by_character_name(&self, name: &str) -> Option<&ExpeditionGroup> {
        self.expeditions.values().find(|e| e.has_member_named(name))
    }

    /// Expedition owning the instance, among cached ones.
    ///
    /// Instances can outlive the cache, so callers that need an answer for
    /// an uncached instance ask storage first and then look up the id.
    #[must_use]
    pub fn find_by_instance_id(&self, instance_id: u32) -> Option<&ExpeditionGroup> {
        self.expeditions
            .values()
            .find(|e| e.instanced_zone().is_instance_id(instance_id))
    }

    /// Cached ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<ExpeditionId> {
        self.expeditions.keys().copied().collect()
    }

    /// Iterates cached expeditions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ExpeditionGroup> {
        self.expeditions.values()
    }

    /// Number of cached expeditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expeditions.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expeditions.is_empty()
    }

    /// Builds expeditions from joined member rows and caches them.
    ///
    /// Rows must be grouped by expedition id. A new expedition starts
    /// whenever the id changes; `on_loaded` is called once per expedition
    /// after its last row. Every member row, current or not, lands in the
    /// member history. Lockouts are attached from `lockouts` by id.
    ///
    /// Returns every `(expedition, character)` pair seen, current members
    /// only, so one batched status query can cover all of them.
    pub fn load_rows<F>(
        &mut self,
        rows: Vec<ExpeditionMemberRow>,
        lockouts: &mut HashMap<ExpeditionId, Vec<LockoutTimer>>,
        mut on_loaded: F,
    ) -> Vec<(ExpeditionId, CharacterId)>
    where
        F: FnMut(&ExpeditionGroup),
    {
        let mut members = Vec::new();
        let mut current: Option<ExpeditionGroup> = None;

        for row in rows {
            if current.as_ref().is_none_or(|e| e.id() != row.expedition_id) {
                if let Some(done) = current.take() {
                    on_loaded(&done);
                    self.insert(done);
                }
                let mut expedition = expedition_from_row(&row);
                if let Some(timers) = lockouts.remove(&row.expedition_id) {
                    expedition.set_lockouts(timers);
                }
                current = Some(expedition);
            }

            if let Some(expedition) = current.as_mut() {
                expedition.add_internal_member(
                    row.character_id,
                    &row.character_name,
                    MemberStatus::Offline,
                    row.is_current_member,
                );
                if row.is_current_member {
                    expedition.instanced_zone_mut().add_character(row.character_id);
                    members.push((row.expedition_id, row.character_id));
                }
            }
        }

        if let Some(done) = current.take() {
            on_loaded(&done);
            self.insert(done);
        }

        members
    }
}

fn expedition_from_row(row: &ExpeditionMemberRow) -> ExpeditionGroup {
    let mut expedition = ExpeditionGroup::new(
        row.expedition_id,
        row.uuid.clone(),
        row.expedition_name.clone(),
        Leader::new(row.leader_id, row.leader_name.clone()),
        row.min_players,
        row.max_players,
        InstancedZoneRef::new(row.instance_id, row.zone_id),
    );
    expedition.set_locked(row.is_locked);
    expedition.set_replay_on_join(row.add_replay_on_join);
    expedition
}
