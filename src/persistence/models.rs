//! Database models for expeditions and their members.

use serde::{Deserialize, Serialize};

use crate::domain::{CharacterId, ExpeditionId, Leader};

/// A new expedition row for the `expeditions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpedition {
    /// Incarnation uuid.
    pub uuid: String,
    /// Instance id reserved for the expedition.
    pub instance_id: u32,
    /// Zone the instance is a copy of.
    pub zone_id: u32,
    /// Expedition name.
    pub name: String,
    /// Initial leader.
    pub leader: Leader,
    /// Minimum members.
    pub min_players: u32,
    /// Maximum members.
    pub max_players: u32,
}

/// One row of the expedition load query.
///
/// The query joins `expeditions` with `expedition_members`, so the
/// expedition columns repeat for every member row. Rows are ordered by
/// expedition id, then by the order members joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpeditionMemberRow {
    /// Expedition id.
    pub expedition_id: ExpeditionId,
    /// Incarnation uuid.
    pub uuid: String,
    /// Instance id, `0` if the instance row is gone.
    pub instance_id: u32,
    /// Zone the instance is a copy of.
    pub zone_id: u32,
    /// Expedition name.
    pub expedition_name: String,
    /// Leader character id.
    pub leader_id: CharacterId,
    /// Leader name.
    pub leader_name: String,
    /// Minimum members.
    pub min_players: u32,
    /// Maximum members.
    pub max_players: u32,
    /// Whether joiners get a fresh replay timer.
    pub add_replay_on_join: bool,
    /// Whether invitations are blocked.
    pub is_locked: bool,
    /// Member character id.
    pub character_id: CharacterId,
    /// Member name.
    pub character_name: String,
    /// `false` for members who were removed.
    pub is_current_member: bool,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_expedition_survives_bincode() {
        let row = NewExpedition {
            uuid: "uuid-a".to_string(),
            instance_id: 1050,
            zone_id: 293,
            name: "Deepest Guk".to_string(),
            leader: Leader::new(CharacterId::new(7), "Alpha"),
            min_players: 1,
            max_players: 6,
        };
        let Ok(bytes) = bincode::serialize(&row) else {
            panic!("serialize failed");
        };
        let Ok(back) = bincode::deserialize::<NewExpedition>(&bytes) else {
            panic!("deserialize failed");
        };
        assert_eq!(back.leader, row.leader);
    }
}
