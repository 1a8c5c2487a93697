//! Expedition member value type.

use serde::{Deserialize, Serialize};

use super::CharacterId;

/// Where a member currently is, as shown in the expedition window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Not connected to any zone process.
    #[default]
    Offline,
    /// Connected somewhere outside the expedition's instance.
    Online,
    /// Connected and inside the expedition's instance.
    InDynamicZone,
}

/// One character in an expedition's member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Character id.
    pub id: CharacterId,
    /// Display name.
    pub name: String,
    /// Last known status.
    pub status: MemberStatus,
}

impl Member {
    /// Creates a member with the given status.
    #[must_use]
    pub fn new(id: CharacterId, name: impl Into<String>, status: MemberStatus) -> Self {
        Self {
            id,
            name: name.into(),
            status,
        }
    }

    /// Case-insensitive name comparison, the way player-typed names are
    /// matched everywhere in this crate.
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}
