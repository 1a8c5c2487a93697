//! Type-safe identifiers for expeditions, characters, and zone processes.
//!
//! [`ExpeditionId`] and [`CharacterId`] are newtypes over the numeric ids
//! assigned by storage, so the two cannot be swapped by accident.
//! [`ProcessIdentity`] names one zone process and is what the relay
//! compares to recognise its own echoes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable numeric identity of an expedition, assigned by storage on insert.
///
/// Zero is never a valid id; it is used on the wire and in storage rows
/// to mean "no expedition".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpeditionId(u32);

impl ExpeditionId {
    /// Wraps a raw storage id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw storage id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` for the reserved zero id.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExpeditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ExpeditionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Character id of a player, unique across the whole world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(u32);

impl CharacterId {
    /// Wraps a raw character id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw character id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CharacterId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identity of one zone process: the zone it is running and, when that
/// zone is an instance, the instance id.
///
/// Passed explicitly to everything that needs to answer "is this message
/// mine?" or "is this process the expedition's instance?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// Zone id the process is serving.
    pub zone_id: u32,
    /// Instance id, `0` for a non-instanced zone.
    pub instance_id: u32,
}

impl ProcessIdentity {
    /// Creates an identity from a zone and instance id.
    #[must_use]
    pub const fn new(zone_id: u32, instance_id: u32) -> Self {
        Self {
            zone_id,
            instance_id,
        }
    }

    /// Returns `true` if this process is serving the given instance.
    #[must_use]
    pub const fn is_instance(&self, instance_id: u32) -> bool {
        instance_id != 0 && self.instance_id == instance_id
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.zone_id, self.instance_id)
    }
}
