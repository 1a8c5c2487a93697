//! Reference to the instanced zone an expedition owns.
//!
//! The instance lifecycle (creation, timers, persisted location fields)
//! belongs to another subsystem. This type only carries the values the
//! expedition logic reads and mirrors the expedition's membership onto the
//! instance.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{CharacterId, ProcessIdentity};

/// Which of the three instance locations a change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    /// Compass marker pointing at the instance entrance.
    Compass,
    /// Where players are sent when removed from the instance.
    SafeReturn,
    /// Where players appear when entering the instance.
    ZoneIn,
}

/// A point in a zone.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZoneLocation {
    /// Zone the point is in, `0` when implied by context.
    pub zone_id: u32,
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
    /// Facing.
    pub heading: f32,
}

impl ZoneLocation {
    /// Creates a location.
    #[must_use]
    pub const fn new(zone_id: u32, x: f32, y: f32, z: f32, heading: f32) -> Self {
        Self {
            zone_id,
            x,
            y,
            z,
            heading,
        }
    }
}

/// The expedition's instance as seen from a zone process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstancedZoneRef {
    instance_id: u32,
    zone_id: u32,
    compass: ZoneLocation,
    safe_return: ZoneLocation,
    zone_in: ZoneLocation,
    duration_secs: u32,
    expire_at: Option<DateTime<Utc>>,
    characters: BTreeSet<CharacterId>,
}

impl InstancedZoneRef {
    /// Creates a reference to an existing instance.
    #[must_use]
    pub fn new(instance_id: u32, zone_id: u32) -> Self {
        Self {
            instance_id,
            zone_id,
            ..Self::default()
        }
    }

    /// Instance id, `0` when no instance could be created.
    #[must_use]
    pub const fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Zone the instance is a copy of.
    #[must_use]
    pub const fn zone_id(&self) -> u32 {
        self.zone_id
    }

    /// Returns `true` if this refers to the given instance id.
    #[must_use]
    pub const fn is_instance_id(&self, instance_id: u32) -> bool {
        self.instance_id != 0 && self.instance_id == instance_id
    }

    /// Returns `true` if the process with this identity is running the
    /// instance.
    #[must_use]
    pub const fn is_current_zone(&self, identity: ProcessIdentity) -> bool {
        identity.zone_id == self.zone_id && identity.is_instance(self.instance_id)
    }

    /// Location of the given kind.
    #[must_use]
    pub const fn location(&self, kind: LocationKind) -> ZoneLocation {
        match kind {
            LocationKind::Compass => self.compass,
            LocationKind::SafeReturn => self.safe_return,
            LocationKind::ZoneIn => self.zone_in,
        }
    }

    /// Replaces the location of the given kind.
    pub fn set_location(&mut self, kind: LocationKind, location: ZoneLocation) {
        match kind {
            LocationKind::Compass => self.compass = location,
            LocationKind::SafeReturn => self.safe_return = location,
            LocationKind::ZoneIn => self.zone_in = location,
        }
    }

    /// Instance duration in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// When the instance expires, if known.
    #[must_use]
    pub const fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }

    /// Sets a new duration; the instance now expires `seconds` after `now`.
    pub fn set_duration(&mut self, seconds: u32, now: DateTime<Utc>) {
        self.duration_secs = seconds;
        self.expire_at = Some(now + Duration::seconds(i64::from(seconds)));
    }

    /// Characters currently allowed in the instance.
    #[must_use]
    pub const fn characters(&self) -> &BTreeSet<CharacterId> {
        &self.characters
    }

    /// Mirrors a member add onto the instance.
    pub fn add_character(&mut self, id: CharacterId) {
        self.characters.insert(id);
    }

    /// Mirrors a member removal onto the instance.
    pub fn remove_character(&mut self, id: CharacterId) {
        self.characters.remove(&id);
    }

    /// Mirrors removal of every member onto the instance.
    pub fn remove_all_characters(&mut self) {
        self.characters.clear();
    }
}
