//! Lockout timers: named, time-bounded restrictions on re-entering an
//! expedition's event.
//!
//! A [`LockoutTimer`] is scoped to one expedition incarnation through the
//! expedition's `uuid`. The replay timer is the lockout with the reserved
//! event name [`REPLAY_TIMER_NAME`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Event name reserved for an expedition's replay timer.
pub const REPLAY_TIMER_NAME: &str = "Replay Timer";

/// Whole days, hours, and minutes left on a lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRemaining {
    /// Full days remaining.
    pub days: u64,
    /// Hours remaining after whole days.
    pub hours: u64,
    /// Minutes remaining after whole hours.
    pub minutes: u64,
}

impl TimeRemaining {
    /// Splits a number of seconds into days, hours, and minutes.
    /// Leftover seconds are dropped.
    #[must_use]
    pub const fn from_seconds(seconds: u64) -> Self {
        Self {
            days: seconds / 86_400,
            hours: (seconds / 3_600) % 24,
            minutes: (seconds / 60) % 60,
        }
    }
}

/// Lockout for one event of one expedition.
///
/// Immutable after construction except for [`LockoutTimer::reset`], which
/// re-arms the expiry from a new starting point with the same duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutTimer {
    expedition_uuid: String,
    expedition_name: String,
    event_name: String,
    expire_at: DateTime<Utc>,
    duration_secs: u32,
}

impl LockoutTimer {
    /// Creates a lockout with an explicit expiry.
    #[must_use]
    pub fn new(
        expedition_uuid: impl Into<String>,
        expedition_name: impl Into<String>,
        event_name: impl Into<String>,
        expire_at: DateTime<Utc>,
        duration_secs: u32,
    ) -> Self {
        Self {
            expedition_uuid: expedition_uuid.into(),
            expedition_name: expedition_name.into(),
            event_name: event_name.into(),
            expire_at,
            duration_secs,
        }
    }

    /// Creates a lockout that expires `duration_secs` after `now`.
    #[must_use]
    pub fn starting_at(
        expedition_uuid: impl Into<String>,
        expedition_name: impl Into<String>,
        event_name: impl Into<String>,
        duration_secs: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut timer = Self::new(
            expedition_uuid,
            expedition_name,
            event_name,
            now,
            duration_secs,
        );
        timer.reset(now);
        timer
    }

    /// Uuid of the expedition incarnation that granted this lockout.
    #[must_use]
    pub fn expedition_uuid(&self) -> &str {
        &self.expedition_uuid
    }

    /// Name of the expedition the lockout applies to.
    #[must_use]
    pub fn expedition_name(&self) -> &str {
        &self.expedition_name
    }

    /// Event the lockout applies to.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Expiry instant.
    #[must_use]
    pub const fn expire_at(&self) -> DateTime<Utc> {
        self.expire_at
    }

    /// Original duration in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Returns `true` for the expedition's replay timer.
    #[must_use]
    pub fn is_replay_timer(&self) -> bool {
        self.event_name == REPLAY_TIMER_NAME
    }

    /// Returns `true` once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }

    /// Returns `true` if the lockout was granted by the incarnation with
    /// this uuid.
    #[must_use]
    pub fn is_from_expedition(&self, expedition_uuid: &str) -> bool {
        self.expedition_uuid == expedition_uuid
    }

    /// Seconds until expiry, zero once expired.
    #[must_use]
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u64 {
        let remaining = (self.expire_at - now).num_seconds();
        u64::try_from(remaining).unwrap_or(0)
    }

    /// Days, hours, and minutes until expiry.
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> TimeRemaining {
        TimeRemaining::from_seconds(self.seconds_remaining(now))
    }

    /// Re-arms the lockout so it expires one full duration after `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.expire_at = now + Duration::seconds(i64::from(self.duration_secs));
    }

    /// Returns a copy re-armed from `now`.
    #[must_use]
    pub fn reset_from(&self, now: DateTime<Utc>) -> Self {
        let mut timer = self.clone();
        timer.reset(now);
        timer
    }
}
