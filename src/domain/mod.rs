//! Domain layer: expedition state, lockouts, and the per-process cache.
//!
//! Everything here is plain data plus the rules that need nothing but
//! that data. Storage, player delivery, and relay broadcasts are added on
//! top by [`crate::service`].

pub mod expedition;
pub mod expedition_cache;
pub mod ids;
pub mod instanced_zone;
pub mod lockout;
pub mod member;
pub mod notice;

pub use expedition::{AddCandidate, AddConflict, ExpeditionGroup, JoinLockouts, Leader};
pub use expedition_cache::ExpeditionCache;
pub use ids::{CharacterId, ExpeditionId, ProcessIdentity};
pub use instanced_zone::{InstancedZoneRef, LocationKind, ZoneLocation};
pub use lockout::{LockoutTimer, REPLAY_TIMER_NAME, TimeRemaining};
pub use member::{Member, MemberStatus};
pub use notice::{ClientUpdate, ExpeditionInfo, InviteWindow, MemberEntry, Notice};
