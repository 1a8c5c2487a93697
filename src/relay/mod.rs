//! Replication relay between zone processes.
//!
//! A zone that mutates an expedition broadcasts a [`RelayEnvelope`]
//! through the coordinating process. Every zone, the sender included,
//! receives it; [`handler::dispatch`] drops the sender's own echo and
//! applies the change to every other cache.
//!
//! ```text
//! zone A ──send──▶ coordinator ──▶ zone A (echo, dropped)
//!                              └─▶ zone B (applied to cache)
//! ```

pub mod codec;
pub mod handler;
pub mod link;
pub mod messages;

pub use link::{RelayBus, RelayLink, TcpRelayLink};
pub use messages::{CharacterEntry, DzCommand, RelayEnvelope, RelayMessage, SettingKind};
