//! # dz-expeditions
//!
//! Expedition groups for zone processes: bounded cohorts of characters
//! sharing one instanced zone, their lockout timers, and the replication
//! that keeps every zone process's copy of a group in step.
//!
//! Each zone process owns its own cache. A change is written to storage,
//! applied locally, and broadcast through the coordinating process;
//! every other process applies the same change to its copy. There is no
//! shared memory and no distributed lock.
//!
//! ## Architecture
//!
//! ```text
//! Player commands, scripts, session events      Coordinator (relay)
//!     │                                                │
//!     └──────────────▶ ZoneProcess (zone_process) ◀────┘
//!                          │
//!                          ├── InviteCoordinator (service/)
//!                          ├── ExpeditionService (service/)
//!                          │       │
//!                          │       ├── ExpeditionCache (domain/)
//!                          │       └── ZoneContext: sessions, store, relay
//!                          │
//!                          └── relay::handler (echo check, apply)
//!
//! ExpeditionStore ── PostgreSQL (persistence/)
//! RelayLink ──────── TCP frames or in-process bus (relay/)
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod relay;
pub mod service;
pub mod session;
pub mod zone_context;
pub mod zone_process;
