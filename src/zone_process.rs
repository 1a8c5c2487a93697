//! The single mutating task of a zone process.
//!
//! Player commands, script calls, session changes, and relay messages all
//! arrive as [`ZoneEvent`]s. Each one is handled to completion before the
//! next is taken, so two mutations of the same expedition never
//! interleave even though storage calls await.

use tokio::sync::mpsc;

use crate::domain::{CharacterId, ExpeditionId, LocationKind, ZoneLocation};
use crate::error::ExpeditionError;
use crate::relay::RelayEnvelope;
use crate::relay::handler::dispatch;
use crate::service::{CreateRequest, ExpeditionService, PlayerCommand};
use crate::session::ClientHandle;
use crate::zone_context::ZoneContext;

/// Server-side calls into the expedition system, from quest scripts and
/// the instance lifecycle.
#[derive(Debug, Clone)]
pub enum ScriptCommand {
    /// Creates an expedition.
    Create(CreateRequest),
    /// Adds a member without running the add rules.
    AddMember {
        /// Target expedition.
        expedition_id: ExpeditionId,
        /// Character to add.
        character_id: CharacterId,
        /// Character name.
        name: String,
    },
    /// Removes a member by name.
    RemoveMember {
        /// Target expedition.
        expedition_id: ExpeditionId,
        /// Member name.
        name: String,
    },
    /// Removes every member.
    RemoveAllMembers {
        /// Target expedition.
        expedition_id: ExpeditionId,
    },
    /// Starts or restarts an event lockout.
    AddLockout {
        /// Target expedition.
        expedition_id: ExpeditionId,
        /// Event name.
        event_name: String,
        /// Lockout length in seconds.
        duration_secs: u32,
    },
    /// Removes an event lockout.
    RemoveLockout {
        /// Target expedition.
        expedition_id: ExpeditionId,
        /// Event name.
        event_name: String,
    },
    /// Locks or unlocks invitations.
    SetLocked {
        /// Target expedition.
        expedition_id: ExpeditionId,
        /// New lock state.
        locked: bool,
    },
    /// Toggles granting a replay timer on join.
    SetReplayOnJoin {
        /// Target expedition.
        expedition_id: ExpeditionId,
        /// New value.
        enabled: bool,
    },
    /// Moves one of the instance's locations.
    SetLocation {
        /// Target expedition.
        expedition_id: ExpeditionId,
        /// Which location.
        kind: LocationKind,
        /// New location.
        location: ZoneLocation,
    },
}

/// Everything the zone process reacts to.
#[derive(Debug, Clone)]
pub enum ZoneEvent {
    /// A message from the coordinator.
    Relay(RelayEnvelope),
    /// A command typed by a connected player.
    Command {
        /// Player who typed it.
        requester: CharacterId,
        /// The command.
        command: PlayerCommand,
    },
    /// A server-side call.
    Script(ScriptCommand),
    /// A player finished connecting to this process.
    ClientConnected(CharacterId),
    /// A player left this process.
    ClientDisconnected {
        /// Last state of the player's session.
        handle: ClientHandle,
        /// `false` when zoning to another process.
        logged_out: bool,
    },
}

/// Owner of this process's expedition state.
#[derive(Debug)]
pub struct ZoneProcess {
    service: ExpeditionService,
}

impl ZoneProcess {
    /// Creates a process with an empty cache.
    #[must_use]
    pub fn new(ctx: ZoneContext) -> Self {
        Self {
            service: ExpeditionService::new(ctx),
        }
    }

    /// Read access to the expedition state.
    #[must_use]
    pub const fn service(&self) -> &ExpeditionService {
        &self.service
    }

    /// Loads every expedition from storage.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::Storage`] if loading fails.
    pub async fn load(&mut self) -> Result<usize, ExpeditionError> {
        self.service.cache_all().await
    }

    /// Handles one event to completion.
    ///
    /// # Errors
    ///
    /// Returns storage, relay, and invalid-request errors from the
    /// operation the event triggered.
    pub async fn handle(&mut self, event: ZoneEvent) -> Result<(), ExpeditionError> {
        match event {
            ZoneEvent::Relay(envelope) => dispatch(&mut self.service, envelope).await,
            ZoneEvent::Command { requester, command } => {
                self.service
                    .invites()
                    .handle(requester, command)
                    .await
            }
            ZoneEvent::Script(command) => self.run_script(command).await,
            ZoneEvent::ClientConnected(character_id) => {
                self.service.on_client_connected(character_id);
                Ok(())
            }
            ZoneEvent::ClientDisconnected { handle, logged_out } => {
                self.service
                    .on_client_disconnected(&handle, logged_out);
                Ok(())
            }
        }
    }

    /// Handles events until both queues close.
    ///
    /// Failed events are logged and do not stop the loop.
    pub async fn run(mut self, mut events: mpsc::Receiver<ZoneEvent>, mut relay: mpsc::Receiver<RelayEnvelope>) {
        let identity = self.service.identity();
        tracing::info!(%identity, cached = self.service.cache().len(), "zone process running");

        loop {
            let result = tokio::select! {
                Some(event) = events.recv() => self.handle(event).await,
                Some(envelope) = relay.recv() => self.handle(ZoneEvent::Relay(envelope)).await,
                else => break,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, code = e.error_code(), "zone event failed");
            }
        }

        tracing::info!(%identity, "zone process stopped");
    }

    async fn run_script(&mut self, command: ScriptCommand) -> Result<(), ExpeditionError> {
        let service = &mut self.service;
        match command {
            ScriptCommand::Create(request) => {
                service.create(request).await?;
            }
            ScriptCommand::AddMember {
                expedition_id,
                character_id,
                name,
            } => {
                service
                    .add_member(expedition_id, character_id, &name)
                    .await?;
            }
            ScriptCommand::RemoveMember { expedition_id, name } => {
                service.remove_member(expedition_id, &name).await?;
            }
            ScriptCommand::RemoveAllMembers { expedition_id } => {
                service.remove_all_members(expedition_id).await?;
            }
            ScriptCommand::AddLockout {
                expedition_id,
                event_name,
                duration_secs,
            } => {
                service
                    .add_lockout(expedition_id, &event_name, duration_secs)
                    .await?;
            }
            ScriptCommand::RemoveLockout {
                expedition_id,
                event_name,
            } => {
                service.remove_lockout(expedition_id, &event_name).await?;
            }
            ScriptCommand::SetLocked {
                expedition_id,
                locked,
            } => service.set_locked(expedition_id, locked).await?,
            ScriptCommand::SetReplayOnJoin {
                expedition_id,
                enabled,
            } => service.set_replay_on_join(expedition_id, enabled).await?,
            ScriptCommand::SetLocation {
                expedition_id,
                kind,
                location,
            } => service.set_location(expedition_id, kind, location),
        }
        Ok(())
    }
}
