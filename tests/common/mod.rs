//! Two zone processes and a coordinator stand-in sharing one relay bus
//! and one in-memory store.
//!
//! Nothing runs in the background: [`World::settle`] pumps every queue
//! until no process has anything left to handle.

#![allow(dead_code, clippy::panic)]

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use dz_expeditions::config::{ExpeditionSettings, StorageFailurePolicy};
use dz_expeditions::domain::{
    CharacterId, ClientUpdate, ExpeditionGroup, ExpeditionId, InstancedZoneRef, Leader, Member,
    MemberStatus, Notice, ProcessIdentity,
};
use dz_expeditions::persistence::{ExpeditionStore, InMemoryExpeditionStore};
use dz_expeditions::relay::{DzCommand, RelayBus, RelayEnvelope, RelayLink, RelayMessage};
use dz_expeditions::service::{CreateRequest, PlayerCommand};
use dz_expeditions::session::{ClientHandle, LocalSessions, SessionDirectory};
use dz_expeditions::zone_context::ZoneContext;
use dz_expeditions::zone_process::{ScriptCommand, ZoneEvent, ZoneProcess};

/// Upper bound on pump rounds before a test is declared stuck.
const MAX_ROUNDS: usize = 32;

/// Zone the expedition instance lives in.
pub const DZ_ZONE_ID: u32 = 128;
/// Instance id of the expedition instance.
pub const DZ_INSTANCE_ID: u32 = 5000;

/// One zone process with its own sessions and relay inbox.
#[derive(Debug)]
pub struct Zone {
    pub process: ZoneProcess,
    pub sessions: Arc<LocalSessions>,
    identity: ProcessIdentity,
    inbox: broadcast::Receiver<RelayEnvelope>,
}

impl Zone {
    fn new(identity: ProcessIdentity, store: &Arc<InMemoryExpeditionStore>, bus: &RelayBus, settings: ExpeditionSettings) -> Self {
        let sessions = Arc::new(LocalSessions::new());
        let ctx = ZoneContext::new(
            identity,
            Arc::clone(&sessions) as Arc<dyn SessionDirectory>,
            Arc::clone(store) as Arc<dyn ExpeditionStore>,
            Arc::new(bus.clone()) as Arc<dyn RelayLink>,
            settings,
        );
        Self {
            process: ZoneProcess::new(ctx),
            sessions,
            identity,
            inbox: bus.subscribe(),
        }
    }

    /// Identity this zone stamps on its broadcasts.
    pub const fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    /// Cached copy of an expedition.
    pub fn expedition(&self, id: ExpeditionId) -> Option<&ExpeditionGroup> {
        self.process.service().expedition(id)
    }

    /// Like [`Zone::expedition`], failing the test when it is missing.
    pub fn cached(&self, id: ExpeditionId) -> &ExpeditionGroup {
        let Some(expedition) = self.expedition(id) else {
            panic!("expedition {id} not cached in {}", self.identity);
        };
        expedition
    }

    /// Handles one event, failing the test on error.
    pub async fn handle(&mut self, event: ZoneEvent) {
        if let Err(e) = self.process.handle(event).await {
            panic!("zone {} failed to handle event: {e}", self.identity);
        }
    }

    /// Runs a player command.
    pub async fn command(&mut self, requester: u32, command: PlayerCommand) {
        self.handle(ZoneEvent::Command {
            requester: CharacterId::new(requester),
            command,
        })
        .await;
    }

    /// Runs a server-side call.
    pub async fn script(&mut self, command: ScriptCommand) {
        self.handle(ZoneEvent::Script(command)).await;
    }

    /// Connects a character here and tells the coordinator where they are.
    pub async fn connect(&mut self, coordinator: &mut Coordinator, id: u32, name: &str) {
        let handle = ClientHandle::new(CharacterId::new(id), name, self.identity.zone_id, self.identity.instance_id);
        self.sessions.connect(handle, Vec::new());
        coordinator.register(CharacterId::new(id), name, self.identity);
        self.handle(ZoneEvent::ClientConnected(CharacterId::new(id))).await;
    }

    /// Disconnects a character, zoning or logging out.
    pub async fn disconnect(&mut self, coordinator: &mut Coordinator, id: u32, logged_out: bool) {
        let Some(handle) = self.sessions.disconnect(CharacterId::new(id)) else {
            panic!("character {id} is not connected to {}", self.identity);
        };
        coordinator.unregister(&handle.name);
        self.handle(ZoneEvent::ClientDisconnected { handle, logged_out }).await;
    }

    /// Takes every update queued for a character.
    pub fn updates(&self, id: u32) -> Vec<ClientUpdate> {
        self.sessions.drain_updates(CharacterId::new(id))
    }

    /// Takes every update queued for a character, keeping the notices.
    pub fn notices(&self, id: u32) -> Vec<Notice> {
        self.updates(id)
            .into_iter()
            .filter_map(|update| match update {
                ClientUpdate::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    async fn drain(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(envelope) => {
                    handled += 1;
                    self.handle(ZoneEvent::Relay(envelope)).await;
                }
                Err(broadcast::error::TryRecvError::Empty) => return handled,
                Err(e) => panic!("zone {} relay inbox failed: {e}", self.identity),
            }
        }
    }
}

/// Minimal coordinating process: answers requests and relays nothing
/// else, since the bus already delivers every envelope to every zone.
#[derive(Debug)]
pub struct Coordinator {
    bus: RelayBus,
    inbox: broadcast::Receiver<RelayEnvelope>,
    online: BTreeMap<String, (CharacterId, ProcessIdentity)>,
    saved_invites: BTreeMap<String, DzCommand>,
    pub handled: Vec<RelayMessage>,
}

impl Coordinator {
    fn new(bus: &RelayBus) -> Self {
        Self {
            bus: bus.clone(),
            inbox: bus.subscribe(),
            online: BTreeMap::new(),
            saved_invites: BTreeMap::new(),
            handled: Vec::new(),
        }
    }

    fn register(&mut self, id: CharacterId, name: &str, zone: ProcessIdentity) {
        self.online.insert(name.to_lowercase(), (id, zone));
    }

    fn unregister(&mut self, name: &str) {
        self.online.remove(&name.to_lowercase());
    }

    /// Whether an invite is stashed for the character.
    pub fn has_saved_invite(&self, name: &str) -> bool {
        self.saved_invites.contains_key(&name.to_lowercase())
    }

    /// Replays a stashed invite once its holder is settled in a new zone.
    pub fn resume_invite(&mut self, name: &str) {
        let Some(command) = self.saved_invites.remove(&name.to_lowercase()) else {
            panic!("no invite saved for {name}");
        };
        self.publish(RelayMessage::AddPlayer(command));
    }

    /// Originates a message, as the coordinator does for deletions and
    /// instance timers.
    pub fn publish(&self, message: RelayMessage) {
        self.bus.send(RelayEnvelope::from_coordinator(message));
    }

    fn drain(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(envelope) => {
                    if envelope.message.is_coordinator_bound() {
                        handled += 1;
                        self.answer(envelope.message);
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return handled,
                Err(e) => panic!("coordinator relay inbox failed: {e}"),
            }
        }
    }

    fn answer(&mut self, message: RelayMessage) {
        self.handled.push(message.clone());
        match message {
            RelayMessage::AddPlayerRequest(mut command) => {
                command.is_char_online = self.is_online(&command.target_name);
                self.publish(RelayMessage::AddPlayer(command));
            }
            RelayMessage::MakeLeaderRequest(mut command) => {
                command.is_char_online = self.is_online(&command.target_name);
                self.publish(RelayMessage::MakeLeader(command));
            }
            RelayMessage::OnlineMembersQuery { mut entries } => {
                for entry in &mut entries {
                    let location = self.online.values().find(|(id, _)| *id == entry.character_id);
                    if let Some((_, zone)) = location {
                        entry.online = true;
                        entry.zone_id = zone.zone_id;
                        entry.instance_id = zone.instance_id;
                    }
                }
                self.publish(RelayMessage::OnlineMembersReply { entries });
            }
            RelayMessage::SaveInvite {
                character_name,
                expedition_id,
                inviter_name,
                swap_remove_name,
            } => {
                self.saved_invites.insert(
                    character_name.to_lowercase(),
                    DzCommand {
                        expedition_id,
                        requester_name: inviter_name,
                        target_name: character_name,
                        remove_name: swap_remove_name,
                        is_char_online: true,
                    },
                );
            }
            _ => {}
        }
    }

    fn is_online(&self, name: &str) -> bool {
        self.online.contains_key(&name.to_lowercase())
    }
}

/// Two zone processes, `a` and `b`, behind one coordinator.
#[derive(Debug)]
pub struct World {
    pub store: Arc<InMemoryExpeditionStore>,
    pub coordinator: Coordinator,
    pub a: Zone,
    pub b: Zone,
}

impl World {
    /// Zone 202 and zone 29, both outside any instance.
    pub fn new() -> Self {
        Self::with_settings(ExpeditionSettings::default())
    }

    /// Same as [`World::new`] with custom behaviour switches.
    pub fn with_settings(settings: ExpeditionSettings) -> Self {
        let store = Arc::new(InMemoryExpeditionStore::new());
        let bus = RelayBus::new(256);
        let coordinator = Coordinator::new(&bus);
        let a = Zone::new(ProcessIdentity::new(202, 0), &store, &bus, settings);
        let b = Zone::new(ProcessIdentity::new(29, 0), &store, &bus, settings);
        Self {
            store,
            coordinator,
            a,
            b,
        }
    }

    /// Aborting world for storage failure tests.
    pub fn aborting() -> Self {
        Self::with_settings(ExpeditionSettings {
            verify_leader_with_database: false,
            storage_failure_policy: StorageFailurePolicy::Abort,
        })
    }

    /// Pumps the coordinator and both zones until every queue is empty.
    pub async fn settle(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let mut handled = self.coordinator.drain();
            handled += self.a.drain().await;
            handled += self.b.drain().await;
            if handled == 0 {
                return;
            }
        }
        panic!("relay did not settle after {MAX_ROUNDS} rounds");
    }

    /// Creates an expedition led by `leader` from zone `a` and lets every
    /// process cache it.
    pub async fn create_in_a(&mut self, name: &str, leader: (u32, &str), max_players: u32) -> ExpeditionId {
        self.create_from_a(create_request(name, leader, max_players)).await
    }

    /// Runs a prepared creation request in zone `a` and settles.
    pub async fn create_from_a(&mut self, request: CreateRequest) -> ExpeditionId {
        let name = request.name.clone();
        let leader = request.leader.id;
        self.a.script(ScriptCommand::Create(request)).await;
        self.settle().await;
        let Some(expedition) = self.a.process.service().cache().find_by_character(leader) else {
            panic!("expedition {name} was not created");
        };
        expedition.id()
    }
}

/// Creation request with the leader as the only member.
pub fn create_request(name: &str, leader: (u32, &str), max_players: u32) -> CreateRequest {
    let (id, leader_name) = leader;
    CreateRequest {
        name: name.to_string(),
        min_players: 1,
        max_players,
        leader: Leader::new(CharacterId::new(id), leader_name),
        members: vec![Member::new(CharacterId::new(id), leader_name, MemberStatus::Online)],
        instanced_zone: InstancedZoneRef::new(DZ_INSTANCE_ID, DZ_ZONE_ID),
        lockouts: Vec::new(),
    }
}

/// Member names, sorted, for comparing caches.
pub fn member_names(expedition: &ExpeditionGroup) -> Vec<String> {
    let mut names: Vec<String> = expedition.members().iter().map(|m| m.name.clone()).collect();
    names.sort();
    names
}
