//! Cache convergence between zone processes sharing a relay.

#![allow(clippy::panic)]

mod common;

use common::{World, create_request, member_names};
use dz_expeditions::domain::{
    CharacterId, ExpeditionGroup, ExpeditionId, LocationKind, Member, MemberStatus, Notice,
    ZoneLocation,
};
use dz_expeditions::error::ExpeditionError;
use dz_expeditions::relay::RelayMessage;
use dz_expeditions::service::PlayerCommand;
use dz_expeditions::zone_process::{ScriptCommand, ZoneEvent};

async fn add(world: &mut World, id: ExpeditionId, character: u32, name: &str) {
    world
        .a
        .script(ScriptCommand::AddMember {
            expedition_id: id,
            character_id: CharacterId::new(character),
            name: name.to_string(),
        })
        .await;
    world.settle().await;
}

#[tokio::test]
async fn created_expedition_is_cached_by_every_zone() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;

    let there = world.b.cached(id);
    assert_eq!(there.name(), "Sleeper's Tomb");
    assert_eq!(there.leader().name, "Leader");
    assert_eq!(there.max_players(), 6);
    assert_eq!(member_names(there), member_names(world.a.cached(id)));
}

#[tokio::test]
async fn membership_converges_across_zones() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    add(&mut world, id, 2, "Healer").await;
    add(&mut world, id, 3, "Tank").await;

    world
        .b
        .script(ScriptCommand::RemoveMember {
            expedition_id: id,
            name: "healer".to_string(),
        })
        .await;
    world.settle().await;

    let names = vec!["Leader".to_string(), "Tank".to_string()];
    assert_eq!(member_names(world.a.cached(id)), names);
    assert_eq!(member_names(world.b.cached(id)), names);
    assert!(world.a.cached(id).was_member(CharacterId::new(2)));
    assert!(world.b.cached(id).was_member(CharacterId::new(2)));
}

#[tokio::test]
async fn own_echo_does_not_double_apply() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    world.a.connect(&mut world.coordinator, 1, "Leader").await;
    world.settle().await;
    world.a.updates(1);

    add(&mut world, id, 2, "Healer").await;

    let added = world
        .a
        .notices(1)
        .into_iter()
        .filter(|n| matches!(n, Notice::MemberAdded { .. }))
        .count();
    assert_eq!(added, 1);
    assert_eq!(world.a.cached(id).member_count(), 2);
}

#[tokio::test]
async fn leader_quitting_hands_over_leadership_everywhere() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    add(&mut world, id, 2, "Healer").await;
    world.a.connect(&mut world.coordinator, 1, "Leader").await;
    world.settle().await;

    world.a.command(1, PlayerCommand::Quit).await;
    world.settle().await;

    for zone in [&world.a, &world.b] {
        let expedition = zone.cached(id);
        assert_eq!(expedition.leader().id, CharacterId::new(2));
        assert!(!expedition.has_member(CharacterId::new(1)));
    }
}

fn join_order(expedition: &ExpeditionGroup) -> Vec<String> {
    expedition.members().iter().map(|m| m.name.clone()).collect()
}

#[tokio::test]
async fn loaded_copy_keeps_join_order_for_leader_fallback() {
    let mut world = World::new();
    let mut request = create_request("Sleeper's Tomb", (5, "Lead"), 6);
    request.members.extend([
        Member::new(CharacterId::new(9), "Bravo", MemberStatus::Online),
        Member::new(CharacterId::new(3), "Charlie", MemberStatus::Online),
    ]);
    let id = world.create_from_a(request).await;
    assert_eq!(join_order(world.b.cached(id)), join_order(world.a.cached(id)));

    world
        .b
        .script(ScriptCommand::RemoveMember {
            expedition_id: id,
            name: "Lead".to_string(),
        })
        .await;
    world.settle().await;

    for zone in [&world.a, &world.b] {
        assert_eq!(zone.cached(id).leader().name, "Bravo");
        assert_eq!(join_order(zone.cached(id)), ["Bravo", "Charlie"]);
    }
}

#[tokio::test]
async fn lockouts_and_settings_replicate() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;

    world
        .a
        .script(ScriptCommand::AddLockout {
            expedition_id: id,
            event_name: "Kerafyrm".to_string(),
            duration_secs: 3600,
        })
        .await;
    world
        .a
        .script(ScriptCommand::SetLocked {
            expedition_id: id,
            locked: true,
        })
        .await;
    world.settle().await;

    let there = world.b.cached(id);
    assert!(there.has_lockout("Kerafyrm"));
    assert!(there.is_locked());

    world
        .b
        .script(ScriptCommand::RemoveLockout {
            expedition_id: id,
            event_name: "Kerafyrm".to_string(),
        })
        .await;
    world.settle().await;
    assert!(!world.a.cached(id).has_lockout("Kerafyrm"));
}

#[tokio::test]
async fn location_change_reaches_other_zones() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    let location = ZoneLocation::new(128, -1500.0, 250.5, 10.0, 128.0);

    world
        .a
        .script(ScriptCommand::SetLocation {
            expedition_id: id,
            kind: LocationKind::SafeReturn,
            location,
        })
        .await;
    world.settle().await;

    let there = world.b.cached(id).instanced_zone().location(LocationKind::SafeReturn);
    assert_eq!(there, location);
}

#[tokio::test]
async fn kick_players_empties_every_cache() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    add(&mut world, id, 2, "Healer").await;
    world.a.connect(&mut world.coordinator, 1, "Leader").await;
    world.settle().await;
    world.a.updates(1);

    world.a.command(1, PlayerCommand::KickPlayers).await;
    world.settle().await;

    assert_eq!(world.a.cached(id).member_count(), 0);
    assert_eq!(world.b.cached(id).member_count(), 0);
    assert!(world.a.notices(1).contains(&Notice::Removed {
        name: "Everyone".to_string(),
        expedition: "Sleeper's Tomb".to_string(),
    }));
}

#[tokio::test]
async fn coordinator_deletion_evicts_everywhere() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;

    world
        .coordinator
        .publish(RelayMessage::Deleted { expedition_id: id });
    world.settle().await;

    assert!(world.a.expedition(id).is_none());
    assert!(world.b.expedition(id).is_none());
}

#[tokio::test]
async fn expire_warning_reaches_connected_members() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    add(&mut world, id, 2, "Healer").await;
    world.b.connect(&mut world.coordinator, 2, "Healer").await;
    world.settle().await;
    world.b.updates(2);

    world.coordinator.publish(RelayMessage::ExpireWarning {
        expedition_id: id,
        minutes_remaining: 5,
    });
    world.settle().await;

    assert_eq!(world.b.notices(2), vec![Notice::ExpireWarning { minutes: 5 }]);
}

#[tokio::test]
async fn member_status_follows_connections() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    add(&mut world, id, 2, "Healer").await;

    world.b.connect(&mut world.coordinator, 2, "Healer").await;
    world.settle().await;
    let status = world.a.cached(id).member(CharacterId::new(2)).map(|m| m.status);
    assert_eq!(status, Some(MemberStatus::Online));

    world.b.disconnect(&mut world.coordinator, 2, true).await;
    world.settle().await;
    let status = world.a.cached(id).member(CharacterId::new(2)).map(|m| m.status);
    assert_eq!(status, Some(MemberStatus::Offline));
}

#[tokio::test]
async fn aborted_write_changes_nothing() {
    let mut world = World::aborting();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    world.store.set_fail_writes(true);

    let result = world
        .a
        .process
        .handle(ZoneEvent::Script(ScriptCommand::AddMember {
            expedition_id: id,
            character_id: CharacterId::new(2),
            name: "Healer".to_string(),
        }))
        .await;
    world.settle().await;

    let Err(error) = result else {
        panic!("expected the write to fail");
    };
    assert!(error.is_storage());
    assert!(!world.a.cached(id).has_member(CharacterId::new(2)));
    assert!(!world.b.cached(id).has_member(CharacterId::new(2)));
}

#[tokio::test]
async fn proceeding_write_runs_ahead_of_storage() {
    let mut world = World::new();
    let id = world.create_in_a("Sleeper's Tomb", (1, "Leader"), 6).await;
    world.store.set_fail_writes(true);

    add(&mut world, id, 2, "Healer").await;

    assert!(world.a.cached(id).has_member(CharacterId::new(2)));
    assert!(world.b.cached(id).has_member(CharacterId::new(2)));
}

#[tokio::test]
async fn unknown_expedition_script_fails() {
    let mut world = World::new();
    let result = world
        .a
        .process
        .handle(ZoneEvent::Script(ScriptCommand::SetLocked {
            expedition_id: ExpeditionId::new(404),
            locked: true,
        }))
        .await;
    assert!(matches!(result, Err(ExpeditionError::ExpeditionNotFound(_))));
}
