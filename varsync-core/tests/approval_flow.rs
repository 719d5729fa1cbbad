/*
    approval_flow.rs - Host approval of guest proposals

    The room name may only be changed to names of at most eight
    characters. Guests propose, the host decides, and rejected proposals
    are rolled back on the proposer.
*/

mod common;

use common::{drain, join_all, new_match};
use varsync_core::{SyncError, SyncEvent, SyncSession, SyncVar, ValidationStatus, ValueChange};

fn short_names(change: &ValueChange<String>) -> bool {
    change.proposed.len() <= 8
}

fn register_room(sessions: &[SyncSession]) -> Vec<SyncVar<String>> {
    sessions
        .iter()
        .map(|session| {
            session
                .register_with_approval("room", "lobby".to_string(), short_names)
                .unwrap()
        })
        .collect()
}

#[test]
fn test_approved_proposal_reaches_everyone() {
    let ids = ["alice", "bob", "carol"];
    let (mut game, sessions) = new_match(&ids);
    let room = register_room(&sessions);
    join_all(&mut game, &ids);

    room[1].set("arena".to_string()).unwrap();
    assert_eq!(room[1].validation_status().unwrap(), ValidationStatus::Pending);
    assert_eq!(room[2].get(), "lobby");

    game.pump();

    for var in &room {
        assert_eq!(var.get(), "arena");
        assert_eq!(var.lock_version().unwrap(), 1);
        assert_eq!(var.validation_status().unwrap(), ValidationStatus::Validated);
    }
}

#[test]
fn test_rejected_proposal_rolls_back() {
    let ids = ["alice", "bob", "carol"];
    let (mut game, sessions) = new_match(&ids);
    let room = register_room(&sessions);
    join_all(&mut game, &ids);

    room[1].set("arena".to_string()).unwrap();
    game.pump();

    room[1].set("a name that is far too long".to_string()).unwrap();
    assert_eq!(room[1].lock_version().unwrap(), 2);
    game.pump();

    assert_eq!(room[0].get(), "arena");
    assert_eq!(room[1].get(), "arena");
    assert_eq!(room[1].lock_version().unwrap(), 1);
    assert_eq!(room[1].validation_status().unwrap(), ValidationStatus::Validated);
    assert_eq!(room[2].get(), "arena");
}

#[test]
fn test_competing_proposals_settle_on_the_first() {
    let ids = ["alice", "bob", "carol"];
    let (mut game, sessions) = new_match(&ids);
    let room = register_room(&sessions);
    join_all(&mut game, &ids);
    let mut host_events = sessions[0].subscribe();

    // Both proposals claim version 1; alice sees bob's first
    room[1].set("arena".to_string()).unwrap();
    room[2].set("harbor".to_string()).unwrap();
    game.pump();

    assert!(drain(&mut host_events)
        .iter()
        .any(|event| matches!(event, SyncEvent::Conflict { source, .. } if source.user_id == "carol")));
    for var in &room {
        assert_eq!(var.get(), "arena");
        assert_eq!(var.lock_version().unwrap(), 1);
        assert_eq!(var.validation_status().unwrap(), ValidationStatus::Validated);
    }
}

#[test]
fn test_host_writes_without_approval() {
    let ids = ["alice", "bob"];
    let (mut game, sessions) = new_match(&ids);
    let room = register_room(&sessions);
    join_all(&mut game, &ids);

    room[0].set("a name that is far too long".to_string()).unwrap();
    game.pump();

    assert_eq!(room[1].get(), "a name that is far too long");
    assert_eq!(room[1].validation_status().unwrap(), ValidationStatus::None);
}

#[test]
fn test_owned_variables_reject_foreign_writers() {
    let ids = ["alice", "bob"];
    let (mut game, sessions) = new_match(&ids);
    let hp: Vec<Vec<SyncVar<i64>>> = sessions
        .iter()
        .map(|session| {
            ids.iter()
                .map(|owner| session.register_owned(*owner, "hp", 100i64).unwrap())
                .collect()
        })
        .collect();
    join_all(&mut game, &ids);

    // bob writes his own hp
    hp[1][1].set(80).unwrap();
    game.pump();
    assert_eq!(hp[0][1].get(), 80);

    // but not alice's
    let err = hp[1][0].set(0).unwrap_err();
    assert!(matches!(err, SyncError::NotOwner { .. }));
    assert_eq!(hp[0][0].get(), 100);
}

#[test]
fn test_forged_owned_write_is_a_violation() {
    let ids = ["alice", "bob", "carol"];
    let (mut game, sessions) = new_match(&ids);
    let hp: Vec<SyncVar<i64>> = sessions
        .iter()
        .map(|session| session.register_owned("carol", "hp", 100i64).unwrap())
        .collect();
    join_all(&mut game, &ids);
    let mut events = sessions[2].subscribe();

    // bob claims carol's hp without being carol or the host
    let codec = varsync_core::core_sync::Codec::default();
    let mut batch = varsync_core::ValueBatch::new();
    batch.push(varsync_core::ReplicatedValue::new(
        varsync_core::ReplicatedKey::owned("carol", "hp"),
        1i64,
        1,
        ValidationStatus::None,
    ));
    let payload = codec
        .encode(&varsync_core::core_sync::SyncMessage::Data(batch))
        .unwrap();
    sessions[2]
        .on_data_received(
            sessions[1].self_participant(),
            sessions[2].opcodes().data(),
            &payload,
        )
        .unwrap();

    assert_eq!(hp[2].get(), 100);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        SyncEvent::ProtocolViolation { source, .. } if source.user_id == "bob"
    )));
}
