//! Shared fixtures for the integration tests

#![allow(dead_code)]

use varsync_core::{Config, MemoryMatch, Participant, SyncEvent, SyncSession, SyncVar};
use tokio::sync::broadcast;

pub fn participant(id: &str) -> Participant {
    let mut name = id.to_string();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    Participant::new(id, name)
}

/// A match with one session per id, nobody joined yet
pub fn new_match(ids: &[&str]) -> (MemoryMatch, Vec<SyncSession>) {
    let mut game = MemoryMatch::new(Config::default());
    let sessions = ids
        .iter()
        .map(|id| game.add_peer(participant(id)).unwrap())
        .collect();
    (game, sessions)
}

/// Join everybody in order, pumping after each join
pub fn join_all(game: &mut MemoryMatch, ids: &[&str]) {
    for id in ids {
        game.join(id).unwrap();
        game.pump();
    }
}

/// Register a shared integer `score` on every session
pub fn register_score(sessions: &[SyncSession]) -> Vec<SyncVar<i64>> {
    sessions
        .iter()
        .map(|session| session.register("score", 0i64).unwrap())
        .collect()
}

pub fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
