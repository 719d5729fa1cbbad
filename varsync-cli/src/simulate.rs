//! In-memory match driven from the command line

use anyhow::{bail, Result};
use std::time::Duration;
use tracing::{info, warn};
use varsync_core::config::Config;
use varsync_core::{MemoryMatch, Participant, SyncEvent, SyncVar};

#[derive(Debug, Clone)]
pub struct Options {
    pub peers: usize,
    pub rounds: usize,
    pub tick_ms: u64,
    pub migrate: bool,
}

#[derive(Debug, Clone)]
pub struct PlayerReport {
    pub user_id: String,
    pub score: i64,
    pub lock_version: u64,
    pub host: bool,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub players: Vec<PlayerReport>,
    pub deliveries: usize,
    pub conflicts: usize,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Value {
        let players: Vec<_> = self
            .players
            .iter()
            .map(|p| {
                serde_json::json!({
                    "user_id": p.user_id,
                    "score": p.score,
                    "lock_version": p.lock_version,
                    "host": p.host,
                })
            })
            .collect();
        serde_json::json!({
            "players": players,
            "deliveries": self.deliveries,
            "conflicts": self.conflicts,
        })
    }
}

struct Player {
    id: String,
    score: SyncVar<i64>,
    active: bool,
}

pub async fn run(config: &Config, options: &Options) -> Result<Report> {
    if options.peers == 0 {
        bail!("a match needs at least one player");
    }

    let mut game = MemoryMatch::new(config.clone());
    let mut players = Vec::with_capacity(options.peers);
    for n in 1..=options.peers {
        let id = format!("player-{}", n);
        let session = game.add_peer(Participant::new(id.clone(), format!("Player {}", n)))?;
        let score = session.register("score", 0i64)?;
        players.push(Player {
            id,
            score,
            active: true,
        });
    }

    // Observe from the last player, which never hosts unless alone
    let observer = players[options.peers - 1].id.clone();
    let mut events = game
        .session(&observer)
        .map(|session| session.subscribe())
        .ok_or_else(|| anyhow::anyhow!("observer session missing"))?;

    let mut deliveries = 0;
    for player in &players {
        game.join(&player.id)?;
        deliveries += game.pump();
    }
    info!(peers = options.peers, "all players joined");

    let tick = Duration::from_millis(options.tick_ms);
    for round in 0..options.rounds {
        if options.migrate && options.peers > 1 && round == options.rounds / 2 {
            let host = players[0].id.clone();
            info!(%host, round, "host leaving");
            game.leave(&host)?;
            players[0].active = false;
        }

        for player in players.iter().filter(|p| p.active) {
            let next = player.score.get() + 1;
            player.score.set(next)?;
            deliveries += game.pump();
        }
        tokio::time::sleep(tick).await;
    }

    let mut conflicts = 0;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Conflict { key, .. } = event {
            warn!(%key, "conflict observed");
            conflicts += 1;
        }
    }

    let mut reports = Vec::new();
    for player in players.iter().filter(|p| p.active) {
        let host = match game.session(&player.id) {
            Some(session) => session.is_host()?,
            None => false,
        };
        reports.push(PlayerReport {
            user_id: player.id.clone(),
            score: player.score.get(),
            lock_version: player.score.lock_version()?,
            host,
        });
    }

    if let Some(first) = reports.first() {
        if reports.iter().any(|r| r.score != first.score) {
            bail!("players diverged: {:?}", reports);
        }
    }

    Ok(Report {
        players: reports,
        deliveries,
        conflicts,
    })
}
