//! Two players sharing a score, with debug logging of the protocol
//!
//! Run with:
//! ```bash
//! cargo run --example match_demo
//! ```

use tracing::info;
use varsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use varsync_core::{Config, MemoryMatch, Participant, SyncResult};

fn main() -> SyncResult<()> {
    let config = LogConfig::new(LogLevel::Info).directive("varsync_core::core_sync=debug");
    if let Err(err) = init_logging_with_config(config) {
        eprintln!("logging disabled: {}", err);
    }

    let mut game = MemoryMatch::new(Config::default());
    let host = game.add_peer(Participant::new("host", "Host"))?;
    let guest = game.add_peer(Participant::new("guest", "Guest"))?;

    let host_score = host.register("score", 0i64)?;
    let guest_score = guest.register("score", 0i64)?;

    game.join("host")?;
    game.join("guest")?;
    game.pump();

    host_score.set(3)?;
    game.pump();
    guest_score.set(guest_score.get() + 1)?;
    game.pump();

    info!(
        host = host_score.get(),
        guest = guest_score.get(),
        version = host_score.lock_version()?,
        "scores after two edits"
    );
    Ok(())
}
