//! varsync-core: replicated match variables
//!
//! Variables registered on a [`SyncSession`] are kept consistent across
//! every participant of a match. The earliest joiner acts as host: it
//! approves proposals, corrects rejected ones and seeds late joiners
//! through a handshake. Per-key lock versions detect stale and
//! conflicting writes.

pub mod config;
pub mod core_presence;
pub mod core_sync;
pub mod core_vars;
pub mod errors;
pub mod logging;
pub mod metrics;

pub use config::{Config, ConfigError};
pub use core_presence::{Participant, PresenceChange, PresenceTracker};
pub use core_sync::{
    HandshakeState, MemoryHub, MemoryMatch, Recipients, SyncChannel, SyncEvent, SyncOpcodes,
    SyncSession, SyncVar, WireFormat,
};
pub use core_vars::{ReplicatedKey, ReplicatedValue, ValidationStatus, ValueBatch, ValueChange, VarEvent};
pub use errors::{SyncError, SyncResult};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = ReplicatedKey::shared("score");
        let _ = WireFormat::default();
    }
}
