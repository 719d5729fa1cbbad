//! Message channel seam
//!
//! The session never talks to a transport directly. Integrators implement
//! [`SyncChannel`] over their realtime socket and feed inbound traffic back
//! through `SyncSession::on_data_received` and `on_presence_changed`.

use crate::config::ConfigError;
use crate::core_presence::Participant;
use crate::errors::SyncResult;

/// Opcodes reserved for replication traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOpcodes {
    handshake: i64,
    data: i64,
}

impl SyncOpcodes {
    pub fn new(handshake: i64, data: i64) -> Result<Self, ConfigError> {
        if handshake == data {
            return Err(ConfigError::OpcodeClash(handshake));
        }
        Ok(SyncOpcodes { handshake, data })
    }

    pub fn handshake(&self) -> i64 {
        self.handshake
    }

    pub fn data(&self) -> i64 {
        self.data
    }
}

/// Addressing for one outgoing payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Every participant in the match except the sender
    All,
    /// Only the listed participants
    Only(Vec<Participant>),
}

impl Recipients {
    pub fn only(participant: Participant) -> Self {
        Recipients::Only(vec![participant])
    }

    /// Whether a participant other than the sender falls in this set
    pub fn includes(&self, user_id: &str) -> bool {
        match self {
            Recipients::All => true,
            Recipients::Only(list) => list.iter().any(|p| p.user_id == user_id),
        }
    }
}

/// Outbound half of the match transport
///
/// `send` is called after the session released its locks, but it must not
/// deliver synchronously back into the same session.
pub trait SyncChannel: Send + Sync {
    fn send(&self, recipients: &Recipients, opcode: i64, payload: Vec<u8>) -> SyncResult<()>;
}
