//! Error types for replication operations

use std::sync::PoisonError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core_sync::codec::CodecError;
use crate::core_vars::ReplicatedKey;

/// Result type for replication operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the registry, the presence tracker and the merge path
#[derive(Debug, Error)]
pub enum SyncError {
    /// A variable was registered twice under the same key
    #[error("Duplicate key: {0}")]
    DuplicateKey(ReplicatedKey),

    /// An operation named a key that was never registered locally
    #[error("Unknown key: {0}")]
    UnknownKey(ReplicatedKey),

    /// A presence joined while already tracked
    #[error("Duplicate join: {0}")]
    DuplicateJoin(String),

    /// A presence left without having joined
    #[error("Unknown leaver: {0}")]
    UnknownLeaver(String),

    /// Two writers produced different values at the same lock version
    #[error("Version conflict on {key} at lock version {lock_version}")]
    Conflict {
        key: ReplicatedKey,
        lock_version: u64,
    },

    /// A role invariant was violated, locally or by a remote peer
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Local write to an owned variable by a participant that does not own it
    #[error("{user_id} does not own {key}")]
    NotOwner { key: ReplicatedKey, user_id: String },

    /// The session was closed or dropped
    #[error("Session closed")]
    SessionClosed,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lock poisoned: a thread panicked while holding the {0} lock")]
    LockPoisoned(&'static str),
}

impl SyncError {
    /// Whether the error came from a misbehaving peer rather than local misuse
    pub fn is_peer_fault(&self) -> bool {
        matches!(self, SyncError::InvalidState(_))
    }
}

/// Map a poisoned lock into `SyncError::LockPoisoned`
pub(crate) fn poisoned<T>(what: &'static str) -> impl FnOnce(PoisonError<T>) -> SyncError {
    move |_| SyncError::LockPoisoned(what)
}
