//! Session event broadcasting
//!
//! Presence, handshake and protocol outcomes are published to any number
//! of application subscribers through a tokio broadcast channel.

use tokio::sync::broadcast;

use crate::core_presence::Participant;
use crate::core_vars::ReplicatedKey;

/// Events emitted by a [`SyncSession`](super::SyncSession)
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// `old` is `None` for the first election of the match
    HostChanged {
        old: Option<Participant>,
        new: Participant,
    },
    GuestJoined(Participant),
    GuestLeft(Participant),
    /// The local registry was seeded from the host
    HandshakeCompleted { host: Participant },
    /// The host's variable set is not a subset of ours
    JoinRefused {
        host: Participant,
        missing: Vec<ReplicatedKey>,
    },
    /// A remote batch collided with local state and was not applied
    Conflict {
        key: ReplicatedKey,
        lock_version: u64,
        source: Participant,
    },
    /// A remote entry broke a role invariant and was dropped
    ProtocolViolation {
        source: Participant,
        key: ReplicatedKey,
        reason: String,
    },
}

/// Fan-out of [`SyncEvent`]s to application subscribers
///
/// Emitting never blocks. A subscriber that falls more than `capacity`
/// events behind sees `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster
    ///
    /// # Arguments
    /// * `capacity` - Events buffered per subscriber; zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all subscribers
    ///
    /// # Returns
    /// Number of subscribers that received the event, zero when nobody listens
    pub fn emit(&self, event: SyncEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Emit events in order
    ///
    /// # Arguments
    /// * `events` - Events produced by one presence or data message
    pub fn emit_many(&self, events: Vec<SyncEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
