//! Replication protocol: roles, merges, handshake and the session
//! orchestrator, plus the channel seam and its in-memory implementation.

pub mod channel;
pub mod codec;
pub mod events;
pub mod handle;
pub mod handshake;
pub mod memory;
pub mod merge;
pub mod role;
pub mod session;

pub use channel::{Recipients, SyncChannel, SyncOpcodes};
pub use codec::{Codec, CodecError, SyncMessage, WireFormat};
pub use events::{EventBroadcaster, SyncEvent};
pub use handle::SyncVar;
pub use handshake::{HandshakeMessage, HandshakeResponse, HandshakeState};
pub use memory::{Delivery, MemoryChannel, MemoryHub, MemoryMatch};
pub use merge::{MergeContext, MergeMode, MergeOutcome, Violation};
pub use role::{GuestRole, HostRole, Outgoing, Role, Target};
pub use session::SyncSession;
