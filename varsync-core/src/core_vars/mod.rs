//! Key & value model and the per-session variable registry

pub mod cell;
pub mod key;
pub mod registry;
pub mod value;

pub use cell::{ApprovalFn, ValueChange, VarCell, VarEvent};
pub use key::{ReplicatedKey, ValidationStatus};
pub use registry::{KeyState, RegistryTables, VarRegistry};
pub use value::{ReplicatedValue, ValueBatch, ValueKind, VarValue};
