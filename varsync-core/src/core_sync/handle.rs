//! Application-facing variable handle

use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use super::session::SessionCore;
use crate::core_vars::{ReplicatedKey, ValidationStatus, VarCell, VarEvent, VarValue};
use crate::errors::{SyncError, SyncResult};

/// Handle to one replicated variable
///
/// Reads are served from the local cell and keep working after the session
/// is gone. Writes and registry queries go through the session.
pub struct SyncVar<T: VarValue> {
    key: ReplicatedKey,
    cell: Arc<VarCell<T>>,
    session: Weak<SessionCore>,
}

impl<T: VarValue> SyncVar<T> {
    pub(crate) fn new(key: ReplicatedKey, cell: Arc<VarCell<T>>, session: Weak<SessionCore>) -> Self {
        SyncVar { key, cell, session }
    }

    pub fn key(&self) -> &ReplicatedKey {
        &self.key
    }

    pub fn get(&self) -> T {
        self.cell.get()
    }

    /// Write a new value and replicate it
    ///
    /// Setting the current value again is a no-op. A guest writing a
    /// variable with an approval rule sees the value at once with status
    /// `Pending` until the host answers.
    ///
    /// # Errors
    /// * `NotOwner` - the variable belongs to another participant
    /// * `InvalidState` - the join is in progress or was refused, or the
    ///   host writes a key that is still pending
    /// * `SessionClosed` - the session was closed or dropped
    pub fn set(&self, value: T) -> SyncResult<()> {
        self.session()?.local_set(&self.key, value)
    }

    pub fn validation_status(&self) -> SyncResult<ValidationStatus> {
        self.session()?.key_status(&self.key)
    }

    pub fn lock_version(&self) -> SyncResult<u64> {
        self.session()?.key_version(&self.key)
    }

    pub fn requires_approval(&self) -> bool {
        self.cell.requires_approval()
    }

    /// Value changes from any source, local or remote
    pub fn subscribe(&self) -> broadcast::Receiver<VarEvent<T>> {
        self.cell.subscribe()
    }

    fn session(&self) -> SyncResult<Arc<SessionCore>> {
        self.session.upgrade().ok_or(SyncError::SessionClosed)
    }
}

impl<T: VarValue> Clone for SyncVar<T> {
    fn clone(&self) -> Self {
        SyncVar {
            key: self.key.clone(),
            cell: Arc::clone(&self.cell),
            session: Weak::clone(&self.session),
        }
    }
}

impl<T: VarValue> fmt::Debug for SyncVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncVar")
            .field("key", &self.key)
            .field("value", &self.cell.get())
            .finish()
    }
}
