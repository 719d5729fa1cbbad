//! Storage behind a variable handle
//!
//! A `VarCell` holds the current value, the optional host approval callback
//! and the per-variable change channel. Only the registry-mediated paths in
//! this crate write to it.

use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::key::ReplicatedKey;
use super::value::VarValue;
use crate::core_presence::Participant;

/// A change proposed to the host for approval
#[derive(Debug, Clone)]
pub struct ValueChange<T> {
    pub key: ReplicatedKey,
    /// Participant proposing the change
    pub source: Participant,
    /// Host's current value
    pub current: T,
    /// Value the proposer wants
    pub proposed: T,
}

/// Host-side approval hook. Returns `true` to accept the proposal.
///
/// Runs synchronously under the registry lock; it must not call back into
/// the session.
pub type ApprovalFn<T> = Arc<dyn Fn(&ValueChange<T>) -> bool + Send + Sync>;

/// Emitted whenever a variable's value actually changes
#[derive(Debug, Clone, PartialEq)]
pub struct VarEvent<T> {
    pub key: ReplicatedKey,
    /// Participant whose write produced the change
    pub source: Participant,
    pub old_value: T,
    pub new_value: T,
}

pub struct VarCell<T: VarValue> {
    value: RwLock<T>,
    approval: Option<ApprovalFn<T>>,
    events: broadcast::Sender<VarEvent<T>>,
}

impl<T: VarValue> VarCell<T> {
    pub(crate) fn new(initial: T, approval: Option<ApprovalFn<T>>, event_capacity: usize) -> Self {
        let (events, _rx) = broadcast::channel(event_capacity.max(1));
        VarCell {
            value: RwLock::new(initial),
            approval,
            events,
        }
    }

    /// Current value. A poisoned lock still yields the last written value.
    pub fn get(&self) -> T {
        match self.value.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn requires_approval(&self) -> bool {
        self.approval.is_some()
    }

    /// Ask the approval hook. Cells without a hook approve everything.
    pub(crate) fn approve(&self, change: &ValueChange<T>) -> bool {
        match &self.approval {
            Some(hook) => hook(change),
            None => true,
        }
    }

    /// Store `value`, notifying subscribers if it differs from the old one.
    ///
    /// Returns whether the value changed.
    pub(crate) fn replace(&self, key: &ReplicatedKey, value: T, source: &Participant) -> bool {
        let old_value = {
            let mut guard = match self.value.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *guard == value {
                return false;
            }
            std::mem::replace(&mut *guard, value.clone())
        };

        // No receivers is fine
        let _ = self.events.send(VarEvent {
            key: key.clone(),
            source: source.clone(),
            old_value,
            new_value: value,
        });
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VarEvent<T>> {
        self.events.subscribe()
    }
}

impl<T: VarValue> fmt::Debug for VarCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VarCell")
            .field("value", &self.get())
            .field("requires_approval", &self.requires_approval())
            .finish()
    }
}
