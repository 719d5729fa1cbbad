/*
    role.rs - Host and guest behavior for the local participant

    The session keeps one `Role` and replaces it whenever the election
    result changes. Roles never send anything themselves; they mutate the
    registry and return the batches the session must address.
*/

use tracing::{debug, info};

use super::merge::{merge_as_guest, merge_as_host, MergeContext, MergeOutcome};
use crate::core_presence::{Participant, PresenceTracker};
use crate::core_vars::{RegistryTables, ReplicatedKey, ReplicatedValue, ValidationStatus, ValueBatch, VarValue};
use crate::errors::{SyncError, SyncResult};

/// Addressing of an outgoing batch, resolved by the session
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Every other participant
    Everyone,
    /// The current host
    Host,
    Participant(Participant),
}

/// A batch the session must send
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: Target,
    pub batch: ValueBatch,
}

impl Outgoing {
    fn single<T: VarValue>(target: Target, entry: ReplicatedValue<T>) -> Self {
        let mut batch = ValueBatch::new();
        batch.push(entry);
        Outgoing { target, batch }
    }
}

#[derive(Debug, Clone)]
pub struct HostRole {
    me: Participant,
}

impl HostRole {
    pub fn new(me: Participant) -> Self {
        HostRole { me }
    }

    fn handle_local_data_changed<T: VarValue>(
        &self,
        tables: &mut RegistryTables,
        key: &ReplicatedKey,
        value: T,
    ) -> SyncResult<Option<Outgoing>> {
        let cell = tables.cell::<T>(key)?;
        let status = tables.status(key)?;
        if status == ValidationStatus::Pending {
            return Err(SyncError::InvalidState(format!(
                "host holds a pending value for {}",
                key
            )));
        }
        if cell.get() == value {
            return Ok(None);
        }

        let version = tables.increment_version(key)?;
        cell.replace(key, value.clone(), &self.me);
        Ok(Some(Outgoing::single(
            Target::Everyone,
            ReplicatedValue::new(key.clone(), value, version, status),
        )))
    }

    fn handle_remote_data_changed(
        &self,
        tables: &mut RegistryTables,
        sender: &Participant,
        batch: &ValueBatch,
    ) -> SyncResult<(MergeOutcome, Vec<Outgoing>)> {
        let ctx = MergeContext::live(sender, Some(self.me.user_id.as_str()));
        let mut outcome = merge_as_host(tables, &ctx, batch)?;

        let mut outgoing = Vec::new();
        if !outcome.correction.is_empty() {
            outgoing.push(Outgoing {
                target: Target::Participant(sender.clone()),
                batch: outcome.correction.take(),
            });
        }
        if !outcome.broadcast.is_empty() {
            outgoing.push(Outgoing {
                target: Target::Everyone,
                batch: outcome.broadcast.take(),
            });
        }
        Ok((outcome, outgoing))
    }

    /// Promote proposals this participant made as a guest
    ///
    /// Nobody is left to approve them, so they become validated and are
    /// broadcast at their current versions.
    pub fn migrate(&self, tables: &mut RegistryTables) -> Option<Outgoing> {
        let promoted = tables.promote_pending();
        if promoted.is_empty() {
            return None;
        }
        info!(count = promoted.len(), "promoting pending values after becoming host");
        Some(Outgoing {
            target: Target::Everyone,
            batch: promoted,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GuestRole {
    me: Participant,
    host: Participant,
}

impl GuestRole {
    pub fn new(me: Participant, host: Participant) -> Self {
        GuestRole { me, host }
    }

    pub fn host(&self) -> &Participant {
        &self.host
    }

    fn handle_local_data_changed<T: VarValue>(
        &self,
        tables: &mut RegistryTables,
        key: &ReplicatedKey,
        value: T,
    ) -> SyncResult<Option<Outgoing>> {
        let cell = tables.cell::<T>(key)?;
        if cell.get() == value {
            return Ok(None);
        }

        let status = match tables.status(key)? {
            ValidationStatus::Validated | ValidationStatus::Pending => ValidationStatus::Pending,
            ValidationStatus::None if cell.requires_approval() => ValidationStatus::Pending,
            ValidationStatus::None => ValidationStatus::None,
        };

        let version = tables.increment_version(key)?;
        tables.set_status(key, status)?;
        cell.replace(key, value.clone(), &self.me);

        let target = if status == ValidationStatus::Pending {
            Target::Host
        } else {
            Target::Everyone
        };
        Ok(Some(Outgoing::single(
            target,
            ReplicatedValue::new(key.clone(), value, version, status),
        )))
    }

    fn handle_remote_data_changed(
        &self,
        tables: &mut RegistryTables,
        sender: &Participant,
        batch: &ValueBatch,
    ) -> SyncResult<(MergeOutcome, Vec<Outgoing>)> {
        let ctx = MergeContext::live(sender, Some(self.host.user_id.as_str()));
        let outcome = merge_as_guest(tables, &ctx, batch)?;
        Ok((outcome, Vec::new()))
    }

    /// Send proposals still waiting for approval to a newly elected host
    pub fn repropose(&self, tables: &RegistryTables) -> Option<Outgoing> {
        let pending = tables.pending();
        if pending.is_empty() {
            return None;
        }
        debug!(count = pending.len(), host = %self.host.user_id, "re-proposing pending values");
        Some(Outgoing {
            target: Target::Host,
            batch: pending,
        })
    }
}

/// The local participant's current role
#[derive(Debug, Clone)]
pub enum Role {
    Host(HostRole),
    Guest(GuestRole),
}

impl Role {
    /// Role implied by the tracker's current election, if any host exists
    pub fn for_election(tracker: &PresenceTracker, me: &Participant) -> Option<Role> {
        let host = tracker.host()?;
        if host.user_id == me.user_id {
            Some(Role::Host(HostRole::new(me.clone())))
        } else {
            Some(Role::Guest(GuestRole::new(me.clone(), host.clone())))
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Role::Host(_))
    }

    pub fn handle_local_data_changed<T: VarValue>(
        &self,
        tables: &mut RegistryTables,
        key: &ReplicatedKey,
        value: T,
    ) -> SyncResult<Option<Outgoing>> {
        match self {
            Role::Host(host) => host.handle_local_data_changed(tables, key, value),
            Role::Guest(guest) => guest.handle_local_data_changed(tables, key, value),
        }
    }

    pub fn handle_remote_data_changed(
        &self,
        tables: &mut RegistryTables,
        sender: &Participant,
        batch: &ValueBatch,
    ) -> SyncResult<(MergeOutcome, Vec<Outgoing>)> {
        match self {
            Role::Host(host) => host.handle_remote_data_changed(tables, sender, batch),
            Role::Guest(guest) => guest.handle_remote_data_changed(tables, sender, batch),
        }
    }
}
