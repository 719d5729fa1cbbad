/*
    merge - Reconciling remote value batches

    A merge runs in two passes under the registry lock. The first pass
    checks the whole batch for unknown keys and version conflicts; either
    aborts the merge before anything is applied. The second pass applies
    the role-specific rules entry by entry in type order (bool, float,
    int, string). Entries that break a role invariant are dropped and
    reported as violations while the rest of the batch continues.
*/

mod guest;
mod host;

pub use guest::merge_as_guest;
pub use host::merge_as_host;

use tracing::warn;

use crate::core_presence::Participant;
use crate::core_vars::{
    RegistryTables, ReplicatedKey, ReplicatedValue, ValidationStatus, ValueBatch, VarValue,
};
use crate::errors::{SyncError, SyncResult};

/// How incoming versions are compared with local ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Regular traffic: stale entries are discarded, equal versions with
    /// different values conflict
    Live,
    /// Handshake snapshot: every entry is adopted as-is
    Snapshot,
}

/// Who sent the batch and who is host while it is merged
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    pub sender: &'a Participant,
    pub host_id: Option<&'a str>,
    pub mode: MergeMode,
}

impl<'a> MergeContext<'a> {
    pub fn live(sender: &'a Participant, host_id: Option<&'a str>) -> Self {
        MergeContext {
            sender,
            host_id,
            mode: MergeMode::Live,
        }
    }

    pub fn snapshot(host: &'a Participant) -> Self {
        MergeContext {
            sender: host,
            host_id: Some(host.user_id.as_str()),
            mode: MergeMode::Snapshot,
        }
    }

    pub fn sender_is_host(&self) -> bool {
        self.host_id == Some(self.sender.user_id.as_str())
    }
}

/// A dropped entry and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub key: ReplicatedKey,
    pub reason: String,
}

/// Result of one merge
///
/// `correction` goes back to the sender only, `broadcast` to every other
/// participant. Both are meant to be taken once.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub accepted: usize,
    pub discarded: usize,
    pub correction: ValueBatch,
    pub broadcast: ValueBatch,
    pub violations: Vec<Violation>,
}

impl MergeOutcome {
    fn violation(&mut self, ctx: &MergeContext<'_>, key: &ReplicatedKey, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(sender = %ctx.sender.user_id, %key, %reason, "dropping remote entry");
        self.violations.push(Violation {
            key: key.clone(),
            reason,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Host,
    Guest,
}

fn precheck_batch(
    tables: &RegistryTables,
    ctx: &MergeContext<'_>,
    batch: &ValueBatch,
    side: Side,
) -> SyncResult<()> {
    precheck::<bool>(tables, ctx, &batch.bools, side)?;
    precheck::<f64>(tables, ctx, &batch.floats, side)?;
    precheck::<i64>(tables, ctx, &batch.ints, side)?;
    precheck::<String>(tables, ctx, &batch.strings, side)
}

fn precheck<T: VarValue>(
    tables: &RegistryTables,
    ctx: &MergeContext<'_>,
    entries: &[ReplicatedValue<T>],
    side: Side,
) -> SyncResult<()> {
    for entry in entries {
        let cell = tables.cell::<T>(entry.key())?;
        if ctx.mode == MergeMode::Snapshot {
            continue;
        }

        let local_version = tables.version(entry.key())?;
        if entry.lock_version() != local_version || cell.get() == *entry.value() {
            continue;
        }

        // The host's validated value settles a proposal still awaiting its
        // decision; any other equal-version disagreement is a conflict
        let decides_proposal = side == Side::Guest
            && ctx.sender_is_host()
            && entry.validation_status() == ValidationStatus::Validated
            && tables.status(entry.key())? == ValidationStatus::Pending;
        if !decides_proposal {
            return Err(SyncError::Conflict {
                key: entry.key().clone(),
                lock_version: local_version,
            });
        }
    }
    Ok(())
}

/// An owned key may only be written by its owner or relayed by the host
fn foreign_write(ctx: &MergeContext<'_>, key: &ReplicatedKey) -> bool {
    key.is_owned() && !key.is_owned_by(&ctx.sender.user_id) && !ctx.sender_is_host()
}

/// Store an accepted entry: value, adopted version and status
fn accept<T: VarValue>(
    tables: &mut RegistryTables,
    ctx: &MergeContext<'_>,
    entry: &ReplicatedValue<T>,
    status: ValidationStatus,
) -> SyncResult<()> {
    let cell = tables.cell::<T>(entry.key())?;
    cell.replace(entry.key(), entry.value().clone(), ctx.sender);
    tables.adopt_version(entry.key(), entry.lock_version())?;
    tables.set_status(entry.key(), status)
}
