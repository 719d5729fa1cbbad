//! Guest-side merge
//!
//! Guests take validated values from the host, plain values from anyone,
//! and never accept a proposal that still waits for approval.

use tracing::{debug, trace};

use super::{accept, foreign_write, precheck_batch, MergeContext, MergeMode, MergeOutcome, Side};
use crate::core_vars::{RegistryTables, ReplicatedValue, ValidationStatus, ValueBatch, VarValue};
use crate::errors::SyncResult;

/// Merge a batch received by a guest, live or as a handshake snapshot
pub fn merge_as_guest(
    tables: &mut RegistryTables,
    ctx: &MergeContext<'_>,
    batch: &ValueBatch,
) -> SyncResult<MergeOutcome> {
    precheck_batch(tables, ctx, batch, Side::Guest)?;

    let mut outcome = MergeOutcome::default();
    merge_entries::<bool>(tables, ctx, &batch.bools, &mut outcome)?;
    merge_entries::<f64>(tables, ctx, &batch.floats, &mut outcome)?;
    merge_entries::<i64>(tables, ctx, &batch.ints, &mut outcome)?;
    merge_entries::<String>(tables, ctx, &batch.strings, &mut outcome)?;

    debug!(
        sender = %ctx.sender.user_id,
        mode = ?ctx.mode,
        accepted = outcome.accepted,
        discarded = outcome.discarded,
        "guest merge complete"
    );
    Ok(outcome)
}

fn merge_entries<T: VarValue>(
    tables: &mut RegistryTables,
    ctx: &MergeContext<'_>,
    entries: &[ReplicatedValue<T>],
    outcome: &mut MergeOutcome,
) -> SyncResult<()> {
    for entry in entries {
        let key = entry.key();

        if foreign_write(ctx, key) {
            outcome.violation(ctx, key, "write to a variable owned by another participant");
            continue;
        }

        let status = entry.validation_status();
        if ctx.mode == MergeMode::Live {
            let local_version = tables.version(key)?;
            let rollback = ctx.sender_is_host() && status == ValidationStatus::Validated;
            if entry.lock_version() < local_version && !rollback {
                trace!(%key, incoming = entry.lock_version(), local = local_version, "stale entry");
                outcome.discarded += 1;
                continue;
            }
        }

        match status {
            ValidationStatus::Pending => {
                outcome.violation(ctx, key, "guest received a value still pending approval");
            }
            ValidationStatus::Validated | ValidationStatus::None => {
                accept(tables, ctx, entry, status)?;
                outcome.accepted += 1;
            }
        }
    }
    Ok(())
}
