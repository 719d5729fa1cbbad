//! Host-side merge
//!
//! The host arbitrates `Pending` proposals through the approval hook and
//! never accepts a value another participant claims is already validated.

use tracing::{debug, trace};

use super::{accept, foreign_write, precheck_batch, MergeContext, MergeOutcome, Side};
use crate::core_vars::{
    RegistryTables, ReplicatedValue, ValidationStatus, ValueBatch, ValueChange, VarValue,
};
use crate::errors::SyncResult;

/// Merge a batch received by the host
pub fn merge_as_host(
    tables: &mut RegistryTables,
    ctx: &MergeContext<'_>,
    batch: &ValueBatch,
) -> SyncResult<MergeOutcome> {
    precheck_batch(tables, ctx, batch, Side::Host)?;

    let mut outcome = MergeOutcome::default();
    merge_entries::<bool>(tables, ctx, &batch.bools, &mut outcome)?;
    merge_entries::<f64>(tables, ctx, &batch.floats, &mut outcome)?;
    merge_entries::<i64>(tables, ctx, &batch.ints, &mut outcome)?;
    merge_entries::<String>(tables, ctx, &batch.strings, &mut outcome)?;

    debug!(
        sender = %ctx.sender.user_id,
        accepted = outcome.accepted,
        discarded = outcome.discarded,
        corrections = outcome.correction.len(),
        "host merge complete"
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

        let local_version = tables.version(key)?;
        if entry.lock_version() < local_version {
            trace!(%key, incoming = entry.lock_version(), local = local_version, "stale entry");
            outcome.discarded += 1;
            continue;
        }

        match entry.validation_status() {
            ValidationStatus::Pending => {
                let cell = tables.cell::<T>(key)?;
                let change = ValueChange {
                    key: key.clone(),
                    source: ctx.sender.clone(),
                    current: cell.get(),
                    proposed: entry.value().clone(),
                };

                if cell.approve(&change) {
                    accept(tables, ctx, entry, ValidationStatus::Validated)?;
                    outcome.broadcast.push(ReplicatedValue::new(
                        key.clone(),
                        change.proposed,
                        entry.lock_version(),
                        ValidationStatus::Validated,
                    ));
                    outcome.accepted += 1;
                } else {
                    debug!(%key, sender = %ctx.sender.user_id, "proposal rejected");
                    outcome.correction.push(ReplicatedValue::new(
                        key.clone(),
                        change.current,
                        local_version,
                        ValidationStatus::Validated,
                    ));
                    outcome.discarded += 1;
                }
            }
            ValidationStatus::Validated => {
                outcome.violation(ctx, key, "guest sent a value marked validated");
            }
            ValidationStatus::None => {
                accept(tables, ctx, entry, ValidationStatus::None)?;
                outcome.accepted += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::{entry, participant, register};
    use super::*;
    use crate::core_vars::{ApprovalFn, ReplicatedKey};
    use crate::errors::SyncError;

    #[test]
    fn test_none_entry_adopts_version() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::shared("score");
        let cell = register(&mut tables, &key, 0i64, None);
        let guest = participant("guest");
        let ctx = MergeContext::live(&guest, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, 10i64, 1, ValidationStatus::None));
        let outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();

        assert_eq!(outcome.accepted, 1);
        assert!(outcome.broadcast.is_empty());
        assert_eq!(cell.get(), 10);
        assert_eq!(tables.version(&key).unwrap(), 1);
        assert_eq!(tables.status(&key).unwrap(), ValidationStatus::None);
    }

    #[test]
    fn test_approved_proposal_is_broadcast() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::shared("name");
        let hook: ApprovalFn<String> = Arc::new(|change: &ValueChange<String>| change.proposed.len() <= 8);
        let cell = register(&mut tables, &key, "lobby".to_string(), Some(hook));
        let guest = participant("guest");
        let ctx = MergeContext::live(&guest, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, "arena".to_string(), 1, ValidationStatus::Pending));
        let mut outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();

        assert_eq!(cell.get(), "arena");
        assert_eq!(tables.status(&key).unwrap(), ValidationStatus::Validated);
        assert!(outcome.correction.is_empty());

        let broadcast = outcome.broadcast.take();
        assert_eq!(broadcast.strings.len(), 1);
        assert_eq!(broadcast.strings[0].lock_version(), 1);
        assert_eq!(broadcast.strings[0].validation_status(), ValidationStatus::Validated);
        assert!(outcome.broadcast.is_empty());
    }

    #[test]
    fn test_rejected_proposal_sends_correction() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::shared("name");
        let hook: ApprovalFn<String> = Arc::new(|change: &ValueChange<String>| change.proposed.len() <= 8);
        let cell = register(&mut tables, &key, "lobby".to_string(), Some(hook));
        let guest = participant("guest");
        let ctx = MergeContext::live(&guest, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, "a very long name".to_string(), 1, ValidationStatus::Pending));
        let outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();

        assert_eq!(cell.get(), "lobby");
        assert_eq!(tables.version(&key).unwrap(), 0);
        assert!(outcome.broadcast.is_empty());
        assert_eq!(outcome.correction.strings.len(), 1);
        let correction = &outcome.correction.strings[0];
        assert_eq!(correction.value(), "lobby");
        assert_eq!(correction.lock_version(), 0);
        assert_eq!(correction.validation_status(), ValidationStatus::Validated);
    }

    #[test]
    fn test_proposal_without_hook_is_approved() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::shared("ready");
        let cell = register(&mut tables, &key, false, None);
        let guest = participant("guest");
        let ctx = MergeContext::live(&guest, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, true, 1, ValidationStatus::Pending));
        let outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();

        assert!(cell.get());
        assert_eq!(outcome.broadcast.len(), 1);
    }

    #[test]
    fn test_validated_entry_from_guest_is_dropped() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::shared("score");
        let other = ReplicatedKey::shared("lives");
        let cell = register(&mut tables, &key, 0i64, None);
        let lives = register(&mut tables, &other, 3i64, None);
        let guest = participant("guest");
        let ctx = MergeContext::live(&guest, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, 99i64, 1, ValidationStatus::Validated));
        batch.push(entry(&other, 2i64, 1, ValidationStatus::None));
        let outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();

        assert_eq!(cell.get(), 0);
        assert_eq!(lives.get(), 2);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].key, key);
    }

    #[test]
    fn test_unknown_key_aborts_whole_batch() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::shared("score");
        let cell = register(&mut tables, &key, 0i64, None);
        let guest = participant("guest");
        let ctx = MergeContext::live(&guest, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, 5i64, 1, ValidationStatus::None));
        batch.push(entry(&ReplicatedKey::shared("ghost"), "boo".to_string(), 1, ValidationStatus::None));

        let err = merge_as_host(&mut tables, &ctx, &batch).unwrap_err();
        assert!(matches!(err, SyncError::UnknownKey(_)));
        assert_eq!(cell.get(), 0);
        assert_eq!(tables.version(&key).unwrap(), 0);
    }

    #[test]
    fn test_stale_entry_discarded() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::shared("score");
        let cell = register(&mut tables, &key, 7i64, None);
        tables.adopt_version(&key, 4).unwrap();
        let guest = participant("guest");
        let ctx = MergeContext::live(&guest, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, 1i64, 3, ValidationStatus::None));
        let outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();

        assert_eq!(outcome.discarded, 1);
        assert_eq!(cell.get(), 7);
    }

    #[test]
    fn test_foreign_write_to_owned_key_is_dropped() {
        let mut tables = RegistryTables::default();
        let key = ReplicatedKey::owned("alice", "hp");
        let cell = register(&mut tables, &key, 100i64, None);
        let mallory = participant("mallory");
        let ctx = MergeContext::live(&mallory, Some("host"));

        let mut batch = ValueBatch::new();
        batch.push(entry(&key, 0i64, 1, ValidationStatus::None));
        let outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();

        assert_eq!(cell.get(), 100);
        assert_eq!(outcome.violations.len(), 1);

        let alice = participant("alice");
        let ctx = MergeContext::live(&alice, Some("host"));
        let outcome = merge_as_host(&mut tables, &ctx, &batch).unwrap();
        assert_eq!(outcome.accepted, 1);
        assert_eq!(cell.get(), 0);
    }
}
