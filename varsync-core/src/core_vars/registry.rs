/*
    registry.rs - Per-session variable registry

    Owns every lock version and validation status of the session and the
    typed cell tables behind variable handles. One mutex guards the whole
    registry; merges, local writes and handshake snapshots all run under it.
*/

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

use super::cell::VarCell;
use super::key::{ReplicatedKey, ValidationStatus};
use super::value::{snapshot_of, ValueBatch, VarValue};
use crate::errors::{poisoned, SyncError, SyncResult};

/// Typed table of cells
pub type CellMap<T> = BTreeMap<ReplicatedKey, Arc<VarCell<T>>>;

/// Version and approval state of one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyState {
    pub lock_version: u64,
    pub status: ValidationStatus,
}

/// Registry contents, reachable only through [`VarRegistry::lock`]
#[derive(Debug, Default)]
pub struct RegistryTables {
    keys: BTreeMap<ReplicatedKey, KeyState>,
    pub(crate) bools: CellMap<bool>,
    pub(crate) floats: CellMap<f64>,
    pub(crate) ints: CellMap<i64>,
    pub(crate) strings: CellMap<String>,
}

impl RegistryTables {
    /// Register a cell under `key` at version 0 with status `None`
    pub fn register<T: VarValue>(
        &mut self,
        key: ReplicatedKey,
        cell: Arc<VarCell<T>>,
    ) -> SyncResult<()> {
        if self.keys.contains_key(&key) {
            return Err(SyncError::DuplicateKey(key));
        }

        trace!(%key, kind = %T::KIND, "registering variable");
        self.keys.insert(key.clone(), KeyState::default());
        T::cells_mut(self).insert(key, cell);
        Ok(())
    }

    pub fn has_version(&self, key: &ReplicatedKey) -> bool {
        self.keys.contains_key(key)
    }

    fn state(&self, key: &ReplicatedKey) -> SyncResult<&KeyState> {
        self.keys
            .get(key)
            .ok_or_else(|| SyncError::UnknownKey(key.clone()))
    }

    fn state_mut(&mut self, key: &ReplicatedKey) -> SyncResult<&mut KeyState> {
        self.keys
            .get_mut(key)
            .ok_or_else(|| SyncError::UnknownKey(key.clone()))
    }

    pub fn version(&self, key: &ReplicatedKey) -> SyncResult<u64> {
        Ok(self.state(key)?.lock_version)
    }

    /// Bump the lock version by one and return the new value
    pub fn increment_version(&mut self, key: &ReplicatedKey) -> SyncResult<u64> {
        let state = self.state_mut(key)?;
        state.lock_version += 1;
        Ok(state.lock_version)
    }

    /// Adopt the version of an accepted remote value
    pub(crate) fn adopt_version(&mut self, key: &ReplicatedKey, lock_version: u64) -> SyncResult<()> {
        self.state_mut(key)?.lock_version = lock_version;
        Ok(())
    }

    pub fn status(&self, key: &ReplicatedKey) -> SyncResult<ValidationStatus> {
        Ok(self.state(key)?.status)
    }

    pub(crate) fn set_status(
        &mut self,
        key: &ReplicatedKey,
        status: ValidationStatus,
    ) -> SyncResult<()> {
        self.state_mut(key)?.status = status;
        Ok(())
    }

    /// All registered keys in key order
    pub fn keys(&self) -> impl Iterator<Item = &ReplicatedKey> {
        self.keys.keys()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Typed cell lookup. A key registered under another type is unknown here.
    pub fn cell<T: VarValue>(&self, key: &ReplicatedKey) -> SyncResult<Arc<VarCell<T>>> {
        T::cells(self)
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::UnknownKey(key.clone()))
    }

    /// Every key with its current value, version and status
    pub fn snapshot(&self) -> ValueBatch {
        self.collect(|_, _| true)
    }

    /// Entries whose status is `Pending`
    pub fn pending(&self) -> ValueBatch {
        self.collect(|_, state| state.status == ValidationStatus::Pending)
    }

    /// Mark every `Pending` entry `Validated` and return the promoted entries
    pub(crate) fn promote_pending(&mut self) -> ValueBatch {
        let mut promoted = Vec::new();
        for (key, state) in self.keys.iter_mut() {
            if state.status == ValidationStatus::Pending {
                state.status = ValidationStatus::Validated;
                promoted.push(key.clone());
            }
        }
        self.collect(|key, _| promoted.contains(key))
    }

    fn collect(&self, filter: impl Fn(&ReplicatedKey, &KeyState) -> bool) -> ValueBatch {
        let mut batch = ValueBatch::new();
        self.collect_typed::<bool>(&mut batch, &filter);
        self.collect_typed::<f64>(&mut batch, &filter);
        self.collect_typed::<i64>(&mut batch, &filter);
        self.collect_typed::<String>(&mut batch, &filter);
        batch
    }

    fn collect_typed<T: VarValue>(
        &self,
        batch: &mut ValueBatch,
        filter: &impl Fn(&ReplicatedKey, &KeyState) -> bool,
    ) {
        for (key, cell) in T::cells(self) {
            if let Some(state) = self.keys.get(key) {
                if filter(key, state) {
                    batch.push(snapshot_of(key, cell, state.lock_version, state.status));
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = RegistryTables::default();
    }
}

/// Session-scoped registry handle
#[derive(Debug, Default)]
pub struct VarRegistry {
    tables: Mutex<RegistryTables>,
}

impl VarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access for a multi-step operation such as a merge
    pub fn lock(&self) -> SyncResult<MutexGuard<'_, RegistryTables>> {
        self.tables.lock().map_err(poisoned("registry"))
    }

    pub fn register<T: VarValue>(&self, key: ReplicatedKey, cell: Arc<VarCell<T>>) -> SyncResult<()> {
        self.lock()?.register(key, cell)
    }

    pub fn has_version(&self, key: &ReplicatedKey) -> SyncResult<bool> {
        Ok(self.lock()?.has_version(key))
    }

    pub fn version(&self, key: &ReplicatedKey) -> SyncResult<u64> {
        self.lock()?.version(key)
    }

    pub fn increment_version(&self, key: &ReplicatedKey) -> SyncResult<u64> {
        self.lock()?.increment_version(key)
    }

    pub fn status(&self, key: &ReplicatedKey) -> SyncResult<ValidationStatus> {
        self.lock()?.status(key)
    }

    pub fn keys(&self) -> SyncResult<Vec<ReplicatedKey>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    pub fn snapshot(&self) -> SyncResult<ValueBatch> {
        Ok(self.lock()?.snapshot())
    }

    /// Drop every key and cell, used on session teardown
    pub fn clear(&self) -> SyncResult<()> {
        self.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn int_cell(v: i64) -> Arc<VarCell<i64>> {
        Arc::new(VarCell::new(v, None, 4))
    }

    #[test]
    fn test_register_initial_state() {
        let registry = VarRegistry::new();
        let key = ReplicatedKey::shared("score");
        registry.register(key.clone(), int_cell(0)).unwrap();

        assert!(registry.has_version(&key).unwrap());
        assert_eq!(registry.version(&key).unwrap(), 0);
        assert_eq!(registry.status(&key).unwrap(), ValidationStatus::None);
    }

    #[test]
    fn test_duplicate_key_rejected_across_types() {
        let registry = VarRegistry::new();
        let key = ReplicatedKey::shared("score");
        registry.register(key.clone(), int_cell(0)).unwrap();

        let err = registry
            .register(key.clone(), Arc::new(VarCell::new(false, None, 4)))
            .unwrap_err();
        assert!(matches!(err, SyncError::DuplicateKey(k) if k == key));
    }

    #[test]
    fn test_unknown_key_errors() {
        let registry = VarRegistry::new();
        let key = ReplicatedKey::shared("ghost");

        assert!(!registry.has_version(&key).unwrap());
        assert!(matches!(registry.version(&key), Err(SyncError::UnknownKey(_))));
        assert!(matches!(
            registry.increment_version(&key),
            Err(SyncError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_typed_lookup_respects_type() {
        let registry = VarRegistry::new();
        let key = ReplicatedKey::shared("score");
        registry.register(key.clone(), int_cell(5)).unwrap();

        let tables = registry.lock().unwrap();
        assert_eq!(tables.cell::<i64>(&key).unwrap().get(), 5);
        assert!(matches!(tables.cell::<bool>(&key), Err(SyncError::UnknownKey(_))));
    }

    #[test]
    fn test_increment_is_gapless() {
        let registry = VarRegistry::new();
        let key = ReplicatedKey::shared("score");
        registry.register(key.clone(), int_cell(0)).unwrap();

        for expected in 1..=25 {
            assert_eq!(registry.increment_version(&key).unwrap(), expected);
        }
        assert_eq!(registry.version(&key).unwrap(), 25);
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = Arc::new(VarRegistry::new());
        let key = ReplicatedKey::shared("score");
        registry.register(key.clone(), int_cell(0)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        registry.increment_version(&key).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.version(&key).unwrap(), 800);
    }

    #[test]
    fn test_snapshot_and_pending() {
        let registry = VarRegistry::new();
        let score = ReplicatedKey::shared("score");
        let ready = ReplicatedKey::shared("ready");
        registry.register(score.clone(), int_cell(3)).unwrap();
        registry
            .register(ready.clone(), Arc::new(VarCell::new(true, None, 4)))
            .unwrap();

        {
            let mut tables = registry.lock().unwrap();
            tables.increment_version(&score).unwrap();
            tables.set_status(&score, ValidationStatus::Pending).unwrap();
        }

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.ints[0].lock_version(), 1);
        assert_eq!(*snapshot.bools[0].value(), true);

        let pending = registry.lock().unwrap().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.ints[0].key(), &score);

        let promoted = registry.lock().unwrap().promote_pending();
        assert_eq!(promoted.ints[0].validation_status(), ValidationStatus::Validated);
        assert_eq!(registry.status(&score).unwrap(), ValidationStatus::Validated);
        assert!(registry.lock().unwrap().pending().is_empty());
    }

    #[test]
    fn test_clear() {
        let registry = VarRegistry::new();
        registry
            .register(ReplicatedKey::shared("score"), int_cell(0))
            .unwrap();
        registry.clear().unwrap();
        assert!(registry.keys().unwrap().is_empty());
    }
}
