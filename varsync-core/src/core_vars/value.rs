/*
    value.rs - Wire records for value updates

    ReplicatedValue<T> is the snapshot of one key at one lock version.
    ValueBatch groups snapshots of every supported value type so one
    envelope can carry a whole merge result or a handshake snapshot.
*/

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::cell::VarCell;
use super::key::{ReplicatedKey, ValidationStatus};
use super::registry::{CellMap, RegistryTables};

/// Point-in-time snapshot of one replicated key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedValue<T> {
    key: ReplicatedKey,
    value: T,
    lock_version: u64,
    validation_status: ValidationStatus,
}

impl<T> ReplicatedValue<T> {
    pub fn new(
        key: ReplicatedKey,
        value: T,
        lock_version: u64,
        validation_status: ValidationStatus,
    ) -> Self {
        ReplicatedValue {
            key,
            value,
            lock_version,
            validation_status,
        }
    }

    pub fn key(&self) -> &ReplicatedKey {
        &self.key
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn lock_version(&self) -> u64 {
        self.lock_version
    }

    pub fn validation_status(&self) -> ValidationStatus {
        self.validation_status
    }
}

/// Value type tag, used in logs and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Float,
    Int,
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Bool => "bool",
            ValueKind::Float => "float",
            ValueKind::Int => "int",
            ValueKind::String => "string",
        };
        f.write_str(s)
    }
}

/// A type that can be replicated
///
/// Implemented for `bool`, `f64`, `i64` and `String`. The accessors route a
/// type to its list inside a [`ValueBatch`] and its table inside the
/// registry, which lets the merge algorithms stay generic over the type.
pub trait VarValue:
    Clone + PartialEq + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const KIND: ValueKind;

    fn entries(batch: &ValueBatch) -> &[ReplicatedValue<Self>];

    fn entries_mut(batch: &mut ValueBatch) -> &mut Vec<ReplicatedValue<Self>>;

    #[doc(hidden)]
    fn cells(tables: &RegistryTables) -> &CellMap<Self>;

    #[doc(hidden)]
    fn cells_mut(tables: &mut RegistryTables) -> &mut CellMap<Self>;
}

macro_rules! impl_var_value {
    ($ty:ty, $kind:expr, $field:ident) => {
        impl VarValue for $ty {
            const KIND: ValueKind = $kind;

            fn entries(batch: &ValueBatch) -> &[ReplicatedValue<Self>] {
                &batch.$field
            }

            fn entries_mut(batch: &mut ValueBatch) -> &mut Vec<ReplicatedValue<Self>> {
                &mut batch.$field
            }

            fn cells(tables: &RegistryTables) -> &CellMap<Self> {
                &tables.$field
            }

            fn cells_mut(tables: &mut RegistryTables) -> &mut CellMap<Self> {
                &mut tables.$field
            }
        }
    };
}

impl_var_value!(bool, ValueKind::Bool, bools);
impl_var_value!(f64, ValueKind::Float, floats);
impl_var_value!(i64, ValueKind::Int, ints);
impl_var_value!(String, ValueKind::String, strings);

/// Typed collection of value snapshots addressed as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueBatch {
    pub bools: Vec<ReplicatedValue<bool>>,
    pub floats: Vec<ReplicatedValue<f64>>,
    pub ints: Vec<ReplicatedValue<i64>>,
    pub strings: Vec<ReplicatedValue<String>>,
}

impl ValueBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: VarValue>(&mut self, value: ReplicatedValue<T>) {
        T::entries_mut(self).push(value);
    }

    pub fn len(&self) -> usize {
        self.bools.len() + self.floats.len() + self.ints.len() + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every entry of `other` into this batch
    pub fn append(&mut self, other: &mut ValueBatch) {
        self.bools.append(&mut other.bools);
        self.floats.append(&mut other.floats);
        self.ints.append(&mut other.ints);
        self.strings.append(&mut other.strings);
    }

    /// Take the contents, leaving an empty batch behind
    pub fn take(&mut self) -> ValueBatch {
        std::mem::take(self)
    }

    /// Keys in type order: bools, floats, ints, strings
    pub fn keys(&self) -> Vec<&ReplicatedKey> {
        self.bools
            .iter()
            .map(|v| v.key())
            .chain(self.floats.iter().map(|v| v.key()))
            .chain(self.ints.iter().map(|v| v.key()))
            .chain(self.strings.iter().map(|v| v.key()))
            .collect()
    }
}

/// Snapshot entry for one registered cell
pub(crate) fn snapshot_of<T: VarValue>(
    key: &ReplicatedKey,
    cell: &Arc<VarCell<T>>,
    lock_version: u64,
    status: ValidationStatus,
) -> ReplicatedValue<T> {
    ReplicatedValue::new(key.clone(), cell.get(), lock_version, status)
}
