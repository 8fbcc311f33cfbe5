use crate::core::{Key, Tuple, TypeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistenceState {
    New,
    Loaded,
    Modified,
    Removed,
}

/// Runtime record of one entity of a session.
///
/// A state without a tuple stands for a key that has no row in storage.
#[derive(Debug, Clone)]
pub struct EntityState {
    key: Key,
    tuple: Option<Tuple>,
    state: PersistenceState,
    /// Columns changed since the last persist
    dirty: BTreeSet<usize>,
    /// Version value read from storage before the first change
    original_version: Option<Value>,
}

impl EntityState {
    pub(crate) fn new_entity(key: Key, tuple: Tuple) -> Self {
        Self {
            key,
            tuple: Some(tuple),
            state: PersistenceState::New,
            dirty: BTreeSet::new(),
            original_version: None,
        }
    }

    pub(crate) fn loaded(key: Key, tuple: Tuple) -> Self {
        Self {
            key,
            tuple: Some(tuple),
            state: PersistenceState::Loaded,
            dirty: BTreeSet::new(),
            original_version: None,
        }
    }

    pub(crate) fn not_found(key: Key) -> Self {
        Self {
            key,
            tuple: None,
            state: PersistenceState::Loaded,
            dirty: BTreeSet::new(),
            original_version: None,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn type_id(&self) -> TypeId {
        self.key.type_id()
    }

    pub fn tuple(&self) -> Option<&Tuple> {
        self.tuple.as_ref()
    }

    pub fn persistence_state(&self) -> PersistenceState {
        self.state
    }

    pub fn is_removed(&self) -> bool {
        self.state == PersistenceState::Removed
    }

    pub fn is_new(&self) -> bool {
        self.state == PersistenceState::New
    }

    /// Whether storage has no row for the key.
    pub fn is_not_found(&self) -> bool {
        self.tuple.is_none()
    }

    pub fn get(&self, column: usize) -> Option<&Value> {
        self.tuple.as_ref().and_then(|t| t.get(column))
    }

    pub fn is_available(&self, column: usize) -> bool {
        self.tuple.as_ref().is_some_and(|t| t.is_available(column))
    }

    pub fn dirty_columns(&self) -> &BTreeSet<usize> {
        &self.dirty
    }

    pub fn original_version(&self) -> Option<&Value> {
        self.original_version.as_ref()
    }

    pub(crate) fn set_key(&mut self, key: Key) {
        self.key = key;
    }

    /// Fills unavailable slots from `tuple`; available slots are kept.
    pub(crate) fn merge(&mut self, tuple: &Tuple) -> usize {
        match &mut self.tuple {
            Some(current) => current.merge(tuple),
            None => {
                self.tuple = Some(tuple.clone());
                tuple.iter().filter(Option::is_some).count()
            }
        }
    }

    /// Changes a column value, tracking it for the next persist.
    pub(crate) fn set(&mut self, column: usize, value: Value) {
        self.tuple.get_or_insert_with(Tuple::default).set(column, value);
        if self.state == PersistenceState::Loaded {
            self.state = PersistenceState::Modified;
        }
        if self.state != PersistenceState::New {
            self.dirty.insert(column);
        }
    }

    /// Writes a value that storage already holds.
    pub(crate) fn store(&mut self, column: usize, value: Value) {
        self.tuple.get_or_insert_with(Tuple::default).set(column, value);
    }

    pub(crate) fn remember_version(&mut self, version: Value) {
        if self.original_version.is_none() {
            self.original_version = Some(version);
        }
    }

    pub(crate) fn mark_removed(&mut self) {
        self.state = PersistenceState::Removed;
    }

    /// State after its changes reached storage.
    pub(crate) fn commit(&mut self) {
        self.state = PersistenceState::Loaded;
        self.dirty.clear();
        self.original_version = None;
    }

    /// Rewrites the slots of `columns` holding `old` values with `new` values.
    pub(crate) fn replace_values(&mut self, columns: &[usize], old: &Tuple, new: &Tuple) -> bool {
        let Some(tuple) = &mut self.tuple else {
            return false;
        };
        if tuple.project(columns) != *old {
            return false;
        }
        for (position, &column) in columns.iter().enumerate() {
            if let Some(value) = new.get(position) {
                tuple.set(column, value.clone());
            }
        }
        true
    }
}
