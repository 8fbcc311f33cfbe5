use super::entity_state::{EntityState, PersistenceState};
use crate::core::{Key, Tuple};
use std::collections::HashMap;

/// Entity states of a session, one per key.
#[derive(Debug, Default)]
pub struct EntityStateCache {
    states: HashMap<Key, EntityState>,
}

impl EntityStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&EntityState> {
        self.states.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &Key) -> Option<&mut EntityState> {
        self.states.get_mut(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.states.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.states.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntityState> {
        self.states.values_mut()
    }

    /// Best known key for `key`: the cached one when its type is exact.
    pub fn resolve(&self, key: &Key) -> Key {
        match self.states.get(key) {
            Some(state) if state.key().is_exact_type() => state.key().clone(),
            _ => key.clone(),
        }
    }

    pub(crate) fn insert_new(&mut self, key: Key, tuple: Tuple) -> &EntityState {
        self.states.remove(&key);
        self.states
            .entry(key.clone())
            .or_insert_with(|| EntityState::new_entity(key, tuple))
    }

    /// Registers or merges a row read from storage and returns the canonical
    /// state. Available values are never overwritten, and an exact key
    /// replaces an inexact one.
    pub fn materialize(&mut self, key: Key, tuple: Tuple) -> &EntityState {
        let upgrade = self
            .states
            .get(&key)
            .is_some_and(|state| key.is_exact_type() && !state.key().is_exact_type());
        if upgrade && let Some(mut state) = self.states.remove(&key) {
            state.set_key(key.clone());
            self.states.insert(key.clone(), state);
        }
        let state = self
            .states
            .entry(key.clone())
            .or_insert_with(|| EntityState::loaded(key, Tuple::default()));
        state.merge(&tuple);
        state
    }

    /// Records that storage has no row for `key`.
    pub(crate) fn mark_not_found(&mut self, key: Key) {
        match self.states.get(&key) {
            Some(state) if state.persistence_state() != PersistenceState::Loaded => {}
            _ => {
                self.states.insert(key.clone(), EntityState::not_found(key));
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Option<EntityState> {
        self.states.remove(key)
    }

    /// Moves a state to a new key.
    pub(crate) fn rekey(&mut self, old: &Key, new: Key) {
        if let Some(mut state) = self.states.remove(old) {
            state.set_key(new.clone());
            self.states.insert(new, state);
        }
    }
}
