use crate::core::{FieldId, Key};
use std::collections::{BTreeSet, HashMap};

/// Items of one entity set of one owner.
///
/// Local additions and removals are kept apart from the loaded items so that
/// a later load can be merged without losing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySetState {
    items: BTreeSet<Key>,
    fully_loaded: bool,
    added: BTreeSet<Key>,
    removed: BTreeSet<Key>,
}

impl EntitySetState {
    /// Set of an owner that does not exist in storage yet.
    pub fn new_empty() -> Self {
        Self {
            fully_loaded: true,
            ..Self::default()
        }
    }

    /// Set whose items are not known yet.
    pub fn unloaded() -> Self {
        Self::default()
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    pub fn items(&self) -> impl Iterator<Item = &Key> {
        self.items.iter()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn contains(&self, item: &Key) -> bool {
        self.items.contains(item)
    }

    pub fn added_items(&self) -> &BTreeSet<Key> {
        &self.added
    }

    pub fn removed_items(&self) -> &BTreeSet<Key> {
        &self.removed
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Adds an item as a local change.
    pub(crate) fn add(&mut self, item: Key) -> bool {
        if !self.items.insert(item.clone()) {
            return false;
        }
        if !self.removed.remove(&item) {
            self.added.insert(item);
        }
        true
    }

    /// Removes an item as a local change.
    pub(crate) fn remove(&mut self, item: &Key) -> bool {
        if !self.items.remove(item) {
            return false;
        }
        if !self.added.remove(item) {
            self.removed.insert(item.clone());
        }
        true
    }

    /// Removes an item that may not be loaded yet; the removal is recorded
    /// so that a later load does not bring it back.
    pub(crate) fn exclude(&mut self, item: &Key) {
        if self.remove(item) || self.fully_loaded {
            return;
        }
        if !self.added.remove(item) {
            self.removed.insert(item.clone());
        }
    }

    /// Adds or removes an item whose membership is stored elsewhere, such as
    /// a foreign key of the item.
    pub(crate) fn sync(&mut self, item: &Key, present: bool) {
        if present {
            self.items.insert(item.clone());
        } else {
            self.items.remove(item);
        }
    }

    /// Merges items read from storage with the local changes.
    pub(crate) fn merge_loaded(
        &mut self,
        loaded: impl IntoIterator<Item = Key>,
        fully_loaded: bool,
    ) {
        for item in loaded {
            if !self.removed.contains(&item) {
                self.items.insert(item);
            }
        }
        self.fully_loaded = self.fully_loaded || fully_loaded;
    }

    /// Forgets local changes once they reached storage.
    pub(crate) fn commit(&mut self) {
        self.added.clear();
        self.removed.clear();
    }

    fn remap(&mut self, mapping: &HashMap<Key, Key>) {
        let remap = |keys: &mut BTreeSet<Key>| {
            *keys = std::mem::take(keys)
                .into_iter()
                .map(|k| mapping.get(&k).cloned().unwrap_or(k))
                .collect();
        };
        remap(&mut self.items);
        remap(&mut self.added);
        remap(&mut self.removed);
    }
}

/// Entity set states of a session by owner key and set field.
#[derive(Debug, Default)]
pub struct EntitySetCache {
    sets: HashMap<(Key, FieldId), EntitySetState>,
}

impl EntitySetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: &Key, field: FieldId) -> Option<&EntitySetState> {
        self.sets.get(&(owner.clone(), field))
    }

    pub(crate) fn get_mut(&mut self, owner: &Key, field: FieldId) -> Option<&mut EntitySetState> {
        self.sets.get_mut(&(owner.clone(), field))
    }

    pub(crate) fn get_or_insert(
        &mut self,
        owner: &Key,
        field: FieldId,
        create: impl FnOnce() -> EntitySetState,
    ) -> &mut EntitySetState {
        self.sets.entry((owner.clone(), field)).or_insert_with(create)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&(Key, FieldId), &EntitySetState)> {
        self.sets.iter()
    }

    pub(crate) fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&(Key, FieldId), &mut EntitySetState)> {
        self.sets.iter_mut()
    }

    /// Drops every set owned by `owner`.
    pub(crate) fn remove_owner(&mut self, owner: &Key) {
        self.sets.retain(|(key, _), _| key != owner);
    }

    pub(crate) fn remap(&mut self, mapping: &HashMap<Key, Key>) {
        if mapping.is_empty() {
            return;
        }
        let sets = std::mem::take(&mut self.sets);
        for ((owner, field), mut state) in sets {
            state.remap(mapping);
            let owner = mapping.get(&owner).cloned().unwrap_or(owner);
            self.sets.insert((owner, field), state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Tuple, TypeId, Value};

    fn key(id: i64) -> Key {
        Key::new(TypeId(1), TypeId(1), true, Tuple::from_values([Value::Integer(id)]))
    }

    #[test]
    fn test_local_changes_survive_load() {
        let mut set = EntitySetState::unloaded();
        assert!(set.add(key(1)));
        assert!(!set.add(key(1)));
        set.merge_loaded([key(2), key(3)], true);
        assert!(set.remove(&key(3)));
        set.merge_loaded([key(2), key(3)], true);

        let items: Vec<_> = set.items().cloned().collect();
        assert_eq!(items, vec![key(1), key(2)]);
        assert!(set.added_items().contains(&key(1)));
        assert!(set.removed_items().contains(&key(3)));
        assert!(set.is_fully_loaded());

        set.commit();
        assert!(!set.has_changes());
    }

    #[test]
    fn test_exclude_hides_unloaded_item() {
        let mut set = EntitySetState::unloaded();
        set.exclude(&key(4));
        set.merge_loaded([key(4), key(5)], true);
        let items: Vec<_> = set.items().cloned().collect();
        assert_eq!(items, vec![key(5)]);
        assert!(set.removed_items().contains(&key(4)));
    }

    #[test]
    fn test_add_after_remove_cancels_out() {
        let mut set = EntitySetState::new_empty();
        set.merge_loaded([key(1)], true);
        set.remove(&key(1));
        set.add(key(1));
        assert!(!set.has_changes());
    }
}
