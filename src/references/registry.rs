use crate::core::{AssociationId, Key};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// One tracked reference: `referencing` points at `referenced` through
/// `association`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub association: AssociationId,
    pub referencing: Key,
    pub referenced: Key,
}

/// Incoming non-paired references of the entities of a session.
///
/// The counters are cumulative: they only grow until [`clear`] is called.
/// References of entities read from storage are registered silently and do
/// not move the counters.
///
/// [`clear`]: ReferenceRegistry::clear
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    incoming: HashMap<Key, BTreeSet<(AssociationId, Key)>>,
    added: u64,
    removed: u64,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added_references_count(&self) -> u64 {
        self.added
    }

    pub fn removed_references_count(&self) -> u64 {
        self.removed
    }

    /// Number of references currently tracked.
    pub fn live_references_count(&self) -> usize {
        self.incoming.values().map(BTreeSet::len).sum()
    }

    pub fn add(&mut self, association: AssociationId, referencing: &Key, referenced: &Key) {
        if self.insert(association, referencing, referenced) {
            self.added += 1;
            trace!(%referencing, %referenced, "reference added");
        }
    }

    pub fn remove(&mut self, association: AssociationId, referencing: &Key, referenced: &Key) {
        let Some(sources) = self.incoming.get_mut(referenced) else {
            return;
        };
        if sources.remove(&(association, referencing.clone())) {
            self.removed += 1;
            trace!(%referencing, %referenced, "reference removed");
        }
        if sources.is_empty() {
            self.incoming.remove(referenced);
        }
    }

    /// Tracks a reference that already exists in storage.
    pub fn register_silently(
        &mut self,
        association: AssociationId,
        referencing: &Key,
        referenced: &Key,
    ) {
        self.insert(association, referencing, referenced);
    }

    fn insert(&mut self, association: AssociationId, referencing: &Key, referenced: &Key) -> bool {
        self.incoming
            .entry(referenced.clone())
            .or_default()
            .insert((association, referencing.clone()))
    }

    pub fn get_references_to(&self, referenced: &Key) -> Vec<ReferenceInfo> {
        self.incoming
            .get(referenced)
            .into_iter()
            .flatten()
            .map(|(association, referencing)| ReferenceInfo {
                association: *association,
                referencing: referencing.clone(),
                referenced: referenced.clone(),
            })
            .collect()
    }

    pub fn get_references_from(&self, referencing: &Key) -> Vec<ReferenceInfo> {
        let mut references: Vec<ReferenceInfo> = self
            .incoming
            .iter()
            .flat_map(|(referenced, sources)| {
                sources
                    .iter()
                    .filter(|(_, source)| source == referencing)
                    .map(|(association, source)| ReferenceInfo {
                        association: *association,
                        referencing: source.clone(),
                        referenced: referenced.clone(),
                    })
            })
            .collect();
        references.sort();
        references
    }

    /// Replaces every occurrence of a remapped key.
    pub fn remap(&mut self, mapping: &HashMap<Key, Key>) {
        if mapping.is_empty() {
            return;
        }
        let incoming = std::mem::take(&mut self.incoming);
        for (referenced, sources) in incoming {
            let referenced = mapping.get(&referenced).cloned().unwrap_or(referenced);
            let target = self.incoming.entry(referenced).or_default();
            for (association, referencing) in sources {
                let referencing = mapping.get(&referencing).cloned().unwrap_or(referencing);
                target.insert((association, referencing));
            }
        }
    }

    /// Forgets all references and resets the counters.
    pub fn clear(&mut self) {
        self.incoming.clear();
        self.added = 0;
        self.removed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Tuple, TypeId, Value};

    fn key(id: i64) -> Key {
        Key::new(TypeId(0), TypeId(0), true, Tuple::from_values([Value::Integer(id)]))
    }

    #[test]
    fn test_add_remove_counts() {
        let mut registry = ReferenceRegistry::new();
        let association = AssociationId(0);
        registry.add(association, &key(1), &key(10));
        registry.add(association, &key(1), &key(10));
        assert_eq!(registry.added_references_count(), 1);

        registry.remove(association, &key(1), &key(10));
        registry.remove(association, &key(1), &key(10));
        assert_eq!(registry.removed_references_count(), 1);
        assert!(registry.get_references_to(&key(10)).is_empty());
        assert_eq!(registry.live_references_count(), 0);
    }

    #[test]
    fn test_silent_registration_keeps_counters() {
        let mut registry = ReferenceRegistry::new();
        registry.register_silently(AssociationId(2), &key(1), &key(10));
        assert_eq!(registry.added_references_count(), 0);
        assert_eq!(registry.get_references_to(&key(10)).len(), 1);
        assert_eq!(registry.get_references_from(&key(1)).len(), 1);
    }

    #[test]
    fn test_remap() {
        let mut registry = ReferenceRegistry::new();
        registry.add(AssociationId(0), &key(-1), &key(-2));
        let mapping = HashMap::from([(key(-1), key(1)), (key(-2), key(2))]);
        registry.remap(&mapping);
        let references = registry.get_references_to(&key(2));
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].referencing, key(1));
        assert!(registry.get_references_to(&key(-2)).is_empty());
    }
}
