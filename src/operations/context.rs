use crate::core::{Key, OrmError, Result};
use std::collections::{HashMap, HashSet};

/// State shared by the operations of one replay: the keys they touch and
/// the mapping from recorded keys to the keys of the target session.
#[derive(Debug, Default)]
pub struct OperationExecutionContext {
    key_mapping: HashMap<Key, Key>,
    prepared_keys: Vec<Key>,
    seen: HashSet<Key>,
}

impl OperationExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_key(&mut self, key: &Key) {
        if self.seen.insert(key.clone()) {
            self.prepared_keys.push(key.clone());
        }
    }

    /// Keys registered during preparation, in first-seen order.
    pub fn prepared_keys(&self) -> &[Key] {
        &self.prepared_keys
    }

    pub fn is_mapped(&self, key: &Key) -> bool {
        self.key_mapping.contains_key(key)
    }

    pub fn try_remap_key(&self, key: &Key) -> Key {
        self.key_mapping.get(key).cloned().unwrap_or_else(|| key.clone())
    }

    pub fn add_key_mapping(&mut self, from: Key, to: Key) -> Result<()> {
        if let Some(existing) = self.key_mapping.get(&from) {
            if *existing == to {
                return Ok(());
            }
            return Err(OrmError::KeyMapping(format!(
                "{} is already mapped to {}, cannot map it to {}",
                from, existing, to
            )));
        }
        self.key_mapping.insert(from, to);
        Ok(())
    }

    pub fn key_mapping(&self) -> &HashMap<Key, Key> {
        &self.key_mapping
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
    fn test_conflicting_mapping_is_rejected() {
        let mut context = OperationExecutionContext::new();
        context.add_key_mapping(key(-1), key(5)).unwrap();
        context.add_key_mapping(key(-1), key(5)).unwrap();
        let err = context.add_key_mapping(key(-1), key(6)).unwrap_err();
        assert!(matches!(err, OrmError::KeyMapping(_)));
        assert_eq!(context.try_remap_key(&key(-1)), key(5));
        assert_eq!(context.try_remap_key(&key(3)), key(3));
    }

    #[test]
    fn test_prepared_keys_are_distinct() {
        let mut context = OperationExecutionContext::new();
        context.register_key(&key(1));
        context.register_key(&key(2));
        context.register_key(&key(1));
        assert_eq!(context.prepared_keys(), &[key(1), key(2)]);
    }
}
