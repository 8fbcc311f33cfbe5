use crate::core::{DataType, Key, Result, Tuple, TypeId, Value};
use crate::model::DomainModel;
use crate::server_info::{IdentityFeatures, ServerInfo};
use crate::storage::StorageDriver;

/// Issues keys for new entities.
///
/// Backends with auto-increment identities get temporary negative keys that
/// are replaced by storage keys on persist; other backends are asked for a
/// permanent key right away.
#[derive(Debug)]
pub struct KeyGenerator {
    next_temporary: i64,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self { next_temporary: -1 }
    }

    pub fn uses_temporary_keys(model: &DomainModel, server: &ServerInfo, type_id: TypeId) -> bool {
        server.identity().contains(IdentityFeatures::AUTOINCREMENT)
            && model.hierarchy(type_id).key_types() == [DataType::Integer]
    }

    pub fn generate(
        &mut self,
        model: &DomainModel,
        server: &ServerInfo,
        storage: &dyn StorageDriver,
        type_id: TypeId,
    ) -> Result<Key> {
        let hierarchy = model.hierarchy(type_id).root;
        if Self::uses_temporary_keys(model, server, type_id) {
            let value = self.next_temporary;
            self.next_temporary -= 1;
            // validates that the type is an entity
            model.key(type_id, [Value::Integer(value)])?;
            let value = Tuple::from_values([Value::Integer(value)]);
            return Ok(Key::temporary(hierarchy, type_id, value));
        }
        let value = storage.generate_key(hierarchy)?;
        Ok(model.key(type_id, [value])?.with_exact_type(type_id))
    }
}
