use super::{AssociationInfo, FieldInfo, FieldKind, HierarchyInfo, IndexInfo, TypeInfo};
use crate::core::{AssociationId, FieldId, IndexId, Key, OrmError, Result, Tuple, TypeId, Value};
use crate::server_info::{DataTypeFeatures, ServerInfo};
use std::collections::HashMap;

/// Read-only schema of a domain.
#[derive(Debug, Clone)]
pub struct DomainModel {
    pub(crate) types: Vec<TypeInfo>,
    pub(crate) fields: Vec<FieldInfo>,
    pub(crate) associations: Vec<AssociationInfo>,
    pub(crate) indexes: Vec<IndexInfo>,
    pub(crate) hierarchies: HashMap<TypeId, HierarchyInfo>,
    pub(crate) type_names: HashMap<String, TypeId>,
}

impl DomainModel {
    pub fn type_info(&self, id: TypeId) -> &TypeInfo {
        &self.types[id.index()]
    }

    /// Like `type_info`, for ids that come from outside the model (parsed
    /// keys, deserialized logs).
    pub fn try_type_info(&self, id: TypeId) -> Result<&TypeInfo> {
        self.types
            .get(id.index())
            .ok_or_else(|| OrmError::TypeNotFound(id.to_string()))
    }

    /// Entity type of a key built outside the model.
    pub fn check_key(&self, key: &Key) -> Result<&TypeInfo> {
        let info = self.try_type_info(key.type_id())?;
        if !info.is_entity() || info.hierarchy != key.hierarchy() {
            return Err(OrmError::TypeMismatch(format!("Key {} does not identify an entity", key)));
        }
        Ok(info)
    }

    pub fn type_by_name(&self, name: &str) -> Result<&TypeInfo> {
        self.type_names
            .get(name)
            .map(|id| self.type_info(*id))
            .ok_or_else(|| OrmError::TypeNotFound(name.to_string()))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.iter()
    }

    pub fn field(&self, id: FieldId) -> &FieldInfo {
        &self.fields[id.index()]
    }

    /// Field declared on `type_id` (directly, inherited or nested).
    pub fn field_of(&self, type_id: TypeId, name: &str) -> Result<&FieldInfo> {
        let info = self.type_info(type_id);
        info.field_id(name)
            .map(|id| self.field(id))
            .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), info.name.clone()))
    }

    pub fn association(&self, id: AssociationId) -> &AssociationInfo {
        &self.associations[id.index()]
    }

    pub fn associations(&self) -> impl Iterator<Item = &AssociationInfo> {
        self.associations.iter()
    }

    pub fn index(&self, id: IndexId) -> &IndexInfo {
        &self.indexes[id.index()]
    }

    pub fn hierarchy(&self, type_id: TypeId) -> &HierarchyInfo {
        let root = self.type_info(type_id).hierarchy;
        &self.hierarchies[&root]
    }

    pub fn hierarchies(&self) -> impl Iterator<Item = &HierarchyInfo> {
        self.hierarchies.values()
    }

    /// Whether an instance of `type_id` can be used where `target` is expected.
    pub fn is_assignable(&self, type_id: TypeId, target: TypeId) -> bool {
        self.type_info(target).is_ancestor_of(type_id)
    }

    /// Builds a key of `type_id` from its key values.
    pub fn key(&self, type_id: TypeId, values: impl IntoIterator<Item = Value>) -> Result<Key> {
        let info = self.type_info(type_id);
        if !info.is_entity() {
            return Err(OrmError::TypeMismatch(format!("Type '{}' is not an entity", info.name)));
        }
        let hierarchy = self.hierarchy(type_id);
        let tuple = Tuple::from_values(values);
        let key_types = hierarchy.key_types();
        if tuple.len() != key_types.len() {
            return Err(OrmError::TypeMismatch(format!(
                "Type '{}' expects {} key values, got {}",
                info.name,
                key_types.len(),
                tuple.len()
            )));
        }
        for (value, data_type) in tuple.iter().zip(key_types.iter()) {
            let value = value.unwrap_or(&Value::Null);
            if value.is_null() || !data_type.is_compatible(value) {
                return Err(OrmError::TypeMismatch(format!(
                    "Key of '{}' expects {}, got {}",
                    info.name,
                    data_type,
                    value.type_name()
                )));
            }
        }
        let exact = info.descendants.is_empty();
        Ok(Key::new(hierarchy.root, type_id, exact, tuple))
    }

    /// Fields loaded when nothing more specific is requested: non-lazy
    /// primitive and reference leaves.
    pub fn default_fields(&self, type_id: TypeId) -> Vec<FieldId> {
        self.type_info(type_id)
            .fields
            .iter()
            .copied()
            .filter(|&id| {
                let field = self.field(id);
                matches!(field.kind, FieldKind::Primitive | FieldKind::Entity)
                    && !field.is_lazy_load
            })
            .collect()
    }

    /// Checks that every column type is usable on the given backend.
    pub fn validate_against(&self, server: &ServerInfo) -> Result<()> {
        let data_types = server.data_types();
        for hierarchy in self.hierarchies.values() {
            for (position, column) in hierarchy.columns.iter().enumerate() {
                if !data_types.contains(column.data_type) {
                    return Err(OrmError::SchemaError(format!(
                        "Column '{}' of '{}' uses type {} which '{}' does not support",
                        column.name,
                        self.type_info(hierarchy.root).name,
                        column.data_type,
                        server.name()
                    )));
                }
                if column.nullable
                    && !data_types.supports(column.data_type, DataTypeFeatures::NULLABLE)
                {
                    return Err(OrmError::SchemaError(format!(
                        "Column '{}' is nullable but '{}' has no nullable {}",
                        column.name,
                        server.name(),
                        column.data_type
                    )));
                }
                if hierarchy.key_columns.contains(&position)
                    && !data_types.supports(column.data_type, DataTypeFeatures::KEY_CONSTRAINT)
                {
                    return Err(OrmError::SchemaError(format!(
                        "Key column '{}' uses type {} which '{}' cannot use in keys",
                        column.name,
                        column.data_type,
                        server.name()
                    )));
                }
            }
        }
        Ok(())
    }
}
