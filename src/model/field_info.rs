use crate::core::{AssociationId, DataType, FieldId, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Primitive,
    /// Reference to another entity, stored as the target key columns
    Entity,
    /// Nested value object, flattened into its leaf columns
    Structure,
    /// Collection of entities, stored outside of the owner row
    EntitySet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub id: FieldId,
    /// Dotted path from the entity, e.g. `Address.Geo.Country`
    pub name: String,
    pub declaring_type: TypeId,
    pub kind: FieldKind,
    pub data_type: Option<DataType>,
    /// Hierarchy columns of the field; all leaf columns for structures
    pub columns: Vec<usize>,
    /// Referenced entity type, set item type or structure type
    pub value_type: Option<TypeId>,
    pub association: Option<AssociationId>,
    pub parent: Option<FieldId>,
    pub children: Vec<FieldId>,
    pub is_primary_key: bool,
    pub is_lazy_load: bool,
    pub is_nullable: bool,
    pub is_version: bool,
}

impl FieldInfo {
    pub fn is_primitive(&self) -> bool {
        self.kind == FieldKind::Primitive
    }

    pub fn is_entity(&self) -> bool {
        self.kind == FieldKind::Entity
    }

    pub fn is_structure(&self) -> bool {
        self.kind == FieldKind::Structure
    }

    pub fn is_entity_set(&self) -> bool {
        self.kind == FieldKind::EntitySet
    }

    /// Leaf name relative to the parent structure.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}
