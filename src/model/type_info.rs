use crate::core::{DataType, FieldId, IndexId, TypeId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Entity,
    Structure,
    /// Generated link type of a set association
    Auxiliary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

/// Shared storage layout of all types of one hierarchy:
/// `[key columns..., type id column, other columns...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyInfo {
    pub root: TypeId,
    pub types: Vec<TypeId>,
    pub columns: Vec<ColumnInfo>,
    pub key_columns: Vec<usize>,
    pub type_id_column: usize,
    pub primary_index: IndexId,
    pub indexes: Vec<IndexId>,
}

impl HierarchyInfo {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Key columns followed by the type id column.
    pub fn system_columns(&self) -> Vec<usize> {
        let mut columns = self.key_columns.clone();
        columns.push(self.type_id_column);
        columns
    }

    pub fn key_types(&self) -> Vec<DataType> {
        self.key_columns
            .iter()
            .map(|&c| self.columns[c].data_type)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: String,
    pub kind: TypeKind,
    pub parent: Option<TypeId>,
    /// Hierarchy root; a structure is its own root
    pub hierarchy: TypeId,
    /// Direct and indirect descendants
    pub descendants: Vec<TypeId>,
    /// All fields including inherited and nested structure fields
    pub fields: Vec<FieldId>,
    pub field_names: HashMap<String, FieldId>,
    /// Hierarchy columns used by this type, ascending
    pub columns: Vec<usize>,
    pub version_field: Option<FieldId>,
}

impl TypeInfo {
    pub fn is_entity(&self) -> bool {
        matches!(self.kind, TypeKind::Entity | TypeKind::Auxiliary)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.field_names.get(name).copied()
    }

    pub fn is_ancestor_of(&self, other: TypeId) -> bool {
        self.id == other || self.descendants.contains(&other)
    }
}
