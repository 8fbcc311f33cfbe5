use crate::core::{IndexId, TypeId};
use crate::query::Expr;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct IndexAttributes: u32 {
        const NONE = 0;
        const PRIMARY = 1;
        const SECONDARY = 1 << 1;
        const UNIQUE = 1 << 2;
        /// Only rows matching the index filter are indexed
        const FILTERED = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub id: IndexId,
    pub name: String,
    pub hierarchy: TypeId,
    pub declaring_type: TypeId,
    /// Hierarchy columns forming the index key, in key order. Secondary
    /// indexes end with the primary key columns they do not already contain.
    pub key_columns: Vec<usize>,
    /// Hierarchy columns stored next to the key
    pub value_columns: Vec<usize>,
    pub attributes: IndexAttributes,
    pub filter: Option<Expr>,
}

impl IndexInfo {
    pub fn is_primary(&self) -> bool {
        self.attributes.contains(IndexAttributes::PRIMARY)
    }

    pub fn is_secondary(&self) -> bool {
        self.attributes.contains(IndexAttributes::SECONDARY)
    }

    pub fn is_filtered(&self) -> bool {
        self.attributes.contains(IndexAttributes::FILTERED)
    }

    /// Hierarchy columns in the order an index scan returns them.
    pub fn output_columns(&self) -> Vec<usize> {
        self.key_columns
            .iter()
            .chain(self.value_columns.iter())
            .copied()
            .collect()
    }

    /// Position of a hierarchy column inside the index key.
    pub fn key_position(&self, column: usize) -> Option<usize> {
        self.key_columns.iter().position(|&c| c == column)
    }
}
