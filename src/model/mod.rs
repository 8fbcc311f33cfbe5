// ============================================================================
// Schema Model
// ============================================================================
//
// Static metadata consumed by the engine: persistent types and their
// hierarchies, flattened fields with their column mapping, indexes and
// associations. The model is built once by `DomainBuilder` and read-only
// afterwards.
//
// ============================================================================

pub mod association;
pub mod builder;
pub mod domain;
pub mod field_info;
pub mod index_info;
pub mod type_info;

pub use association::{AssociationInfo, AuxiliaryInfo, Multiplicity};
pub use builder::{DomainBuilder, StructureDef, TypeDef};
pub use domain::DomainModel;
pub use field_info::{FieldInfo, FieldKind};
pub use index_info::{IndexAttributes, IndexInfo};
pub use type_info::{ColumnInfo, HierarchyInfo, TypeInfo, TypeKind};
