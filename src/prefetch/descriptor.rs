use crate::core::{FieldId, Result, TypeId};
use crate::model::DomainModel;
use serde::{Deserialize, Serialize};

/// Field to load during prefetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrefetchFieldDescriptor {
    pub field: FieldId,
    /// For reference fields: also load the default fields of the target
    pub fetch_fields_of_referenced_entity: bool,
    /// For entity set fields: load at most this many items per owner
    pub entity_set_item_limit: Option<usize>,
}

impl PrefetchFieldDescriptor {
    pub fn new(field: FieldId) -> Self {
        Self {
            field,
            fetch_fields_of_referenced_entity: false,
            entity_set_item_limit: None,
        }
    }

    pub fn with_referenced_entity(mut self) -> Self {
        self.fetch_fields_of_referenced_entity = true;
        self
    }

    pub fn with_item_limit(mut self, limit: usize) -> Self {
        self.entity_set_item_limit = Some(limit);
        self
    }

    /// Descriptors of the default fields of `type_id`.
    pub fn defaults(model: &DomainModel, type_id: TypeId) -> Vec<Self> {
        model.default_fields(type_id).into_iter().map(Self::new).collect()
    }

    /// Descriptors of the named fields of `type_id`.
    pub fn for_fields(model: &DomainModel, type_id: TypeId, names: &[&str]) -> Result<Vec<Self>> {
        names
            .iter()
            .map(|name| model.field_of(type_id, name).map(|f| Self::new(f.id)))
            .collect()
    }
}
