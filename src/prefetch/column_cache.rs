use super::PrefetchFieldDescriptor;
use crate::core::{FieldId, TypeId};
use crate::model::{DomainModel, FieldKind};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Hierarchy columns needed for a set of descriptors, cached per type and
/// field list.
pub struct ColumnCache {
    entries: LruCache<(TypeId, Vec<FieldId>), Arc<[usize]>>,
}

impl ColumnCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted columns of the stored fields among `descriptors`. Entity sets
    /// contribute nothing.
    pub fn columns(
        &mut self,
        model: &DomainModel,
        type_id: TypeId,
        descriptors: &[PrefetchFieldDescriptor],
    ) -> Arc<[usize]> {
        let mut fields: Vec<FieldId> = descriptors.iter().map(|d| d.field).collect();
        fields.sort();
        fields.dedup();
        let cache_key = (type_id, fields);
        if let Some(columns) = self.entries.get(&cache_key) {
            return Arc::clone(columns);
        }
        let mut columns: Vec<usize> = cache_key
            .1
            .iter()
            .map(|&id| model.field(id))
            .filter(|field| field.kind != FieldKind::EntitySet)
            .flat_map(|field| field.columns.iter().copied())
            .collect();
        columns.sort_unstable();
        columns.dedup();
        let columns: Arc<[usize]> = columns.into();
        self.entries.put(cache_key, Arc::clone(&columns));
        columns
    }
}
