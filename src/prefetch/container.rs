use super::PrefetchFieldDescriptor;
use crate::core::{Key, TypeId};
use std::sync::Arc;

/// Prefetch request for one key: which fields of which type to load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphContainer {
    pub key: Key,
    pub type_id: TypeId,
    pub descriptors: Arc<[PrefetchFieldDescriptor]>,
}

impl GraphContainer {
    pub fn new(
        key: Key,
        type_id: TypeId,
        descriptors: impl Into<Arc<[PrefetchFieldDescriptor]>>,
    ) -> Self {
        Self {
            key,
            type_id,
            descriptors: descriptors.into(),
        }
    }
}
