use crate::core::DataType;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// What a backend can do with values of one data type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DataTypeFeatures: u32 {
        const NONE = 0;
        /// Columns of this type may hold NULL
        const NULLABLE = 1;
        /// Columns of this type may be part of an index key
        const INDEXING = 1 << 1;
        /// Columns of this type may be part of a primary key
        const KEY_CONSTRAINT = 1 << 2;
        /// Columns of this type may declare a default value
        const DEFAULT = 1 << 3;
        const ALL = Self::NULLABLE.bits()
            | Self::INDEXING.bits()
            | Self::KEY_CONSTRAINT.bits()
            | Self::DEFAULT.bits();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTypeInfo {
    pub data_type: DataType,
    pub native_name: String,
    pub features: DataTypeFeatures,
    pub max_length: Option<usize>,
}

impl DataTypeInfo {
    pub fn new(
        data_type: DataType,
        native_name: impl Into<String>,
        features: DataTypeFeatures,
    ) -> Self {
        Self {
            data_type,
            native_name: native_name.into(),
            features,
            max_length: None,
        }
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }
}

/// Supported primitive types of a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTypeCollection {
    types: HashMap<DataType, DataTypeInfo>,
}

impl DataTypeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every data type with all features enabled.
    pub fn complete() -> Self {
        let mut collection = Self::new();
        for (data_type, name) in [
            (DataType::Boolean, "boolean"),
            (DataType::Integer, "bigint"),
            (DataType::Float, "double precision"),
            (DataType::Text, "text"),
            (DataType::Guid, "uuid"),
        ] {
            collection.add(DataTypeInfo::new(data_type, name, DataTypeFeatures::ALL));
        }
        collection
    }

    pub fn add(&mut self, info: DataTypeInfo) {
        self.types.insert(info.data_type, info);
    }

    pub fn get(&self, data_type: DataType) -> Option<&DataTypeInfo> {
        self.types.get(&data_type)
    }

    pub fn contains(&self, data_type: DataType) -> bool {
        self.types.contains_key(&data_type)
    }

    pub fn supports(&self, data_type: DataType, features: DataTypeFeatures) -> bool {
        self.get(data_type)
            .is_some_and(|info| info.features.contains(features))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataTypeInfo> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_checks_features() {
        let mut collection = DataTypeCollection::new();
        let text = DataTypeInfo::new(DataType::Text, "varchar", DataTypeFeatures::NULLABLE);
        collection.add(text.max_length(4000));
        assert!(collection.supports(DataType::Text, DataTypeFeatures::NULLABLE));
        assert!(!collection.supports(DataType::Text, DataTypeFeatures::INDEXING));
        assert!(!collection.contains(DataType::Guid));
        assert_eq!(collection.get(DataType::Text).unwrap().max_length, Some(4000));
    }
}
