use super::DataTypeCollection;
use crate::core::{DataType, OrmError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

bitflags! {
    /// Backend-level capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ServerFeatures: u32 {
        const NONE = 0;
        /// Several queries can be sent as one batch
        const BATCHES = 1;
        /// DDL statements participate in transactions
        const TRANSACTIONAL_DDL = 1 << 1;
        const SAVEPOINTS = 1 << 2;
    }
}

bitflags! {
    /// Query constructs the backend understands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct QueryFeatures: u32 {
        const NONE = 0;
        /// LIMIT / OFFSET style paging
        const PAGING = 1;
        /// Boolean columns and predicates can be used as plain expressions
        const FULL_BOOLEAN_EXPRESSIONS = 1 << 1;
        /// `(a, b) IN ((..), (..))`
        const MULTICOLUMN_IN = 1 << 2;
        const UNION = 1 << 3;
        const ROW_NUMBER = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct IdentityFeatures: u32 {
        const NONE = 0;
        /// Integer keys are generated by the backend on insert
        const AUTOINCREMENT = 1;
        const SEED = 1 << 1;
        const INCREMENT = 1 << 2;
    }
}

bitflags! {
    /// Scalar functions available in predicates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FunctionFeatures: u32 {
        const NONE = 0;
        const ABS = 1;
        const ROUND = 1 << 1;
        const POWER = 1 << 2;
        const SQRT = 1 << 3;
        const LOWER = 1 << 4;
        const UPPER = 1 << 5;
        const LENGTH = 1 << 6;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInfo {
    pub features: QueryFeatures,
    pub functions: FunctionFeatures,
    /// Maximum number of parameters of one statement
    pub max_query_parameter_count: usize,
}

/// Locked description of a backend.
///
/// Obtain one through [`ServerInfoBuilder::build`]; there is no way to mutate
/// it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    name: String,
    version: (u32, u32),
    features: ServerFeatures,
    query: QueryInfo,
    identity: IdentityFeatures,
    data_types: DataTypeCollection,
    max_identifier_length: usize,
}

impl ServerInfo {
    pub fn builder(name: impl Into<String>) -> ServerInfoBuilder {
        ServerInfoBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    pub fn features(&self) -> ServerFeatures {
        self.features
    }

    pub fn query(&self) -> &QueryInfo {
        &self.query
    }

    pub fn identity(&self) -> IdentityFeatures {
        self.identity
    }

    pub fn data_types(&self) -> &DataTypeCollection {
        &self.data_types
    }

    pub fn max_identifier_length(&self) -> usize {
        self.max_identifier_length
    }

    pub fn supports_batches(&self) -> bool {
        self.features.contains(ServerFeatures::BATCHES)
    }

    pub fn supports_paging(&self) -> bool {
        self.query.features.contains(QueryFeatures::PAGING)
    }

    pub fn supports_function(&self, function: FunctionFeatures) -> bool {
        self.query.functions.contains(function)
    }
}

pub struct ServerInfoBuilder {
    info: ServerInfo,
}

impl ServerInfoBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: (1, 0),
                features: ServerFeatures::NONE,
                query: QueryInfo {
                    features: QueryFeatures::NONE,
                    functions: FunctionFeatures::NONE,
                    max_query_parameter_count: 1024,
                },
                identity: IdentityFeatures::NONE,
                data_types: DataTypeCollection::new(),
                max_identifier_length: 63,
            },
        }
    }

    pub fn version(mut self, major: u32, minor: u32) -> Self {
        self.info.version = (major, minor);
        self
    }

    pub fn features(mut self, features: ServerFeatures) -> Self {
        self.info.features = features;
        self
    }

    pub fn query_features(mut self, features: QueryFeatures) -> Self {
        self.info.query.features = features;
        self
    }

    pub fn functions(mut self, functions: FunctionFeatures) -> Self {
        self.info.query.functions = functions;
        self
    }

    pub fn max_query_parameter_count(mut self, count: usize) -> Self {
        self.info.query.max_query_parameter_count = count;
        self
    }

    pub fn identity(mut self, identity: IdentityFeatures) -> Self {
        self.info.identity = identity;
        self
    }

    pub fn data_types(mut self, data_types: DataTypeCollection) -> Self {
        self.info.data_types = data_types;
        self
    }

    pub fn max_identifier_length(mut self, length: usize) -> Self {
        self.info.max_identifier_length = length;
        self
    }

    /// Validates and locks the description.
    pub fn build(self) -> Result<ServerInfo> {
        let info = self.info;
        if info.query.max_query_parameter_count == 0 {
            return Err(OrmError::SchemaError(format!(
                "Server '{}' must accept at least one query parameter",
                info.name
            )));
        }
        if !info.data_types.contains(DataType::Integer)
            && !info.data_types.contains(DataType::Guid)
        {
            return Err(OrmError::SchemaError(format!(
                "Server '{}' supports neither integer nor guid keys",
                info.name
            )));
        }
        Ok(info)
    }
}

/// Source of the capability description of a driver.
pub trait ServerInfoProvider {
    fn server_info(&self) -> Arc<ServerInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_locks_features() {
        let info = ServerInfo::builder("test")
            .version(2, 1)
            .features(ServerFeatures::BATCHES)
            .query_features(QueryFeatures::PAGING | QueryFeatures::UNION)
            .functions(FunctionFeatures::ABS)
            .data_types(DataTypeCollection::complete())
            .build()
            .unwrap();
        assert!(info.supports_batches());
        assert!(info.supports_paging());
        assert!(info.supports_function(FunctionFeatures::ABS));
        assert!(!info.supports_function(FunctionFeatures::POWER));
        assert_eq!(info.version(), (2, 1));
    }

    #[test]
    fn test_build_requires_key_types() {
        let result = ServerInfo::builder("empty").build();
        assert!(matches!(result, Err(OrmError::SchemaError(_))));
    }
}
