// ============================================================================
// Capability Descriptor Layer
// ============================================================================
//
// Static description of what a storage backend supports. Higher layers
// (optimizer, prefetch, query compiler, key generation) query it to decide
// which constructs they may emit. A `ServerInfo` is immutable once built.
//
// ============================================================================

pub mod data_types;
pub mod info;

pub use data_types::{DataTypeCollection, DataTypeFeatures, DataTypeInfo};
pub use info::{
    FunctionFeatures, IdentityFeatures, QueryFeatures, QueryInfo, ServerFeatures, ServerInfo,
    ServerInfoBuilder, ServerInfoProvider,
};
