// ============================================================================
// memorm
// ============================================================================
//
// Object-relational mapping core over an in-memory storage driver.
//
//   model        entity types, hierarchies, fields, associations, indexes
//   query        provider trees, expressions, SQL text compilation
//   range        ranges and range sets over index keys
//   optimizer    range set extraction and secondary index selection
//   storage      driver traits and the in-memory backend
//   session      entity states, entity sets, persist
//   prefetch     batched loading of fields and entity sets
//   operations   registration scopes and replayable operation logs
//   references   tracking of non-paired references
//
// ============================================================================

pub mod config;
pub mod core;
pub mod domain;
pub mod model;
pub mod operations;
pub mod optimizer;
pub mod prefetch;
pub mod query;
pub mod range;
pub mod references;
pub mod server_info;
pub mod session;
pub mod storage;

pub use config::DomainConfiguration;
pub use crate::core::{DataType, Key, OrmError, Result, Tuple, Value};
pub use domain::Domain;
pub use model::{DomainBuilder, DomainModel};
pub use operations::{FieldValue, OperationLog};
pub use server_info::ServerInfo;
pub use session::Session;
pub use storage::MemoryStorage;
