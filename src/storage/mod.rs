// ============================================================================
// Storage Boundary
// ============================================================================
//
// Traits the engine consumes from a backend (query execution, statistics,
// capabilities, change application and key generation) and the in-memory
// backend that implements them over per-hierarchy tables.
//
// ============================================================================

pub mod driver;
pub mod executor;
pub mod memory;
pub mod table;

pub use driver::{Change, ChangeSet, DelayedQuery, QueryExecutor, StatisticsProvider, StorageDriver};
pub use executor::ProviderExecutor;
pub use memory::MemoryStorage;
pub use table::Table;
