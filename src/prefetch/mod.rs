// ============================================================================
// Prefetch Engine
// ============================================================================
//
// Loads entity fields and entity set items for many keys with few round
// trips:
//
//   prefetch(key, type, descriptors)      buffered as GraphContainer
//        │
//        ▼
//   execute_tasks ── pass 1: EntityGroupTask per (type, columns)
//        │                   EntitySetTask per (field, item limit)
//        │           pass 2: containers of referenced entities
//        ▼
//   one batch per pass (one query at a time without batch support)
//
// Rows are merged into the session state cache; keys without a row are
// marked as not found.
//
// ============================================================================

pub mod column_cache;
pub mod container;
pub mod descriptor;
pub(crate) mod fetcher;
pub mod manager;
pub mod tasks;

pub use column_cache::ColumnCache;
pub use container::GraphContainer;
pub use descriptor::PrefetchFieldDescriptor;
pub use manager::PrefetchManager;
pub use tasks::{EntityGroupTask, EntityGroupTaskKey, EntitySetTask, EntitySetTaskKey, TaskSet};
