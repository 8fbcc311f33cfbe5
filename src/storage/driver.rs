use crate::core::{IndexId, Result, Tuple, TypeId, Value};
use crate::model::DomainModel;
use crate::query::{ParameterContext, Provider};
use crate::range::RangeSet;
use crate::server_info::ServerInfoProvider;
use std::sync::Arc;

/// A single row-level change of one hierarchy table.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a complete row
    Insert { hierarchy: TypeId, row: Tuple },

    /// Overwrite the available slots of `values` in the row with key `key`
    Update {
        hierarchy: TypeId,
        key: Tuple,
        values: Tuple,
    },

    /// Delete the row with key `key`
    Delete { hierarchy: TypeId, key: Tuple },
}

impl Change {
    pub fn hierarchy(&self) -> TypeId {
        match self {
            Change::Insert { hierarchy, .. }
            | Change::Update { hierarchy, .. }
            | Change::Delete { hierarchy, .. } => *hierarchy,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Change::Insert { .. })
    }
}

/// Ordered changes applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Query bundled with its parameter values, executed later as part of a batch.
#[derive(Debug, Clone)]
pub struct DelayedQuery {
    pub provider: Arc<Provider>,
    pub parameters: ParameterContext,
}

impl DelayedQuery {
    pub fn new(provider: Arc<Provider>, parameters: ParameterContext) -> Self {
        Self { provider, parameters }
    }
}

pub trait QueryExecutor {
    fn execute(&self, provider: &Provider, parameters: &ParameterContext) -> Result<Vec<Tuple>>;

    /// Results of every query, in order.
    fn execute_batch(&self, queries: &[DelayedQuery]) -> Result<Vec<Vec<Tuple>>> {
        queries
            .iter()
            .map(|query| self.execute(&query.provider, &query.parameters))
            .collect()
    }
}

pub trait StatisticsProvider {
    /// Number of entries of an index.
    fn record_count(&self, index: IndexId) -> u64;

    /// Number of index entries whose key falls into `ranges`.
    fn count_in_ranges(&self, index: IndexId, ranges: &RangeSet<Tuple>) -> u64;
}

/// Everything the engine needs from a storage backend.
pub trait StorageDriver: QueryExecutor + StatisticsProvider + ServerInfoProvider {
    fn model(&self) -> &Arc<DomainModel>;

    fn apply(&self, changes: &ChangeSet) -> Result<()>;

    /// Permanent key value for a new entity of `hierarchy`.
    fn generate_key(&self, hierarchy: TypeId) -> Result<Value>;
}
