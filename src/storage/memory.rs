use super::{
    Change, ChangeSet, DelayedQuery, ProviderExecutor, QueryExecutor, StatisticsProvider,
    StorageDriver, Table,
};
use crate::core::{DataType, IndexId, OrmError, Result, Tuple, TypeId, Value};
use crate::model::DomainModel;
use crate::query::{ParameterContext, Provider};
use crate::range::RangeSet;
use crate::server_info::{ServerInfo, ServerInfoProvider};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

/// In-memory storage backend.
///
/// One table per hierarchy, guarded by a single `RwLock`; sessions share the
/// storage through `Arc`. Query and batch counters make round trips
/// observable.
pub struct MemoryStorage {
    model: Arc<DomainModel>,
    server: Arc<ServerInfo>,
    tables: RwLock<HashMap<TypeId, Table>>,
    sequences: Mutex<HashMap<TypeId, i64>>,
    queries: AtomicUsize,
    batches: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(model: Arc<DomainModel>, server: Arc<ServerInfo>) -> Result<Self> {
        model.validate_against(&server)?;
        let tables = model
            .hierarchies()
            .map(|hierarchy| {
                let indexes = hierarchy.indexes.iter().map(|&i| model.index(i).clone());
                (hierarchy.root, Table::new(hierarchy, indexes))
            })
            .collect();
        Ok(Self {
            model,
            server,
            tables: RwLock::new(tables),
            sequences: Mutex::new(HashMap::new()),
            queries: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        })
    }

    /// Queries executed so far, batched or not.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// Round trips: single queries plus batches.
    pub fn round_trip_count(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
    }

    pub fn row_count(&self, hierarchy: TypeId) -> Result<usize> {
        let tables = self.tables.read()?;
        Ok(tables.get(&hierarchy).map_or(0, Table::row_count))
    }

    /// Row stored under `key` in the table of `hierarchy`.
    pub fn get_row(&self, hierarchy: TypeId, key: &Tuple) -> Result<Option<Tuple>> {
        let tables = self.tables.read()?;
        Ok(tables.get(&hierarchy).and_then(|t| t.get(key)).cloned())
    }

    /// Inserts rows directly, bypassing sessions.
    pub fn seed(&self, hierarchy: TypeId, rows: impl IntoIterator<Item = Tuple>) -> Result<()> {
        let mut changes = ChangeSet::new();
        for row in rows {
            changes.push(Change::Insert { hierarchy, row });
        }
        self.apply(&changes)
    }

    fn run(
        &self,
        tables: &HashMap<TypeId, Table>,
        provider: &Provider,
        parameters: &ParameterContext,
    ) -> Result<Vec<Tuple>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let rows =
            ProviderExecutor::new(&self.model, &self.server, tables, parameters).execute(provider)?;
        trace!(provider = provider.name(), rows = rows.len(), "query executed");
        Ok(rows)
    }
}

impl QueryExecutor for MemoryStorage {
    fn execute(&self, provider: &Provider, parameters: &ParameterContext) -> Result<Vec<Tuple>> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read()?;
        self.run(&tables, provider, parameters)
    }

    fn execute_batch(&self, queries: &[DelayedQuery]) -> Result<Vec<Vec<Tuple>>> {
        if queries.len() > 1 && !self.server.supports_batches() {
            return Err(OrmError::UnsupportedOperation(format!(
                "'{}' does not support query batches",
                self.server.name()
            )));
        }
        self.batches.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read()?;
        queries
            .iter()
            .map(|query| self.run(&tables, &query.provider, &query.parameters))
            .collect()
    }
}

impl StatisticsProvider for MemoryStorage {
    fn record_count(&self, index: IndexId) -> u64 {
        let info = self.model.index(index);
        match self.tables.read() {
            Ok(tables) => tables.get(&info.hierarchy).map_or(0, |t| t.count(info, None)),
            Err(_) => 0,
        }
    }

    fn count_in_ranges(&self, index: IndexId, ranges: &RangeSet<Tuple>) -> u64 {
        let info = self.model.index(index);
        match self.tables.read() {
            Ok(tables) => tables.get(&info.hierarchy).map_or(0, |t| t.count(info, Some(ranges))),
            Err(_) => 0,
        }
    }
}

impl ServerInfoProvider for MemoryStorage {
    fn server_info(&self) -> Arc<ServerInfo> {
        Arc::clone(&self.server)
    }
}

impl StorageDriver for MemoryStorage {
    fn model(&self) -> &Arc<DomainModel> {
        &self.model
    }

    /// Applies all changes or none of them.
    fn apply(&self, changes: &ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write()?;
        let mut staged: HashMap<TypeId, Table> = HashMap::new();
        for change in changes.iter() {
            let hierarchy = change.hierarchy();
            if !staged.contains_key(&hierarchy) {
                let table = tables
                    .get(&hierarchy)
                    .cloned()
                    .ok_or_else(|| {
                        OrmError::ExecutionError(format!("No table for hierarchy {}", hierarchy))
                    })?;
                staged.insert(hierarchy, table);
            }
            let Some(table) = staged.get_mut(&hierarchy) else {
                continue;
            };
            match change {
                Change::Insert { row, .. } => table.insert(row.clone())?,
                Change::Update { key, values, .. } => table.update(key, values)?,
                Change::Delete { key, .. } => table.delete(key)?,
            }
        }
        debug!(changes = changes.len(), tables = staged.len(), "change set applied");
        tables.extend(staged);
        Ok(())
    }

    fn generate_key(&self, hierarchy: TypeId) -> Result<Value> {
        let key_types = self.model.hierarchy(hierarchy).key_types();
        match key_types.as_slice() {
            [DataType::Integer] => {
                let mut sequences = self.sequences.lock()?;
                let next = match sequences.get(&hierarchy) {
                    Some(last) => last + 1,
                    None => {
                        let tables = self.tables.read()?;
                        let max = tables
                            .get(&hierarchy)
                            .and_then(|t| t.max_key())
                            .and_then(|key| key.get(0).and_then(Value::as_i64))
                            .unwrap_or(0);
                        max.max(0) + 1
                    }
                };
                sequences.insert(hierarchy, next);
                Ok(Value::Integer(next))
            }
            [DataType::Guid] => Ok(Value::Guid(Uuid::new_v4())),
            other => Err(OrmError::UnsupportedOperation(format!(
                "Cannot generate keys of type {:?} for {}",
                other, hierarchy
            ))),
        }
    }
}
