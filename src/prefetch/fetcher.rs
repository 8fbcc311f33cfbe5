use super::tasks::{ChunkQuery, TaskSet};
use crate::core::{Key, Result, Tuple};
use crate::model::DomainModel;
use crate::optimizer::IndexOptimizer;
use crate::references::ReferenceRegistry;
use crate::server_info::ServerInfo;
use crate::session::{EntitySetCache, EntityStateCache};
use crate::storage::{DelayedQuery, StorageDriver};
use tracing::{debug, trace};

/// Parts of a session that fetching reads and fills.
pub(crate) struct FetchContext<'a> {
    pub model: &'a DomainModel,
    pub storage: &'a dyn StorageDriver,
    pub server: &'a ServerInfo,
    pub optimizer: &'a IndexOptimizer,
    pub states: &'a mut EntityStateCache,
    pub sets: &'a mut EntitySetCache,
    pub references: &'a mut ReferenceRegistry,
}

enum Pending<'t> {
    Group(&'t super::EntityGroupTask),
    Set(&'t super::EntitySetTask),
}

/// Runs all queries of a task set as one round trip when the backend
/// accepts batches, one query at a time otherwise. Returns the keys whose
/// exact type got resolved.
pub(crate) fn run_tasks(
    context: &mut FetchContext<'_>,
    tasks: &TaskSet,
    max_keys_per_query: usize,
) -> Result<Vec<Key>> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let mut pending: Vec<(Pending<'_>, ChunkQuery)> = Vec::new();
    for task in tasks.group_tasks() {
        for chunk in task.queries(context.model, context.server, max_keys_per_query) {
            pending.push((Pending::Group(task), chunk));
        }
    }
    for task in tasks.set_tasks() {
        for chunk in task.queries(context.model, context.server, max_keys_per_query)? {
            pending.push((Pending::Set(task), chunk));
        }
    }

    let queries: Vec<DelayedQuery> = pending
        .iter()
        .map(|(_, chunk)| {
            let provider = context.optimizer.optimize(
                &chunk.query.provider,
                context.storage,
                context.server,
                Some(&chunk.query.parameters),
            );
            DelayedQuery::new(provider, chunk.query.parameters.clone())
        })
        .collect();
    debug!(
        queries = queries.len(),
        batched = context.server.supports_batches(),
        "executing prefetch tasks"
    );
    let results = execute(context, &queries)?;

    let mut resolved = Vec::new();
    for ((task, chunk), rows) in pending.iter().zip(results) {
        trace!(keys = chunk.keys.len(), rows = rows.len(), "processing task chunk");
        let keys = match task {
            Pending::Group(task) => task.process(&chunk.keys, rows, context)?,
            Pending::Set(task) => task.process(&chunk.keys, rows, context)?,
        };
        resolved.extend(keys);
    }
    Ok(resolved)
}

fn execute(context: &FetchContext<'_>, queries: &[DelayedQuery]) -> Result<Vec<Vec<Tuple>>> {
    if context.server.supports_batches() {
        return context.storage.execute_batch(queries);
    }
    queries
        .iter()
        .map(|query| context.storage.execute(&query.provider, &query.parameters))
        .collect()
}
