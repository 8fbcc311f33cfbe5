use super::fetcher::FetchContext;
use crate::core::{AssociationId, FieldId, Key, OrmError, Result, Tuple, TypeId, Value};
use crate::model::{DomainModel, Multiplicity};
use crate::query::{Expr, ParameterContext, Provider};
use crate::server_info::{QueryFeatures, ServerInfo};
use crate::session::materialize::materialize_row;
use crate::session::EntitySetState;
use crate::storage::DelayedQuery;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Query of a task for one chunk of its keys.
pub(crate) struct ChunkQuery {
    pub query: DelayedQuery,
    pub keys: Vec<Key>,
}

/// Number of keys one query may carry.
fn chunk_size(server: &ServerInfo, max_keys_per_query: usize, key_width: usize) -> usize {
    let by_parameters = server.query().max_query_parameter_count / key_width.max(1);
    max_keys_per_query.min(by_parameters).max(1)
}

/// `columns` equal to the values of one of `keys`, bound as parameters.
fn key_predicate(columns: &[usize], keys: &[Key], parameters: &mut ParameterContext) -> Expr {
    let mut parameter = |i: usize, j: usize, key: &Key| {
        let name = format!("k{}_{}", i, j);
        parameters.set(name.clone(), key.value().get(j).cloned().unwrap_or(Value::Null));
        Expr::parameter(name)
    };
    if let [column] = columns {
        let list = keys.iter().enumerate().map(|(i, key)| parameter(i, 0, key)).collect();
        return Expr::column(*column).in_list(list);
    }
    Expr::any(keys.iter().enumerate().map(|(i, key)| {
        Expr::all(
            columns
                .iter()
                .enumerate()
                .map(|(j, &column)| Expr::column(column).eq(parameter(i, j, key))),
        )
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityGroupTaskKey {
    pub type_id: TypeId,
    /// Requested hierarchy columns, sorted
    pub columns: Vec<usize>,
}

/// Loads the same columns for many entities of one type.
#[derive(Debug)]
pub struct EntityGroupTask {
    key: EntityGroupTaskKey,
    keys: BTreeSet<Key>,
}

impl EntityGroupTask {
    pub fn new(key: EntityGroupTaskKey) -> Self {
        Self {
            key,
            keys: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &EntityGroupTaskKey {
        &self.key
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    pub fn add_key(&mut self, key: Key) {
        self.keys.insert(key);
    }

    /// System columns followed by the requested ones.
    fn output_columns(&self, model: &DomainModel) -> Vec<usize> {
        let mut columns = model.hierarchy(self.key.type_id).system_columns();
        columns.extend(self.key.columns.iter().copied());
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    pub(crate) fn queries(
        &self,
        model: &DomainModel,
        server: &ServerInfo,
        max_keys_per_query: usize,
    ) -> Vec<ChunkQuery> {
        let hierarchy = model.hierarchy(self.key.type_id);
        let output = self.output_columns(model);
        let keys: Vec<Key> = self.keys.iter().cloned().collect();
        keys.chunks(chunk_size(server, max_keys_per_query, hierarchy.key_columns.len()))
            .map(|chunk| {
                let mut parameters = ParameterContext::new();
                let predicate = key_predicate(&hierarchy.key_columns, chunk, &mut parameters);
                let provider = Provider::select(
                    Provider::filter(Provider::index(hierarchy.primary_index), predicate),
                    output.clone(),
                );
                ChunkQuery {
                    query: DelayedQuery::new(provider, parameters),
                    keys: chunk.to_vec(),
                }
            })
            .collect()
    }

    /// Materializes the rows of one chunk; keys without a row are marked as
    /// not found. Returns the keys whose exact type got resolved.
    pub(crate) fn process(
        &self,
        chunk: &[Key],
        rows: Vec<Tuple>,
        context: &mut FetchContext<'_>,
    ) -> Result<Vec<Key>> {
        let model = context.model;
        let width = model.hierarchy(self.key.type_id).column_count();
        let output = self.output_columns(model);
        let mut found = BTreeSet::new();
        let mut resolved = Vec::new();
        for row in rows {
            let row = Tuple::scatter(width, &output, &row);
            let materialized =
                materialize_row(model, context.states, context.references, self.key.type_id, row)?;
            if materialized.type_resolved {
                resolved.push(materialized.key.clone());
            }
            found.insert(materialized.key);
        }
        for key in chunk {
            if !found.contains(key) {
                context.states.mark_not_found(key.clone());
            }
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntitySetTaskKey {
    pub field: FieldId,
    pub item_limit: Option<usize>,
}

/// Where owners and items sit in the rows of an entity set query.
struct SetLayout {
    source: Arc<Provider>,
    owner_columns: Vec<usize>,
    item_columns: Vec<usize>,
    item_type: TypeId,
    /// Items are stored in a link table and tracked as references
    tracked: Option<AssociationId>,
}

/// Loads the items of one entity set field for many owners.
#[derive(Debug)]
pub struct EntitySetTask {
    key: EntitySetTaskKey,
    owners: BTreeSet<Key>,
}

impl EntitySetTask {
    pub fn new(key: EntitySetTaskKey) -> Self {
        Self {
            key,
            owners: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &EntitySetTaskKey {
        &self.key
    }

    pub fn owners(&self) -> impl Iterator<Item = &Key> {
        self.owners.iter()
    }

    pub fn add_owner(&mut self, owner: Key) {
        self.owners.insert(owner);
    }

    fn layout(
        &self,
        model: &DomainModel,
        predicate: impl FnOnce(&[usize]) -> Expr,
    ) -> Result<SetLayout> {
        let field = model.field(self.key.field);
        let association = field
            .association
            .map(|id| model.association(id))
            .ok_or_else(|| {
                OrmError::TypeMismatch(format!("Field '{}' is not an entity set", field.name))
            })?;
        let item_type = association.target_type;
        let items = model.hierarchy(item_type);
        match association.multiplicity {
            Multiplicity::OneToMany => {
                let reverse = association
                    .pair_to
                    .map(|id| model.association(id))
                    .ok_or_else(|| {
                        OrmError::SchemaError(format!(
                            "Entity set '{}' has no reverse field",
                            field.name
                        ))
                    })?;
                let owner_columns = model.field(reverse.owner_field).columns.clone();
                let source = Provider::filter(
                    Provider::index(items.primary_index),
                    predicate(&owner_columns),
                );
                Ok(SetLayout {
                    source,
                    owner_columns,
                    item_columns: (0..items.column_count()).collect(),
                    item_type,
                    tracked: None,
                })
            }
            Multiplicity::ZeroToMany | Multiplicity::ManyToMany => {
                let (aux, (master, slave)) = association
                    .auxiliary
                    .as_ref()
                    .zip(association.link_columns())
                    .ok_or_else(|| {
                        OrmError::SchemaError(format!(
                            "Entity set '{}' has no link table",
                            field.name
                        ))
                    })?;
                let link = model.hierarchy(aux.link_type);
                let links =
                    Provider::filter(Provider::index(link.primary_index), predicate(master));
                let equalities = slave
                    .iter()
                    .copied()
                    .zip(items.key_columns.iter().copied())
                    .collect();
                let offset = link.column_count();
                Ok(SetLayout {
                    source: Provider::join(links, Provider::index(items.primary_index), equalities),
                    owner_columns: master.to_vec(),
                    item_columns: (offset..offset + items.column_count()).collect(),
                    item_type,
                    tracked: (association.multiplicity == Multiplicity::ZeroToMany)
                        .then_some(association.id),
                })
            }
            other => Err(OrmError::TypeMismatch(format!(
                "Field '{}' with multiplicity {:?} is not an entity set",
                field.name, other
            ))),
        }
    }

    /// Item limit the backend can honor.
    fn effective_limit(&self, server: &ServerInfo) -> Option<usize> {
        self.key.item_limit.filter(|_| server.supports_paging())
    }

    pub(crate) fn queries(
        &self,
        model: &DomainModel,
        server: &ServerInfo,
        max_keys_per_query: usize,
    ) -> Result<Vec<ChunkQuery>> {
        let owner_type = model.field(self.key.field).declaring_type;
        let key_width = model.hierarchy(owner_type).key_columns.len();
        let limit = self.effective_limit(server);
        let per_group = server.query().features.contains(QueryFeatures::ROW_NUMBER);
        let chunk = match limit {
            Some(_) if !per_group => 1,
            _ => chunk_size(server, max_keys_per_query, key_width),
        };
        let owners: Vec<Key> = self.owners.iter().cloned().collect();
        owners
            .chunks(chunk)
            .map(|chunk| {
                let mut parameters = ParameterContext::new();
                let layout =
                    self.layout(model, |columns| key_predicate(columns, chunk, &mut parameters))?;
                let provider = match limit {
                    None => layout.source,
                    Some(count) => {
                        let order = layout
                            .owner_columns
                            .iter()
                            .chain(
                                layout
                                    .item_columns
                                    .iter()
                                    .take(key_width_of(model, layout.item_type)),
                            )
                            .map(|&c| (c, false))
                            .collect();
                        let sorted = Provider::sort(layout.source, order);
                        if per_group {
                            Provider::take_per_group(sorted, count, layout.owner_columns)
                        } else {
                            Provider::take(sorted, count)
                        }
                    }
                };
                Ok(ChunkQuery {
                    query: DelayedQuery::new(provider, parameters),
                    keys: chunk.to_vec(),
                })
            })
            .collect()
    }

    /// Merges the loaded items into the set states of the chunk owners.
    pub(crate) fn process(
        &self,
        chunk: &[Key],
        rows: Vec<Tuple>,
        context: &mut FetchContext<'_>,
    ) -> Result<Vec<Key>> {
        let model = context.model;
        let layout = self.layout(model, |_| Expr::literal(true))?;
        let owners: HashMap<Tuple, &Key> = chunk.iter().map(|k| (k.value().clone(), k)).collect();
        let mut items: BTreeMap<&Key, Vec<Key>> = chunk.iter().map(|k| (k, Vec::new())).collect();
        let mut resolved = Vec::new();
        for row in rows {
            let Some(&owner) = owners.get(&row.project(&layout.owner_columns)) else {
                continue;
            };
            let item_row = row.project(&layout.item_columns);
            let materialized = materialize_row(
                model,
                context.states,
                context.references,
                layout.item_type,
                item_row,
            )?;
            if materialized.type_resolved {
                resolved.push(materialized.key.clone());
            }
            if let Some(association) = layout.tracked {
                context.references.register_silently(association, owner, &materialized.key);
            }
            items.entry(owner).or_default().push(materialized.key);
        }
        let limit = self.effective_limit(context.server);
        for (owner, loaded) in items {
            let fully_loaded = limit.is_none_or(|count| loaded.len() < count);
            context
                .sets
                .get_or_insert(owner, self.key.field, EntitySetState::unloaded)
                .merge_loaded(loaded, fully_loaded);
        }
        Ok(resolved)
    }
}

fn key_width_of(model: &DomainModel, type_id: TypeId) -> usize {
    model.hierarchy(type_id).key_columns.len()
}

/// Tasks collected during one pass, deduplicated by their keys.
#[derive(Debug, Default)]
pub struct TaskSet {
    groups: BTreeMap<EntityGroupTaskKey, EntityGroupTask>,
    sets: BTreeMap<EntitySetTaskKey, EntitySetTask>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.sets.is_empty()
    }

    pub fn group_tasks(&self) -> impl Iterator<Item = &EntityGroupTask> {
        self.groups.values()
    }

    pub fn set_tasks(&self) -> impl Iterator<Item = &EntitySetTask> {
        self.sets.values()
    }

    pub fn add_key(&mut self, type_id: TypeId, columns: Vec<usize>, key: Key) {
        let task_key = EntityGroupTaskKey { type_id, columns };
        self.groups
            .entry(task_key.clone())
            .or_insert_with(|| EntityGroupTask::new(task_key))
            .add_key(key);
    }

    pub fn add_owner(&mut self, field: FieldId, item_limit: Option<usize>, owner: Key) {
        let task_key = EntitySetTaskKey { field, item_limit };
        self.sets
            .entry(task_key)
            .or_insert_with(|| EntitySetTask::new(task_key))
            .add_owner(owner);
    }
}
