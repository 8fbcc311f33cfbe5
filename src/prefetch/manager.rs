use super::column_cache::ColumnCache;
use super::fetcher::{run_tasks, FetchContext};
use super::tasks::TaskSet;
use super::{GraphContainer, PrefetchFieldDescriptor};
use crate::config::PrefetchConfiguration;
use crate::core::{FieldId, Key, Result, TypeId};
use crate::model::FieldKind;
use crate::session::materialize::reference_key;
use crate::session::{EntitySetState, EntityStateCache};
use std::collections::HashSet;
use tracing::{debug, debug_span, trace};

type KeyResolutionListener = Box<dyn FnMut(&Key)>;

/// Collects prefetch requests and turns them into batched queries.
///
/// Requests are buffered as graph containers until `execute_tasks` runs.
/// Execution has two passes: the requested entities and entity sets first,
/// then the entities referenced by fields that asked for it.
pub struct PrefetchManager {
    config: PrefetchConfiguration,
    containers: Vec<GraphContainer>,
    registered: HashSet<GraphContainer>,
    next_cycle: Vec<GraphContainer>,
    column_cache: ColumnCache,
    listeners: Vec<KeyResolutionListener>,
}

impl PrefetchManager {
    pub fn new(config: &PrefetchConfiguration) -> Self {
        Self {
            config: config.clone(),
            containers: Vec::new(),
            registered: HashSet::new(),
            next_cycle: Vec::new(),
            column_cache: ColumnCache::new(config.column_cache_capacity),
            listeners: Vec::new(),
        }
    }

    /// Buffered containers awaiting execution.
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub fn should_flush(&self) -> bool {
        self.containers.len() >= self.config.max_container_count
    }

    pub fn column_cache(&self) -> &ColumnCache {
        &self.column_cache
    }

    /// Called with every key whose exact type is resolved by a fetch.
    pub fn subscribe_key_resolution(&mut self, listener: impl FnMut(&Key) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Buffers a request. Returns false for keys removed in the session.
    pub(crate) fn prefetch(
        &mut self,
        states: &EntityStateCache,
        key: &Key,
        type_id: TypeId,
        descriptors: &[PrefetchFieldDescriptor],
    ) -> bool {
        if states.get(key).is_some_and(|state| state.is_removed()) {
            return false;
        }
        let container = GraphContainer::new(key.clone(), type_id, descriptors.to_vec());
        if self.registered.insert(container.clone()) {
            trace!(%key, fields = descriptors.len(), "prefetch registered");
            self.containers.push(container);
        }
        true
    }

    /// Forgets buffered requests without executing them.
    pub fn clear(&mut self) {
        self.containers.clear();
        self.registered.clear();
        self.next_cycle.clear();
    }

    /// Executes every buffered request. On failure all pending state is
    /// dropped before the error is returned.
    pub(crate) fn execute_tasks(&mut self, context: &mut FetchContext<'_>) -> Result<()> {
        let containers = std::mem::take(&mut self.containers);
        self.registered.clear();
        if containers.is_empty() {
            return Ok(());
        }
        let _span = debug_span!("prefetch", containers = containers.len()).entered();
        match self.run_cycle(context, &containers) {
            Ok(()) => {
                self.containers = std::mem::take(&mut self.next_cycle);
                self.registered.extend(self.containers.iter().cloned());
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "prefetch failed");
                self.next_cycle.clear();
                Err(err)
            }
        }
    }

    fn run_cycle(
        &mut self,
        context: &mut FetchContext<'_>,
        containers: &[GraphContainer],
    ) -> Result<()> {
        let mut tasks = TaskSet::new();
        let mut referenced = Vec::new();
        for container in containers {
            self.resolve(context, container, &mut tasks, &mut referenced);
        }
        let resolved = run_tasks(context, &tasks, self.config.max_keys_per_query)?;
        self.on_resolved(context, containers, &resolved);

        let mut tasks = TaskSet::new();
        let mut targets = Vec::new();
        for (owner, field) in referenced {
            let field = context.model.field(field);
            let Some(target) = context
                .states
                .get(&owner)
                .and_then(|state| state.tuple())
                .and_then(|tuple| reference_key(context.model, field, tuple))
            else {
                continue;
            };
            let target = context.states.resolve(&target);
            let type_id = target.type_id();
            let descriptors = PrefetchFieldDescriptor::defaults(context.model, type_id);
            let container = GraphContainer::new(target, type_id, descriptors);
            self.resolve(context, &container, &mut tasks, &mut Vec::new());
            targets.push(container);
        }
        let resolved = run_tasks(context, &tasks, self.config.max_keys_per_query)?;
        self.on_resolved(context, &targets, &resolved);
        Ok(())
    }

    /// Adds the work a container still needs to `tasks`.
    fn resolve(
        &mut self,
        context: &mut FetchContext<'_>,
        container: &GraphContainer,
        tasks: &mut TaskSet,
        referenced: &mut Vec<(Key, FieldId)>,
    ) {
        let model = context.model;
        let key = &container.key;
        let state = context.states.get(key);
        if state.is_some_and(|s| s.is_removed() || s.is_not_found()) {
            return;
        }
        let known = context.states.resolve(key);
        let columns = self.column_cache.columns(model, container.type_id, &container.descriptors);
        let missing: Vec<usize> = columns
            .iter()
            .copied()
            .filter(|&column| !state.is_some_and(|s| s.is_available(column)))
            .collect();
        if !missing.is_empty() || state.is_none() || !known.is_exact_type() {
            tasks.add_key(container.type_id, missing, key.clone());
        }

        let is_new = state.is_some_and(|s| s.is_new());
        for descriptor in container.descriptors.iter() {
            let field = model.field(descriptor.field);
            match field.kind {
                FieldKind::Entity if descriptor.fetch_fields_of_referenced_entity => {
                    referenced.push((key.clone(), descriptor.field));
                }
                FieldKind::EntitySet if is_new => {
                    context.sets.get_or_insert(key, descriptor.field, EntitySetState::new_empty);
                }
                FieldKind::EntitySet => {
                    let limit = descriptor
                        .entity_set_item_limit
                        .or(self.config.default_entity_set_item_limit);
                    let set = context.sets.get(key, descriptor.field);
                    let loaded = set.is_some_and(|s| s.is_fully_loaded())
                        || limit.is_some_and(|n| set.is_some_and(|s| s.count() >= n));
                    if !loaded {
                        tasks.add_owner(descriptor.field, limit, key.clone());
                    }
                }
                _ => {}
            }
        }
    }

    /// Reports resolved keys and queues the fields of more derived types for
    /// the next cycle.
    fn on_resolved(
        &mut self,
        context: &FetchContext<'_>,
        containers: &[GraphContainer],
        resolved: &[Key],
    ) {
        if resolved.is_empty() {
            return;
        }
        let resolved: HashSet<&Key> = resolved.iter().collect();
        for key in &resolved {
            for listener in &mut self.listeners {
                listener(key);
            }
        }
        for container in containers {
            let Some(key) = resolved.get(&container.key) else {
                continue;
            };
            if key.type_id() != container.type_id {
                let descriptors = PrefetchFieldDescriptor::defaults(context.model, key.type_id());
                let next = GraphContainer::new((*key).clone(), key.type_id(), descriptors);
                trace!(key = %next.key, "derived type queued for next cycle");
                self.next_cycle.push(next);
            }
        }
    }
}

impl std::fmt::Debug for PrefetchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchManager")
            .field("containers", &self.containers.len())
            .field("next_cycle", &self.next_cycle.len())
            .field("column_cache", &self.column_cache.len())
            .finish()
    }
}
