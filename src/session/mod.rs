// ============================================================================
// Session
// ============================================================================
//
// Unit of work over one storage driver. A session owns:
//
//   EntityStateCache    one state per key, partial tuples merged additively
//   EntitySetCache      loaded items and local changes of entity sets
//   ReferenceRegistry   incoming non-paired references
//   OperationRegistry   registration scopes around every mutation
//   PrefetchManager     buffered, batched loading
//
// Changes stay local until `persist`, which replaces temporary keys with
// storage keys and applies one change set.
//
// ============================================================================

pub mod entity_set;
pub mod entity_state;
mod fields;
pub mod key_generator;
mod lookup;
pub(crate) mod materialize;
mod persist;
mod sets;
pub mod state_cache;

pub use entity_set::{EntitySetCache, EntitySetState};
pub use entity_state::{EntityState, PersistenceState};
pub use key_generator::KeyGenerator;
pub use state_cache::EntityStateCache;

use crate::config::DomainConfiguration;
use crate::core::{FieldId, Key, OrmError, Result, Tuple, TypeId, Value};
use crate::model::{DomainModel, FieldKind};
use crate::operations::{
    FieldValue, ListenerId, Operation, OperationEvents, OperationKind, OperationLog,
    OperationRegistry, OperationType,
};
use crate::optimizer::IndexOptimizer;
use crate::prefetch::{PrefetchFieldDescriptor, PrefetchManager};
use crate::query::{CompiledQuery, Expr, ParameterContext, Provider, SqlCompiler};
use crate::references::ReferenceRegistry;
use crate::server_info::ServerInfo;
use crate::storage::StorageDriver;
use materialize::materialize_row;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// Builds a `FetchContext` over the disjoint parts of a session.
macro_rules! fetch_context {
    ($session:expr) => {
        $crate::prefetch::fetcher::FetchContext {
            model: &$session.model,
            storage: $session.storage.as_ref(),
            server: &$session.server,
            optimizer: &$session.optimizer,
            states: &mut $session.states,
            sets: &mut $session.sets,
            references: &mut $session.references,
        }
    };
}
pub(crate) use fetch_context;

/// Operations recorded between [`Session::begin_capture`] and
/// [`Session::end_capture`].
pub struct OperationCapture {
    listener: ListenerId,
    log: Rc<RefCell<OperationLog>>,
}

pub struct Session {
    model: Arc<DomainModel>,
    storage: Arc<dyn StorageDriver>,
    server: Arc<ServerInfo>,
    optimizer: Arc<IndexOptimizer>,
    config: DomainConfiguration,
    states: EntityStateCache,
    sets: EntitySetCache,
    references: ReferenceRegistry,
    operations: OperationRegistry,
    prefetch: PrefetchManager,
    keys: KeyGenerator,
    /// Temporary keys replaced by persist
    key_mapping: HashMap<Key, Key>,
}

impl Session {
    pub fn new(
        storage: Arc<dyn StorageDriver>,
        optimizer: Arc<IndexOptimizer>,
        config: DomainConfiguration,
    ) -> Self {
        Self {
            model: Arc::clone(storage.model()),
            server: storage.server_info(),
            storage,
            optimizer,
            prefetch: PrefetchManager::new(&config.prefetch),
            config,
            states: EntityStateCache::new(),
            sets: EntitySetCache::new(),
            references: ReferenceRegistry::new(),
            operations: OperationRegistry::new(),
            keys: KeyGenerator::new(),
            key_mapping: HashMap::new(),
        }
    }

    pub fn model(&self) -> &Arc<DomainModel> {
        &self.model
    }

    pub fn storage(&self) -> &Arc<dyn StorageDriver> {
        &self.storage
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    pub fn config(&self) -> &DomainConfiguration {
        &self.config
    }

    pub fn states(&self) -> &EntityStateCache {
        &self.states
    }

    pub fn entity_sets(&self) -> &EntitySetCache {
        &self.sets
    }

    pub fn references(&self) -> &ReferenceRegistry {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut ReferenceRegistry {
        &mut self.references
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub fn operations_mut(&mut self) -> &mut OperationRegistry {
        &mut self.operations
    }

    pub fn prefetch_manager(&self) -> &PrefetchManager {
        &self.prefetch
    }

    pub fn prefetch_manager_mut(&mut self) -> &mut PrefetchManager {
        &mut self.prefetch
    }

    pub fn state(&self, key: &Key) -> Option<&EntityState> {
        self.states.get(&self.remapped_key(key))
    }

    /// Current key of `key`: temporary keys replaced by persist map to their
    /// storage key.
    pub fn remapped_key(&self, key: &Key) -> Key {
        if key.is_temporary()
            && let Some(mapped) = self.key_mapping.get(key)
        {
            return mapped.clone();
        }
        key.clone()
    }

    /// Current key with the best known type.
    fn canonical(&self, key: &Key) -> Key {
        self.states.resolve(&self.remapped_key(key))
    }

    // ------------------------------------------------------------------
    // Operation scopes
    // ------------------------------------------------------------------

    /// Runs `body` inside a registration scope of `kind`. The scope is
    /// discarded when `body` fails.
    pub(crate) fn run_operation<T>(
        &mut self,
        kind: OperationType,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let handle = self.operations.begin_registration(kind);
        let result = body(self);
        let closed = self.operations.close(handle, result.is_ok());
        let value = result?;
        closed?;
        Ok(value)
    }

    fn start_operation(&mut self, kind: impl FnOnce() -> OperationKind) -> Result<()> {
        if self.operations.is_registering() {
            self.operations.register_operation(Operation::new(kind()))?;
        }
        self.operations.notify_operation_starting(true)
    }

    fn register_undo(&mut self, kind: impl FnOnce() -> OperationKind) -> Result<()> {
        if self.operations.is_registering() {
            self.operations.register_undo_operation(Operation::new(kind()))?;
        }
        Ok(())
    }

    /// Starts collecting outermost operations into a log.
    pub fn begin_capture(&mut self) -> OperationCapture {
        let log = Rc::new(RefCell::new(OperationLog::new()));
        let sink = Rc::clone(&log);
        let listener = self
            .operations
            .subscribe(OperationEvents::OUTERMOST_COMPLETED, move |event| {
                sink.borrow_mut().push(event.operation().clone());
            });
        OperationCapture { listener, log }
    }

    pub fn end_capture(&mut self, capture: OperationCapture) -> OperationLog {
        self.operations.unsubscribe(capture.listener);
        capture.log.take()
    }

    /// Records `body` as one composite operation.
    pub fn call_method<T>(
        &mut self,
        name: &str,
        arguments: Vec<Value>,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.run_operation(OperationType::USER, |session| {
            session.start_operation(|| OperationKind::MethodCall {
                name: name.to_string(),
                arguments,
            })?;
            body(session)
        })
    }

    // ------------------------------------------------------------------
    // Entity lifecycle
    // ------------------------------------------------------------------

    /// Key for a new entity of `type_id`, temporary when the backend assigns
    /// identities itself.
    pub fn generate_key(&mut self, type_id: TypeId) -> Result<Key> {
        self.run_operation(OperationType::USER, |session| {
            let mut key = session
                .keys
                .generate(&session.model, &session.server, session.storage.as_ref(), type_id)?;
            // skip temporary values taken by entities already in the session
            while key.is_temporary() && session.states.get(&key).is_some() {
                key = session
                    .keys
                    .generate(&session.model, &session.server, session.storage.as_ref(), type_id)?;
            }
            session.start_operation(|| OperationKind::KeyGenerate { key: key.clone() })?;
            Ok(key)
        })
    }

    pub fn create(&mut self, type_id: TypeId) -> Result<Key> {
        self.run_operation(OperationType::USER, |session| {
            let key = session.generate_key(type_id)?;
            session.start_operation(|| OperationKind::EntityCreate { key: key.clone() })?;
            session.create_state(&key, false)?;
            session.register_undo(|| OperationKind::EntitiesRemove { keys: vec![key.clone()] })?;
            Ok(key)
        })
    }

    /// Creates an entity with a caller-supplied key.
    pub fn create_with_key(&mut self, key: Key) -> Result<Key> {
        let key = self.remapped_key(&key);
        self.run_operation(OperationType::USER, |session| {
            session.start_operation(|| OperationKind::EntityCreate { key: key.clone() })?;
            session.create_state(&key, !key.is_temporary())?;
            session.register_undo(|| OperationKind::EntitiesRemove { keys: vec![key.clone()] })?;
            Ok(key)
        })
    }

    /// Creates an entity and assigns its initial field values.
    pub fn initialize(
        &mut self,
        type_id: TypeId,
        values: Vec<(String, FieldValue)>,
    ) -> Result<Key> {
        self.run_operation(OperationType::USER, |session| {
            let key = session.generate_key(type_id)?;
            session.start_operation(|| OperationKind::EntityInitialize { key: key.clone() })?;
            let key = session.create_with_key(key)?;
            for (name, value) in values {
                session.set_field(&key, &name, value)?;
            }
            Ok(key)
        })
    }

    fn create_state(&mut self, key: &Key, check_storage: bool) -> Result<()> {
        let model = Arc::clone(&self.model);
        let info = model.try_type_info(key.type_id())?;
        if !info.is_entity() {
            return Err(OrmError::TypeMismatch(format!("Type '{}' is not an entity", info.name)));
        }
        let key = key.with_exact_type(key.type_id());
        match self.states.get(&key) {
            Some(state) if state.is_removed() => return Err(OrmError::EntityRemoved(key)),
            Some(state) if !state.is_not_found() => return Err(OrmError::EntityExists(key)),
            Some(_) => {}
            None if check_storage => {
                self.prefetch.prefetch(&self.states, &key, key.type_id(), &[]);
                self.execute_tasks(true)?;
                if self.states.get(&key).is_some_and(|state| !state.is_not_found()) {
                    return Err(OrmError::EntityExists(key));
                }
            }
            None => {}
        }

        let hierarchy = model.hierarchy(key.type_id());
        let mut tuple = Tuple::from_values(vec![Value::Null; hierarchy.column_count()]);
        for (position, &column) in hierarchy.key_columns.iter().enumerate() {
            tuple.set(column, key.value().get(position).cloned().unwrap_or(Value::Null));
        }
        tuple.set(hierarchy.type_id_column, Value::Integer(i64::from(key.type_id().0)));
        if let Some(version) = info.version_field {
            for &column in &model.field(version).columns {
                tuple.set(column, Value::Integer(1));
            }
        }
        trace!(%key, "entity created");
        self.states.insert_new(key, tuple);
        Ok(())
    }

    /// Removes entities. Fails without changes when other entities still
    /// hold non-paired references to them. Removal has no undo.
    pub fn remove(&mut self, keys: &[Key]) -> Result<()> {
        let mut targets = Vec::new();
        for key in keys {
            let key = self.canonical(key);
            if self.states.get(&key).is_some_and(EntityState::is_removed) {
                continue;
            }
            let key = self.ensure_loaded(&key, &[])?;
            if !targets.contains(&key) {
                targets.push(key);
            }
        }
        if targets.is_empty() {
            return Ok(());
        }
        for key in &targets {
            for reference in self.find_references_to(key)? {
                if !targets.contains(&reference.referencing) {
                    return Err(OrmError::ReferentialIntegrity(format!(
                        "{} is referenced by {} through '{}'",
                        key,
                        reference.referencing,
                        self.model.association(reference.association).name
                    )));
                }
            }
        }

        self.run_operation(OperationType::USER, |session| {
            session.start_operation(|| OperationKind::EntitiesRemove { keys: targets.clone() })?;
            for key in &targets {
                session.detach(key)?;
            }
            for key in &targets {
                let is_new = session.states.get(key).is_some_and(EntityState::is_new);
                if is_new {
                    session.states.remove(key);
                    session.sets.remove_owner(key);
                } else if let Some(state) = session.states.get_mut(key) {
                    state.mark_removed();
                }
                debug!(%key, "entity removed");
            }
            Ok(())
        })
    }

    /// Clears every reference and entity set of an entity about to be removed.
    fn detach(&mut self, key: &Key) -> Result<()> {
        let model = Arc::clone(&self.model);
        let fields = &model.type_info(key.type_id()).fields;
        let references: Vec<FieldId> = fields
            .iter()
            .copied()
            .filter(|&id| model.field(id).kind == FieldKind::Entity)
            .collect();
        self.ensure_loaded(key, &references)?;
        for field in references {
            self.write_reference(key, field, None)?;
        }
        for &field in fields {
            if model.field(field).kind == FieldKind::EntitySet {
                self.clear_set_internal(key, field)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Buffers a prefetch request; flushes once enough requests piled up.
    /// Returns false for removed entities.
    pub fn prefetch(
        &mut self,
        key: &Key,
        type_id: TypeId,
        descriptors: &[PrefetchFieldDescriptor],
    ) -> Result<bool> {
        let key = self.canonical(key);
        let registered = self.prefetch.prefetch(&self.states, &key, type_id, descriptors);
        if self.prefetch.should_flush() {
            self.execute_tasks(false)?;
        }
        Ok(registered)
    }

    /// Loads the default fields of all `keys` and returns those that exist.
    pub fn prefetch_keys(&mut self, keys: &[Key]) -> Result<Vec<Key>> {
        for key in keys {
            let descriptors = PrefetchFieldDescriptor::defaults(&self.model, key.type_id());
            self.prefetch(key, key.type_id(), &descriptors)?;
        }
        self.execute_tasks(false)?;
        Ok(keys
            .iter()
            .map(|key| self.canonical(key))
            .filter(|key| {
                self.states
                    .get(key)
                    .is_some_and(|state| !state.is_not_found() && !state.is_removed())
            })
            .collect())
    }

    /// Runs the buffered prefetch requests, persisting first unless
    /// `skip_persist`.
    pub fn execute_tasks(&mut self, skip_persist: bool) -> Result<()> {
        if !skip_persist {
            self.persist()?;
        }
        // fields of derived types resolved by a cycle are queued for the next
        while self.prefetch.container_count() > 0 {
            let mut context = fetch_context!(self);
            self.prefetch.execute_tasks(&mut context)?;
        }
        Ok(())
    }

    /// Loads the default fields of an entity. Returns whether it exists.
    pub fn fetch(&mut self, key: &Key) -> Result<bool> {
        let key = self.canonical(key);
        let descriptors = PrefetchFieldDescriptor::defaults(&self.model, key.type_id());
        if !self.prefetch(&key, key.type_id(), &descriptors)? {
            return Ok(false);
        }
        self.execute_tasks(false)?;
        Ok(self
            .states
            .get(&self.canonical(&key))
            .is_some_and(|state| !state.is_not_found() && !state.is_removed()))
    }

    /// Makes sure the entity exists with the columns of `fields` and its
    /// exact type loaded. Returns the exact key.
    fn ensure_loaded(&mut self, key: &Key, fields: &[FieldId]) -> Result<Key> {
        let key = self.canonical(key);
        if let Some(resolved) = self.loaded_key(&key, fields)? {
            return Ok(resolved);
        }
        let descriptors: Vec<PrefetchFieldDescriptor> =
            fields.iter().map(|&f| PrefetchFieldDescriptor::new(f)).collect();
        self.prefetch.prefetch(&self.states, &key, key.type_id(), &descriptors);
        self.execute_tasks(true)?;
        match self.loaded_key(&key, fields)? {
            Some(resolved) => Ok(resolved),
            None => Err(OrmError::EntityNotFound(key)),
        }
    }

    fn loaded_key(&self, key: &Key, fields: &[FieldId]) -> Result<Option<Key>> {
        let Some(state) = self.states.get(key) else {
            return Ok(None);
        };
        if state.is_removed() {
            return Err(OrmError::EntityRemoved(key.clone()));
        }
        if state.is_not_found() {
            return Err(OrmError::EntityNotFound(key.clone()));
        }
        let available = fields
            .iter()
            .flat_map(|&f| self.model.field(f).columns.iter())
            .all(|&column| state.is_available(column));
        Ok((available && state.key().is_exact_type()).then(|| state.key().clone()))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Optimizes and executes a provider tree.
    pub fn query(
        &self,
        provider: &Arc<Provider>,
        parameters: &ParameterContext,
    ) -> Result<Vec<Tuple>> {
        let optimized = self
            .optimizer
            .optimize(provider, self.storage.as_ref(), &self.server, Some(parameters));
        self.storage.execute(&optimized, parameters)
    }

    /// SQL text of the optimized provider tree.
    pub fn compile(
        &self,
        provider: &Arc<Provider>,
        parameters: &ParameterContext,
    ) -> Result<CompiledQuery> {
        let optimized = self
            .optimizer
            .optimize(provider, self.storage.as_ref(), &self.server, Some(parameters));
        SqlCompiler::new(&self.model, &self.server).compile(&optimized, parameters)
    }

    /// Entities of `type_id` (and its descendants) matching `predicate`,
    /// which may reference fields by name. Pending changes are persisted
    /// first.
    pub fn query_entities(
        &mut self,
        type_id: TypeId,
        predicate: &Expr,
        parameters: &ParameterContext,
    ) -> Result<Vec<Key>> {
        self.persist()?;
        let model = Arc::clone(&self.model);
        let info = model.type_info(type_id);
        let hierarchy = model.hierarchy(type_id);
        let mut predicate = predicate.resolve(&model, type_id)?;
        if !info.is_root() {
            let types = std::iter::once(type_id)
                .chain(info.descendants.iter().copied())
                .map(|t| Expr::literal(i64::from(t.0)))
                .collect();
            predicate = predicate.and(Expr::column(hierarchy.type_id_column).in_list(types));
        }
        let provider = Provider::filter(Provider::index(hierarchy.primary_index), predicate);
        let rows = self.query(&provider, parameters)?;
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let materialized =
                materialize_row(&model, &mut self.states, &mut self.references, type_id, row)?;
            if !self.states.get(&materialized.key).is_some_and(EntityState::is_removed) {
                keys.push(materialized.key);
            }
        }
        Ok(keys)
    }
}
