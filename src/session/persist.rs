use super::materialize::reference_key;
use super::{PersistenceState, Session};
use crate::core::{Key, OrmError, Result, Tuple, TypeId, Value};
use crate::model::{AuxiliaryInfo, DomainModel, FieldKind, Multiplicity};
use crate::operations::{OperationKind, OperationType};
use crate::query::{Expr, ParameterContext, Provider};
use crate::storage::{Change, ChangeSet};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, debug_span};

/// Version written for an entity by the last change set.
struct VersionBump {
    key: Key,
    column: usize,
    value: Value,
}

impl Session {
    /// Whether some entity or entity set has changes storage has not seen.
    pub fn has_changes(&self) -> bool {
        self.states.iter().any(|state| {
            matches!(state.persistence_state(), PersistenceState::New | PersistenceState::Removed)
                || !state.dirty_columns().is_empty()
        }) || self.sets.iter().any(|(_, set)| set.has_changes())
    }

    /// Writes every pending change to storage as one change set.
    ///
    /// Temporary keys are replaced by storage keys first; the replacements
    /// stay available through [`Session::remapped_key`].
    pub fn persist(&mut self) -> Result<()> {
        if !self.has_changes() {
            return Ok(());
        }
        let _span = debug_span!("persist").entered();
        let remapped = self.remap_temporary_keys()?;
        let (changes, versions) = self.build_change_set()?;
        self.storage.apply(&changes)?;
        self.commit(versions);
        if self.config.session.clear_references_on_persist {
            self.references.clear();
        }
        debug!(changes = changes.len(), remapped, "changes persisted");
        Ok(())
    }

    /// Fails with a version conflict unless the entity carries `expected`.
    pub fn validate_version(&mut self, key: &Key, expected: &Value) -> Result<()> {
        let key = self.ensure_loaded(key, &[])?;
        let model = Arc::clone(&self.model);
        let version = model
            .type_info(key.type_id())
            .version_field
            .map(|id| model.field(id))
            .ok_or_else(|| {
                OrmError::TypeMismatch(format!(
                    "Type '{}' has no version field",
                    model.type_info(key.type_id()).name
                ))
            })?;
        let key = self.ensure_loaded(&key, &[version.id])?;
        self.run_operation(OperationType::USER, |session| {
            session.start_operation(|| OperationKind::ValidateVersion {
                key: key.clone(),
                version: expected.clone(),
            })?;
            let current = version
                .columns
                .first()
                .and_then(|&c| session.states.get(&key).and_then(|state| state.get(c)).cloned());
            match current {
                Some(current) if current == *expected => Ok(()),
                _ => Err(OrmError::VersionConflict { key: key.clone() }),
            }
        })
    }

    /// Replaces temporary keys with keys issued by storage everywhere in the
    /// session. Returns the number of replaced keys.
    fn remap_temporary_keys(&mut self) -> Result<usize> {
        let mut temporary: Vec<Key> = self
            .states
            .iter()
            .filter(|state| state.key().is_temporary())
            .map(|state| state.key().clone())
            .collect();
        if temporary.is_empty() {
            return Ok(0);
        }
        // creation order: -1, -2, ...
        temporary.sort_by(|a, b| b.cmp(a));

        let model = Arc::clone(&self.model);
        let mut mapping = HashMap::with_capacity(temporary.len());
        for old in temporary {
            let value = self.storage.generate_key(old.hierarchy())?;
            let new = Key::new(old.hierarchy(), old.type_id(), true, Tuple::from_values([value]));
            mapping.insert(old, new);
        }

        for (old, new) in &mapping {
            self.states.rekey(old, new.clone());
            if let Some(state) = self.states.get_mut(new) {
                let key_columns = &model.hierarchy(new.type_id()).key_columns;
                state.replace_values(key_columns, old.value(), new.value());
            }
        }
        for state in self.states.iter_mut() {
            for &field_id in &model.type_info(state.type_id()).fields {
                let field = model.field(field_id);
                if field.kind != FieldKind::Entity {
                    continue;
                }
                let Some(old) = state.tuple().and_then(|tuple| reference_key(&model, field, tuple))
                else {
                    continue;
                };
                if let Some(new) = mapping.get(&old) {
                    state.replace_values(&field.columns, old.value(), new.value());
                }
            }
        }
        self.sets.remap(&mapping);
        self.references.remap(&mapping);
        let count = mapping.len();
        self.key_mapping.extend(mapping);
        Ok(count)
    }

    fn build_change_set(&self) -> Result<(ChangeSet, Vec<VersionBump>)> {
        let model = &self.model;
        let mut states: Vec<_> = self.states.iter().collect();
        states.sort_by(|a, b| a.key().cmp(b.key()));
        let mut changes = ChangeSet::new();
        let mut versions = Vec::new();

        for state in states.iter().filter(|state| state.is_new()) {
            let hierarchy = model.hierarchy(state.type_id());
            let row = Tuple::from_values(
                (0..hierarchy.column_count()).map(|c| state.get(c).cloned().unwrap_or(Value::Null)),
            );
            changes.push(Change::Insert {
                hierarchy: hierarchy.root,
                row,
            });
        }

        for state in &states {
            if state.persistence_state() != PersistenceState::Modified
                || state.dirty_columns().is_empty()
            {
                continue;
            }
            let key = state.key();
            let hierarchy = model.hierarchy(key.type_id());
            let mut values = Tuple::new(hierarchy.column_count());
            for &column in state.dirty_columns() {
                values.set(column, state.get(column).cloned().unwrap_or(Value::Null));
            }
            let version = model
                .type_info(key.type_id())
                .version_field
                .and_then(|id| model.field(id).columns.first().copied());
            if let Some(column) = version {
                let stored = self.stored_version(key, column)?;
                let expected = state.original_version().or_else(|| state.get(column));
                let stored = match (stored, expected) {
                    (Some(stored), Some(expected)) if stored == *expected => stored,
                    (Some(stored), None) => stored,
                    _ => return Err(OrmError::VersionConflict { key: key.clone() }),
                };
                let value = Value::Integer(stored.as_i64().unwrap_or(0) + 1);
                values.set(column, value.clone());
                versions.push(VersionBump {
                    key: key.clone(),
                    column,
                    value,
                });
            }
            changes.push(Change::Update {
                hierarchy: hierarchy.root,
                key: key.value().clone(),
                values,
            });
        }

        let mut seen: HashSet<(TypeId, Tuple)> = HashSet::new();
        let mut link_inserts = Vec::new();
        for ((owner, field), set) in self.sets.iter() {
            if !set.has_changes() {
                continue;
            }
            let Some(association) = model.field(*field).association.map(|id| model.association(id))
            else {
                continue;
            };
            let linked = matches!(
                association.multiplicity,
                Multiplicity::ZeroToMany | Multiplicity::ManyToMany
            );
            if !linked {
                continue;
            }
            let Some(aux) = &association.auxiliary else {
                continue;
            };
            let link = model.hierarchy(aux.link_type);
            for item in set.removed_items() {
                let key = link_row(model, aux, owner, item).project(&link.key_columns);
                if seen.insert((aux.link_type, key.clone())) {
                    changes.push(Change::Delete {
                        hierarchy: aux.link_type,
                        key,
                    });
                }
            }
            for item in set.added_items() {
                let row = link_row(model, aux, owner, item);
                if seen.insert((aux.link_type, row.project(&link.key_columns))) {
                    link_inserts.push(Change::Insert {
                        hierarchy: aux.link_type,
                        row,
                    });
                }
            }
        }
        link_inserts.into_iter().for_each(|change| changes.push(change));

        for state in states.iter().filter(|state| state.is_removed()) {
            changes.push(Change::Delete {
                hierarchy: state.key().hierarchy(),
                key: state.key().value().clone(),
            });
        }
        Ok((changes, versions))
    }

    /// Version value storage holds for `key`.
    fn stored_version(&self, key: &Key, column: usize) -> Result<Option<Value>> {
        let hierarchy = self.model.hierarchy(key.type_id());
        let predicate = Expr::all(hierarchy.key_columns.iter().enumerate().map(|(position, &c)| {
            let value = key.value().get(position).cloned().unwrap_or(Value::Null);
            Expr::column(c).eq(Expr::literal(value))
        }));
        let provider = Provider::select(
            Provider::filter(Provider::index(hierarchy.primary_index), predicate),
            vec![column],
        );
        let rows = self.storage.execute(&provider, &ParameterContext::new())?;
        Ok(rows.first().and_then(|row| row.get(0)).cloned())
    }

    fn commit(&mut self, versions: Vec<VersionBump>) {
        let removed: Vec<Key> = self
            .states
            .iter()
            .filter(|state| state.is_removed())
            .map(|state| state.key().clone())
            .collect();
        for state in self.states.iter_mut() {
            let pending = matches!(
                state.persistence_state(),
                PersistenceState::New | PersistenceState::Modified
            );
            if pending {
                state.commit();
            }
        }
        for bump in versions {
            if let Some(state) = self.states.get_mut(&bump.key) {
                state.store(bump.column, bump.value);
            }
        }
        for key in removed {
            self.states.remove(&key);
            self.states.mark_not_found(key.clone());
            self.sets.remove_owner(&key);
        }
        for (_, set) in self.sets.iter_mut() {
            set.commit();
        }
    }
}

/// Link table row connecting `owner` with `item`.
fn link_row(model: &DomainModel, aux: &AuxiliaryInfo, owner: &Key, item: &Key) -> Tuple {
    let link = model.hierarchy(aux.link_type);
    let mut row = Tuple::from_values(vec![Value::Null; link.column_count()]);
    for (columns, key) in [(&aux.master_columns, owner), (&aux.slave_columns, item)] {
        for (position, &column) in columns.iter().enumerate() {
            row.set(column, key.value().get(position).cloned().unwrap_or(Value::Null));
        }
    }
    row.set(link.type_id_column, Value::Integer(i64::from(aux.link_type.0)));
    row
}
