use super::materialize::reference_key;
use super::{fetch_context, EntitySetState, PersistenceState, Session};
use crate::core::{FieldId, Key, OrmError, Result};
use crate::model::{AssociationInfo, Multiplicity};
use crate::operations::{FieldValue, OperationKind, OperationType};
use crate::prefetch::fetcher::run_tasks;
use crate::prefetch::TaskSet;
use std::sync::Arc;
use tracing::trace;

impl Session {
    /// Items of an entity set, loading them when needed.
    pub fn entity_set_items(&mut self, key: &Key, name: &str) -> Result<Vec<Key>> {
        let (owner, field) = self.resolve_set_field(key, name)?;
        self.ensure_set_loaded(&owner, field)?;
        Ok(self
            .sets
            .get(&owner, field)
            .map(|set| set.items().cloned().collect())
            .unwrap_or_default())
    }

    /// Adds `item` to an entity set. Returns false when it is already there.
    pub fn add_item(&mut self, key: &Key, name: &str, item: &Key) -> Result<bool> {
        let (owner, field) = self.resolve_set_field(key, name)?;
        let item = self.ensure_loaded(item, &[])?;
        let association = self.set_association(field)?;
        if !self.model.is_assignable(item.type_id(), association.target_type) {
            return Err(OrmError::TypeMismatch(format!(
                "{} cannot be an item of '{}'",
                item,
                self.model.field(field).name
            )));
        }
        self.ensure_set_loaded(&owner, field)?;
        if self.sets.get(&owner, field).is_some_and(|set| set.contains(&item)) {
            return Ok(false);
        }
        let name = self.model.field(field).name.clone();
        self.run_operation(OperationType::USER, |session| {
            session.start_operation(|| OperationKind::EntitySetItemAdd {
                key: owner.clone(),
                field: name.clone(),
                item: item.clone(),
            })?;
            session.attach_item(&owner, field, &item)?;
            session.register_undo(|| OperationKind::EntitySetItemRemove {
                key: owner.clone(),
                field: name.clone(),
                item: item.clone(),
            })?;
            Ok(true)
        })
    }

    /// Removes `item` from an entity set. Returns false when it is not there.
    pub fn remove_item(&mut self, key: &Key, name: &str, item: &Key) -> Result<bool> {
        let (owner, field) = self.resolve_set_field(key, name)?;
        let item = self.canonical(item);
        self.ensure_set_loaded(&owner, field)?;
        if !self.sets.get(&owner, field).is_some_and(|set| set.contains(&item)) {
            return Ok(false);
        }
        let name = self.model.field(field).name.clone();
        self.run_operation(OperationType::USER, |session| {
            session.start_operation(|| OperationKind::EntitySetItemRemove {
                key: owner.clone(),
                field: name.clone(),
                item: item.clone(),
            })?;
            session.detach_item(&owner, field, &item)?;
            session.register_undo(|| OperationKind::EntitySetItemAdd {
                key: owner.clone(),
                field: name.clone(),
                item: item.clone(),
            })?;
            Ok(true)
        })
    }

    pub fn clear_set(&mut self, key: &Key, name: &str) -> Result<()> {
        let (owner, field) = self.resolve_set_field(key, name)?;
        let name = self.model.field(field).name.clone();
        self.run_operation(OperationType::USER, |session| {
            session.start_operation(|| OperationKind::EntitySetClear {
                key: owner.clone(),
                field: name.clone(),
            })?;
            for item in session.clear_set_internal(&owner, field)? {
                session.register_undo(|| OperationKind::EntitySetItemAdd {
                    key: owner.clone(),
                    field: name.clone(),
                    item,
                })?;
            }
            Ok(())
        })
    }

    /// Detaches every item of a set and returns the detached items.
    pub(crate) fn clear_set_internal(&mut self, owner: &Key, field: FieldId) -> Result<Vec<Key>> {
        self.ensure_set_loaded(owner, field)?;
        let items: Vec<Key> = self
            .sets
            .get(owner, field)
            .map(|set| set.items().cloned().collect())
            .unwrap_or_default();
        for item in &items {
            self.detach_item(owner, field, item)?;
        }
        Ok(items)
    }

    fn resolve_set_field(&mut self, key: &Key, name: &str) -> Result<(Key, FieldId)> {
        let owner = self.ensure_loaded(key, &[])?;
        let field = self.model.field_of(owner.type_id(), name)?;
        if !field.is_entity_set() {
            return Err(OrmError::TypeMismatch(format!(
                "Field '{}' is not an entity set",
                field.name
            )));
        }
        Ok((owner, field.id))
    }

    fn set_association(&self, field: FieldId) -> Result<AssociationInfo> {
        let info = self.model.field(field);
        info.association
            .map(|id| self.model.association(id).clone())
            .ok_or_else(|| {
                OrmError::SchemaError(format!("Entity set '{}' has no association", info.name))
            })
    }

    /// Loads all items of a set unless they are known already. Local changes
    /// of item references are folded into the loaded items.
    pub(crate) fn ensure_set_loaded(&mut self, owner: &Key, field: FieldId) -> Result<()> {
        if self.sets.get(owner, field).is_some_and(EntitySetState::is_fully_loaded) {
            return Ok(());
        }
        if self.states.get(owner).is_some_and(|state| state.is_new()) {
            self.sets
                .get_or_insert(owner, field, EntitySetState::new_empty)
                .merge_loaded([], true);
            return Ok(());
        }
        trace!(%owner, field = %self.model.field(field).name, "loading entity set");
        let mut tasks = TaskSet::new();
        tasks.add_owner(field, None, owner.clone());
        let max_keys_per_query = self.config.prefetch.max_keys_per_query;
        let mut context = fetch_context!(self);
        run_tasks(&mut context, &tasks, max_keys_per_query)?;
        self.reconcile_set(owner, field);
        Ok(())
    }

    /// Applies unsaved item references to a freshly loaded one-to-many set.
    fn reconcile_set(&mut self, owner: &Key, field: FieldId) {
        let model = Arc::clone(&self.model);
        let Some(association) = model.field(field).association.map(|id| model.association(id))
        else {
            return;
        };
        if association.multiplicity != Multiplicity::OneToMany {
            return;
        }
        let Some(reverse) = association
            .pair_to
            .map(|id| model.field(model.association(id).owner_field))
        else {
            return;
        };
        let item_hierarchy = model.type_info(association.target_type).hierarchy;
        let Some(set) = self.sets.get_mut(owner, field) else {
            return;
        };
        for state in self.states.iter() {
            if state.key().hierarchy() != item_hierarchy || !state.key().is_exact_type() {
                continue;
            }
            if !model.is_assignable(state.type_id(), association.target_type) {
                continue;
            }
            if state.is_removed() {
                set.sync(state.key(), false);
                continue;
            }
            let pending = matches!(
                state.persistence_state(),
                PersistenceState::New | PersistenceState::Modified
            );
            if !pending {
                continue;
            }
            let Some(tuple) = state.tuple() else {
                continue;
            };
            if reverse.columns.iter().all(|&c| tuple.is_available(c)) {
                let points_here =
                    reference_key(&model, reverse, tuple).is_some_and(|target| target == *owner);
                set.sync(state.key(), points_here);
            }
        }
    }

    fn attach_item(&mut self, owner: &Key, field: FieldId, item: &Key) -> Result<()> {
        let association = self.set_association(field)?;
        match association.multiplicity {
            Multiplicity::OneToMany => {
                let reverse = self.reverse_field_name(&association)?;
                self.set_field_as(
                    OperationType::SYSTEM,
                    item,
                    &reverse,
                    FieldValue::Reference(Some(owner.clone())),
                )
            }
            Multiplicity::ZeroToMany => {
                if let Some(set) = self.sets.get_mut(owner, field) {
                    set.add(item.clone());
                }
                self.references.add(association.id, owner, item);
                Ok(())
            }
            Multiplicity::ManyToMany => {
                if let Some(set) = self.sets.get_mut(owner, field) {
                    set.add(item.clone());
                }
                let reverse = self.paired_field(&association)?;
                let create = self.set_factory(item);
                self.sets.get_or_insert(item, reverse, create).add(owner.clone());
                Ok(())
            }
            other => Err(OrmError::TypeMismatch(format!(
                "{:?} association is not an entity set",
                other
            ))),
        }
    }

    fn detach_item(&mut self, owner: &Key, field: FieldId, item: &Key) -> Result<()> {
        let association = self.set_association(field)?;
        match association.multiplicity {
            Multiplicity::OneToMany => {
                let reverse = self.reverse_field_name(&association)?;
                let cleared = FieldValue::Reference(None);
                self.set_field_as(OperationType::SYSTEM, item, &reverse, cleared)
            }
            Multiplicity::ZeroToMany => {
                if let Some(set) = self.sets.get_mut(owner, field) {
                    set.remove(item);
                }
                self.references.remove(association.id, owner, item);
                Ok(())
            }
            Multiplicity::ManyToMany => {
                if let Some(set) = self.sets.get_mut(owner, field) {
                    set.remove(item);
                }
                let reverse = self.paired_field(&association)?;
                let create = self.set_factory(item);
                self.sets.get_or_insert(item, reverse, create).exclude(owner);
                Ok(())
            }
            other => Err(OrmError::TypeMismatch(format!(
                "{:?} association is not an entity set",
                other
            ))),
        }
    }

    fn reverse_field_name(&self, association: &AssociationInfo) -> Result<String> {
        self.paired_field(association)
            .map(|field| self.model.field(field).name.clone())
    }

    fn paired_field(&self, association: &AssociationInfo) -> Result<FieldId> {
        association
            .pair_to
            .map(|id| self.model.association(id).owner_field)
            .ok_or_else(|| {
                OrmError::SchemaError(format!("Association '{}' is not paired", association.name))
            })
    }

    /// State for a set of `owner` that was never touched.
    fn set_factory(&self, owner: &Key) -> fn() -> EntitySetState {
        if self.states.get(owner).is_some_and(|state| state.is_new()) {
            EntitySetState::new_empty
        } else {
            EntitySetState::unloaded
        }
    }
}
