use super::materialize::reference_key;
use super::Session;
use crate::core::{FieldId, Key, OrmError, Result, Value};
use crate::model::{DomainModel, FieldInfo, FieldKind, Multiplicity};
use crate::operations::{FieldValue, OperationKind, OperationType};
use std::sync::Arc;
use tracing::trace;

impl Session {
    /// Value of a field, loading it when needed.
    pub fn get_field(&mut self, key: &Key, name: &str) -> Result<FieldValue> {
        let (key, field) = self.resolve_field(key, name)?;
        self.read_field(&key, field)
    }

    pub fn get_value(&mut self, key: &Key, name: &str) -> Result<Value> {
        match self.get_field(key, name)? {
            FieldValue::Value(value) => Ok(value),
            _ => Err(OrmError::TypeMismatch(format!("Field '{}' is not a primitive field", name))),
        }
    }

    pub fn get_reference(&mut self, key: &Key, name: &str) -> Result<Option<Key>> {
        match self.get_field(key, name)? {
            FieldValue::Reference(target) => Ok(target),
            _ => Err(OrmError::TypeMismatch(format!("Field '{}' is not a reference field", name))),
        }
    }

    /// Assigns a field. Assigning the current value changes nothing and
    /// records no operation.
    pub fn set_field(&mut self, key: &Key, name: &str, value: FieldValue) -> Result<()> {
        self.set_field_as(OperationType::USER, key, name, value)
    }

    pub fn set_value(&mut self, key: &Key, name: &str, value: impl Into<Value>) -> Result<()> {
        self.set_field(key, name, FieldValue::Value(value.into()))
    }

    pub fn set_reference(&mut self, key: &Key, name: &str, target: Option<&Key>) -> Result<()> {
        self.set_field(key, name, FieldValue::Reference(target.cloned()))
    }

    pub(crate) fn set_field_as(
        &mut self,
        kind: OperationType,
        key: &Key,
        name: &str,
        value: FieldValue,
    ) -> Result<()> {
        let model = Arc::clone(&self.model);
        let (key, field_id) = self.resolve_field(key, name)?;
        let field = model.field(field_id);
        if field.is_primary_key || field.is_version || field.is_entity_set() {
            return Err(OrmError::TypeMismatch(format!("Field '{}' is read-only", field.name)));
        }
        validate(&model, field, &value)?;
        let value = self.canonical_value(value);
        let current = self.read_field(&key, field_id)?;
        if current == value {
            trace!(%key, field = %field.name, "assignment of the current value skipped");
            return Ok(());
        }

        self.run_operation(kind, |session| {
            session.start_operation(|| OperationKind::EntityFieldSet {
                key: key.clone(),
                field: field.name.clone(),
                value: value.clone(),
            })?;
            session.write_field(&key, field_id, &value)?;
            session.register_undo(|| OperationKind::EntityFieldSet {
                key: key.clone(),
                field: field.name.clone(),
                value: current,
            })
        })
    }

    /// Exact key of a loaded entity and the id of its field `name`, with the
    /// field columns loaded.
    fn resolve_field(&mut self, key: &Key, name: &str) -> Result<(Key, FieldId)> {
        let key = self.ensure_loaded(key, &[])?;
        let field = self.model.field_of(key.type_id(), name)?.id;
        let key = self.ensure_loaded(&key, &[field])?;
        Ok((key, field))
    }

    /// Current keys inside an assigned value.
    fn canonical_value(&self, value: FieldValue) -> FieldValue {
        match value {
            FieldValue::Value(value) => FieldValue::Value(value),
            FieldValue::Reference(target) => {
                FieldValue::Reference(target.map(|k| self.canonical(&k)))
            }
            FieldValue::Structure(fields) => FieldValue::Structure(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, self.canonical_value(value)))
                    .collect(),
            ),
        }
    }

    pub(crate) fn read_field(&self, key: &Key, field_id: FieldId) -> Result<FieldValue> {
        let field = self.model.field(field_id);
        let tuple = self
            .states
            .get(key)
            .and_then(|state| state.tuple())
            .ok_or_else(|| OrmError::EntityNotFound(key.clone()))?;
        match field.kind {
            FieldKind::Primitive => {
                let column = field.columns.first().copied().unwrap_or_default();
                Ok(FieldValue::Value(tuple.get(column).cloned().unwrap_or(Value::Null)))
            }
            FieldKind::Entity => Ok(FieldValue::Reference(
                reference_key(&self.model, field, tuple).map(|target| self.canonical(&target)),
            )),
            FieldKind::Structure => field
                .children
                .iter()
                .map(|&child| {
                    let name = self.model.field(child).short_name().to_string();
                    self.read_field(key, child).map(|value| (name, value))
                })
                .collect::<Result<Vec<_>>>()
                .map(FieldValue::Structure),
            FieldKind::EntitySet => Err(OrmError::TypeMismatch(format!(
                "Entity set '{}' has no single value",
                field.name
            ))),
        }
    }

    fn write_field(&mut self, key: &Key, field_id: FieldId, value: &FieldValue) -> Result<()> {
        let model = Arc::clone(&self.model);
        let field = model.field(field_id);
        match value {
            FieldValue::Value(value) => {
                let column = field.columns.first().copied().unwrap_or_default();
                self.modify(key, column, value.clone())
            }
            FieldValue::Reference(target) => self.write_reference(key, field_id, target.clone()),
            FieldValue::Structure(values) => {
                for (name, value) in values {
                    let child = child_field(&model, field, name)?;
                    self.write_field(key, child.id, value)?;
                }
                Ok(())
            }
        }
    }

    /// Points a reference field at `target` and keeps the reverse side in
    /// sync. Non-paired fields are tracked as references. A field paired with
    /// an entity set updates the loaded sets of the old and new owner, one
    /// paired with a reference rewires both partners.
    pub(crate) fn write_reference(
        &mut self,
        key: &Key,
        field_id: FieldId,
        target: Option<Key>,
    ) -> Result<()> {
        let model = Arc::clone(&self.model);
        let field = model.field(field_id);
        let target = match target {
            Some(target) => {
                let target = self.ensure_loaded(&target, &[])?;
                let expected = field.value_type.unwrap_or(target.type_id());
                if !model.is_assignable(target.type_id(), expected) {
                    return Err(OrmError::TypeMismatch(format!(
                        "Field '{}' cannot reference {}",
                        field.name, target
                    )));
                }
                Some(target)
            }
            None => None,
        };
        let old = self.current_reference(key, field);
        if old == target {
            return Ok(());
        }
        self.assign_reference(key, field, target.as_ref())?;

        let Some(association) = field.association.map(|id| model.association(id)) else {
            return Ok(());
        };
        let paired_field = association.pair_to.map(|id| model.association(id).owner_field);
        match association.multiplicity {
            Multiplicity::ZeroToOne => {
                if let Some(old) = &old {
                    self.references.remove(association.id, key, old);
                }
                if let Some(target) = &target {
                    self.references.add(association.id, key, target);
                }
            }
            Multiplicity::ManyToOne => {
                let Some(set_field) = paired_field else {
                    return Ok(());
                };
                if let Some(set) = old.as_ref().and_then(|old| self.sets.get_mut(old, set_field)) {
                    set.sync(key, false);
                }
                let target_set =
                    target.as_ref().and_then(|target| self.sets.get_mut(target, set_field));
                if let Some(set) = target_set {
                    set.sync(key, true);
                }
            }
            Multiplicity::OneToOne => {
                let Some(reverse) = paired_field.map(|id| model.field(id)) else {
                    return Ok(());
                };
                if let Some(old) = &old {
                    let old = self.ensure_loaded(old, &[reverse.id])?;
                    if self.current_reference(&old, reverse).as_ref() == Some(key) {
                        self.assign_reference(&old, reverse, None)?;
                    }
                }
                if let Some(target) = &target {
                    let target = self.ensure_loaded(target, &[reverse.id])?;
                    let previous = self.current_reference(&target, reverse);
                    if let Some(previous) = previous.filter(|previous| previous != key) {
                        let previous = self.ensure_loaded(&previous, &[field.id])?;
                        self.assign_reference(&previous, field, None)?;
                    }
                    self.assign_reference(&target, reverse, Some(key))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn current_reference(&self, key: &Key, field: &FieldInfo) -> Option<Key> {
        self.states
            .get(key)
            .and_then(|state| state.tuple())
            .and_then(|tuple| reference_key(&self.model, field, tuple))
            .map(|target| self.canonical(&target))
    }

    /// Writes the key columns of a reference without touching the other side.
    fn assign_reference(
        &mut self,
        key: &Key,
        field: &FieldInfo,
        target: Option<&Key>,
    ) -> Result<()> {
        for (position, &column) in field.columns.iter().enumerate() {
            let value = target
                .and_then(|t| t.value().get(position).cloned())
                .unwrap_or(Value::Null);
            self.modify(key, column, value)?;
        }
        Ok(())
    }

    /// Changes one column, remembering the version the change is based on.
    fn modify(&mut self, key: &Key, column: usize, value: Value) -> Result<()> {
        let version_column = self
            .model
            .type_info(key.type_id())
            .version_field
            .and_then(|id| self.model.field(id).columns.first().copied());
        let state = self
            .states
            .get_mut(key)
            .ok_or_else(|| OrmError::EntityNotFound(key.clone()))?;
        if state.is_removed() {
            return Err(OrmError::EntityRemoved(key.clone()));
        }
        if !state.is_new()
            && let Some(version) = version_column.and_then(|c| state.get(c).cloned())
        {
            state.remember_version(version);
        }
        state.set(column, value);
        Ok(())
    }
}

fn child_field<'m>(
    model: &'m DomainModel,
    parent: &FieldInfo,
    name: &str,
) -> Result<&'m FieldInfo> {
    parent
        .children
        .iter()
        .map(|&child| model.field(child))
        .find(|child| child.short_name() == name)
        .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), parent.name.clone()))
}

/// Checks the shape and types of a value before anything is written.
fn validate(model: &DomainModel, field: &FieldInfo, value: &FieldValue) -> Result<()> {
    match (field.kind, value) {
        (FieldKind::Primitive, FieldValue::Value(value)) => {
            if value.is_null() {
                if !field.is_nullable {
                    return Err(OrmError::TypeMismatch(format!(
                        "Field '{}' is not nullable",
                        field.name
                    )));
                }
                return Ok(());
            }
            match field.data_type {
                Some(data_type) if !data_type.is_compatible(value) => {
                    Err(OrmError::TypeMismatch(format!(
                        "Field '{}' expects {}, got {}",
                        field.name,
                        data_type,
                        value.type_name()
                    )))
                }
                _ => Ok(()),
            }
        }
        (FieldKind::Entity, FieldValue::Reference(_)) => Ok(()),
        (FieldKind::Structure, FieldValue::Structure(values)) => {
            for (name, value) in values {
                let child = child_field(model, field, name)?;
                if child.is_entity_set() {
                    return Err(OrmError::TypeMismatch(format!(
                        "Field '{}' is read-only",
                        child.name
                    )));
                }
                validate(model, child, value)?;
            }
            Ok(())
        }
        _ => Err(OrmError::TypeMismatch(format!(
            "Field '{}' cannot be assigned this kind of value",
            field.name
        ))),
    }
}
