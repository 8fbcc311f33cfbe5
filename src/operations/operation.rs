use super::OperationExecutionContext;
use crate::core::{Key, Result, Value};
use crate::session::Session;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Category of a registration scope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OperationType: u32 {
        /// Caused directly by user code
        const USER = 1;
        /// Caused by the engine itself, such as synchronizing paired fields
        const SYSTEM = 1 << 1;
    }
}

/// Value assigned to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum FieldValue {
    Value(Value),
    Reference(Option<Key>),
    /// Values of structure fields by their name inside the structure
    Structure(Vec<(String, FieldValue)>),
}

impl FieldValue {
    fn remap(&self, context: &OperationExecutionContext) -> FieldValue {
        match self {
            FieldValue::Value(value) => FieldValue::Value(value.clone()),
            FieldValue::Reference(key) => {
                FieldValue::Reference(key.as_ref().map(|k| context.try_remap_key(k)))
            }
            FieldValue::Structure(fields) => FieldValue::Structure(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.remap(context)))
                    .collect(),
            ),
        }
    }

    fn keys<'a>(&'a self, out: &mut Vec<&'a Key>) {
        match self {
            FieldValue::Value(_) | FieldValue::Reference(None) => {}
            FieldValue::Reference(Some(key)) => out.push(key),
            FieldValue::Structure(fields) => fields.iter().for_each(|(_, value)| value.keys(out)),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<Option<Key>> for FieldValue {
    fn from(key: Option<Key>) -> Self {
        FieldValue::Reference(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationKind {
    EntityCreate { key: Key },
    /// Creation of an entity together with its initial field values, carried
    /// by the nested operations
    EntityInitialize { key: Key },
    EntityFieldSet { key: Key, field: String, value: FieldValue },
    EntitiesRemove { keys: Vec<Key> },
    EntitySetItemAdd { key: Key, field: String, item: Key },
    EntitySetItemRemove { key: Key, field: String, item: Key },
    EntitySetClear { key: Key, field: String },
    KeyGenerate { key: Key },
    ValidateVersion { key: Key, version: Value },
    MethodCall { name: String, arguments: Vec<Value> },
}

/// Recorded mutation of a session with the operations it caused.
///
/// Nested operations that completed before the operation was marked as
/// started are `preceding`, later ones are `following`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preceding: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub following: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub undo: Vec<Operation>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            preceding: Vec::new(),
            following: Vec::new(),
            undo: Vec::new(),
        }
    }

    /// Whether replaying the operation means replaying its nested
    /// operations. Other operations reproduce their nested effects when
    /// executed.
    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::EntityInitialize { .. } | OperationKind::MethodCall { .. }
        )
    }

    /// Keys the operation itself refers to.
    pub fn keys(&self) -> Vec<&Key> {
        let mut keys = Vec::new();
        match &self.kind {
            OperationKind::EntityCreate { key }
            | OperationKind::EntityInitialize { key }
            | OperationKind::EntitySetClear { key, .. }
            | OperationKind::KeyGenerate { key }
            | OperationKind::ValidateVersion { key, .. } => keys.push(key),
            OperationKind::EntityFieldSet { key, value, .. } => {
                keys.push(key);
                value.keys(&mut keys);
            }
            OperationKind::EntitiesRemove { keys: removed } => keys.extend(removed),
            OperationKind::EntitySetItemAdd { key, item, .. }
            | OperationKind::EntitySetItemRemove { key, item, .. } => {
                keys.push(key);
                keys.push(item);
            }
            OperationKind::MethodCall { .. } => {}
        }
        keys
    }

    /// Registers the keys of the operation and its nested operations.
    pub fn prepare(&self, context: &mut OperationExecutionContext) {
        for operation in &self.preceding {
            operation.prepare(context);
        }
        for key in self.keys() {
            context.register_key(key);
        }
        for operation in &self.following {
            operation.prepare(context);
        }
    }

    pub fn execute(
        &self,
        session: &mut Session,
        context: &mut OperationExecutionContext,
    ) -> Result<()> {
        if self.is_composite() {
            for operation in self.preceding.iter().chain(&self.following) {
                operation.execute(session, context)?;
            }
            return Ok(());
        }
        // keys generated on behalf of the operation
        for operation in &self.preceding {
            if matches!(operation.kind, OperationKind::KeyGenerate { .. }) {
                operation.execute(session, context)?;
            }
        }
        self.execute_self(session, context)
    }

    fn execute_self(
        &self,
        session: &mut Session,
        context: &mut OperationExecutionContext,
    ) -> Result<()> {
        match &self.kind {
            OperationKind::EntityCreate { key } => {
                let target = if key.is_temporary() && !context.is_mapped(key) {
                    let generated = session.generate_key(key.type_id())?;
                    context.add_key_mapping(key.clone(), generated.clone())?;
                    generated
                } else {
                    context.try_remap_key(key)
                };
                session.create_with_key(target)?;
            }
            OperationKind::KeyGenerate { key } => {
                if !context.is_mapped(key) {
                    let generated = session.generate_key(key.type_id())?;
                    context.add_key_mapping(key.clone(), generated)?;
                }
            }
            OperationKind::EntityFieldSet { key, field, value } => {
                session.set_field(&context.try_remap_key(key), field, value.remap(context))?;
            }
            OperationKind::EntitiesRemove { keys } => {
                let keys: Vec<Key> = keys.iter().map(|k| context.try_remap_key(k)).collect();
                session.remove(&keys)?;
            }
            OperationKind::EntitySetItemAdd { key, field, item } => {
                let (key, item) = (context.try_remap_key(key), context.try_remap_key(item));
                session.add_item(&key, field, &item)?;
            }
            OperationKind::EntitySetItemRemove { key, field, item } => {
                let (key, item) = (context.try_remap_key(key), context.try_remap_key(item));
                session.remove_item(&key, field, &item)?;
            }
            OperationKind::EntitySetClear { key, field } => {
                session.clear_set(&context.try_remap_key(key), field)?;
            }
            OperationKind::ValidateVersion { key, version } => {
                session.validate_version(&context.try_remap_key(key), version)?;
            }
            OperationKind::EntityInitialize { .. } | OperationKind::MethodCall { .. } => {}
        }
        Ok(())
    }

    /// Operations reverting this one, in execution order.
    pub fn undo_operations(&self) -> Vec<&Operation> {
        let mut operations = Vec::new();
        if self.is_composite() {
            for operation in self.following.iter().rev() {
                operations.extend(operation.undo_operations());
            }
            operations.extend(self.undo.iter().rev());
            for operation in self.preceding.iter().rev() {
                operations.extend(operation.undo_operations());
            }
        } else {
            operations.extend(self.undo.iter().rev());
        }
        operations
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperationKind::EntityCreate { key } => write!(f, "Create {}", key),
            OperationKind::EntityInitialize { key } => write!(f, "Initialize {}", key),
            OperationKind::EntityFieldSet { key, field, .. } => write!(f, "Set {}.{}", key, field),
            OperationKind::EntitiesRemove { keys } => write!(f, "Remove {} entities", keys.len()),
            OperationKind::EntitySetItemAdd { key, field, item } => {
                write!(f, "Add {} to {}.{}", item, key, field)
            }
            OperationKind::EntitySetItemRemove { key, field, item } => {
                write!(f, "Remove {} from {}.{}", item, key, field)
            }
            OperationKind::EntitySetClear { key, field } => write!(f, "Clear {}.{}", key, field),
            OperationKind::KeyGenerate { key } => write!(f, "Generate {}", key),
            OperationKind::ValidateVersion { key, version } => {
                write!(f, "Validate {} version {}", key, version)
            }
            OperationKind::MethodCall { name, .. } => write!(f, "Call {}", name),
        }
    }
}
