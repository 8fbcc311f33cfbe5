use super::EntityStateCache;
use crate::core::{Key, OrmError, Result, Tuple, TypeId, Value};
use crate::model::{DomainModel, FieldInfo, Multiplicity};
use crate::references::ReferenceRegistry;

/// Outcome of registering a storage row in a session.
#[derive(Debug, Clone)]
pub(crate) struct MaterializedRow {
    pub key: Key,
    /// The exact type of the key was not known before this row
    pub type_resolved: bool,
}

/// Registers a hierarchy-layout row as the state of its entity.
///
/// The type id column, when present, resolves the exact type; otherwise the
/// key is typed by `requested`. Non-paired references found in the row are
/// registered silently.
pub(crate) fn materialize_row(
    model: &DomainModel,
    states: &mut EntityStateCache,
    references: &mut ReferenceRegistry,
    requested: TypeId,
    row: Tuple,
) -> Result<MaterializedRow> {
    let hierarchy = model.hierarchy(requested);
    let key_values = hierarchy
        .key_columns
        .iter()
        .map(|&column| {
            row.get(column).cloned().ok_or_else(|| {
                OrmError::ExecutionError(format!("Row {} has no key column {}", row, column))
            })
        })
        .collect::<Result<Vec<Value>>>()?;
    let mut key = model.key(requested, key_values)?;
    if let Some(raw) = row.get(hierarchy.type_id_column).and_then(Value::as_i64) {
        let type_id = TypeId(raw as u32);
        if !hierarchy.types.contains(&type_id) {
            return Err(OrmError::ExecutionError(format!(
                "Row {} carries type id {} outside of its hierarchy",
                row, raw
            )));
        }
        key = key.with_exact_type(type_id);
    }

    let was_exact = states.get(&key).is_some_and(|state| state.key().is_exact_type());
    let state = states.materialize(key, row);
    let key = state.key().clone();
    if let Some(tuple) = state.tuple() {
        for &field_id in &model.type_info(key.type_id()).fields {
            let field = model.field(field_id);
            let Some(association) = field.association.map(|id| model.association(id)) else {
                continue;
            };
            if association.multiplicity != Multiplicity::ZeroToOne {
                continue;
            }
            if let Some(referenced) = reference_key(model, field, tuple) {
                references.register_silently(association.id, &key, &referenced);
            }
        }
    }
    Ok(MaterializedRow {
        type_resolved: key.is_exact_type() && !was_exact,
        key,
    })
}

/// Key stored in the columns of a reference field, or `None` when the
/// columns are null or not loaded.
pub(crate) fn reference_key(model: &DomainModel, field: &FieldInfo, tuple: &Tuple) -> Option<Key> {
    let target = field.value_type?;
    let values = field
        .columns
        .iter()
        .map(|&c| tuple.get(c).filter(|v| !v.is_null()).cloned())
        .collect::<Option<Vec<Value>>>()?;
    model.key(target, values).ok()
}
