use super::{EntityState, Session};
use crate::core::{Key, Result, Tuple, TypeId, Value};
use crate::model::{AssociationInfo, DomainModel, Multiplicity};
use crate::query::{Expr, ParameterContext, Provider};
use crate::references::ReferenceInfo;
use std::collections::BTreeSet;
use std::sync::Arc;

impl Session {
    /// Non-paired references to `key`, both those tracked by the session and
    /// those only storage knows about. Local changes win over stored rows.
    pub fn find_references_to(&self, key: &Key) -> Result<Vec<ReferenceInfo>> {
        let target = self.canonical(key);
        let mut found: BTreeSet<ReferenceInfo> = self
            .references
            .get_references_to(&target)
            .into_iter()
            .filter(|reference| {
                !self
                    .states
                    .get(&reference.referencing)
                    .is_some_and(EntityState::is_removed)
            })
            .collect();
        if target.is_temporary() {
            return Ok(found.into_iter().collect());
        }

        let model = Arc::clone(&self.model);
        for association in model.associations() {
            if model.type_info(association.target_type).hierarchy != target.hierarchy()
                || !model.is_assignable(target.type_id(), association.target_type)
            {
                continue;
            }
            let referencing = match association.multiplicity {
                Multiplicity::ZeroToOne => {
                    self.stored_field_references(&model, association, &target)?
                }
                Multiplicity::ZeroToMany => {
                    self.stored_set_references(&model, association, &target)?
                }
                _ => continue,
            };
            found.extend(referencing.into_iter().map(|referencing| ReferenceInfo {
                association: association.id,
                referencing,
                referenced: target.clone(),
            }));
        }
        Ok(found.into_iter().collect())
    }

    /// Entities whose stored reference field points at `target` and whose
    /// local state does not say otherwise.
    fn stored_field_references(
        &self,
        model: &DomainModel,
        association: &AssociationInfo,
        target: &Key,
    ) -> Result<Vec<Key>> {
        let owners = model.hierarchy(association.owner_type);
        let columns = &model.field(association.owner_field).columns;
        let provider = Provider::filter(
            Provider::index(owners.primary_index),
            key_predicate(columns, target),
        );
        let mut keys = Vec::new();
        for row in self.query(&provider, &ParameterContext::new())? {
            let Some(key) = row_key(
                model,
                association.owner_type,
                &owners.key_columns,
                Some(owners.type_id_column),
                &row,
            ) else {
                continue;
            };
            let overridden = self.states.get(&key).is_some_and(|state| {
                state.is_removed()
                    || state.is_new()
                    || columns.iter().all(|&c| state.is_available(c))
            });
            if !overridden {
                keys.push(self.states.resolve(&key));
            }
        }
        Ok(keys)
    }

    /// Owners of entity sets whose stored link rows contain `target`.
    fn stored_set_references(
        &self,
        model: &DomainModel,
        association: &AssociationInfo,
        target: &Key,
    ) -> Result<Vec<Key>> {
        let Some((master, slave)) = association.link_columns() else {
            return Ok(Vec::new());
        };
        let Some(aux) = &association.auxiliary else {
            return Ok(Vec::new());
        };
        let link = model.hierarchy(aux.link_type);
        let provider =
            Provider::filter(Provider::index(link.primary_index), key_predicate(slave, target));
        let mut keys = Vec::new();
        for row in self.query(&provider, &ParameterContext::new())? {
            let Some(owner) = row_key(model, association.owner_type, master, None, &row) else {
                continue;
            };
            if self.states.get(&owner).is_some_and(EntityState::is_removed) {
                continue;
            }
            let local = self.sets.get(&owner, association.owner_field);
            let overridden = local
                .is_some_and(|set| set.is_fully_loaded() || set.removed_items().contains(target));
            if overridden {
                continue;
            }
            keys.push(self.states.resolve(&owner));
        }
        Ok(keys)
    }
}

fn key_predicate(columns: &[usize], key: &Key) -> Expr {
    Expr::all(columns.iter().enumerate().map(|(position, &column)| {
        let value = key.value().get(position).cloned().unwrap_or(Value::Null);
        Expr::column(column).eq(Expr::literal(value))
    }))
}

/// Key stored in `columns` of a row, typed exactly when the row carries a
/// type id.
fn row_key(
    model: &DomainModel,
    type_id: TypeId,
    columns: &[usize],
    type_id_column: Option<usize>,
    row: &Tuple,
) -> Option<Key> {
    let values = columns
        .iter()
        .map(|&c| row.get(c).cloned())
        .collect::<Option<Vec<Value>>>()?;
    let key = model.key(type_id, values).ok()?;
    let exact = type_id_column
        .and_then(|c| row.get(c))
        .and_then(Value::as_i64)
        .map(|raw| TypeId(raw as u32));
    Some(match exact {
        Some(exact) => key.with_exact_type(exact),
        None => key,
    })
}
