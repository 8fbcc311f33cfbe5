use super::selector::IndexSelection;
use crate::core::{OrmError, Result};
use crate::model::{DomainModel, IndexInfo};
use crate::query::Provider;
use std::sync::Arc;

/// Provider producing the rows of `primary` that fall into the selected
/// ranges, with the primary index output layout.
pub fn rewrite_selections(
    model: &DomainModel,
    primary: &IndexInfo,
    selections: &[IndexSelection],
) -> Result<Arc<Provider>> {
    let mut providers = selections
        .iter()
        .map(|selection| rewrite_selection(model, primary, selection));
    let first = providers
        .next()
        .ok_or_else(|| OrmError::ExecutionError("No index selection to rewrite".into()))??;
    providers.try_fold(first, |united, next| Ok(Provider::union(united, next?)))
}

fn rewrite_selection(
    model: &DomainModel,
    primary: &IndexInfo,
    selection: &IndexSelection,
) -> Result<Arc<Provider>> {
    if selection.index == primary.id {
        return Ok(Provider::range_set(Provider::index(primary.id), selection.ranges.clone()));
    }
    let secondary = model.index(selection.index);
    let key_width = primary.key_columns.len();
    let key_positions = primary
        .key_columns
        .iter()
        .map(|&column| {
            secondary.key_position(column).ok_or_else(|| {
                OrmError::SchemaError(format!(
                    "Index '{}' does not contain the primary key of '{}'",
                    secondary.name, primary.name
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let keys = Provider::select(
        Provider::range_set(Provider::index(secondary.id), selection.ranges.clone()),
        key_positions,
    );
    let equalities = (0..key_width).map(|i| (i, i)).collect();
    let joined = Provider::join(keys, Provider::index(primary.id), equalities);
    let primary_width = primary.key_columns.len() + primary.value_columns.len();
    Ok(Provider::select(joined, (key_width..key_width + primary_width).collect()))
}
