use super::Table;
use crate::core::{OrmError, Result, Tuple, TypeId};
use crate::model::DomainModel;
use crate::query::{ExpressionEvaluator, ParameterContext, Provider};
use crate::server_info::{QueryFeatures, ServerInfo};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Evaluates provider trees over in-memory tables.
pub struct ProviderExecutor<'a> {
    model: &'a DomainModel,
    server: &'a ServerInfo,
    tables: &'a HashMap<TypeId, Table>,
    parameters: &'a ParameterContext,
}

impl<'a> ProviderExecutor<'a> {
    pub fn new(
        model: &'a DomainModel,
        server: &'a ServerInfo,
        tables: &'a HashMap<TypeId, Table>,
        parameters: &'a ParameterContext,
    ) -> Self {
        Self {
            model,
            server,
            tables,
            parameters,
        }
    }

    fn table(&self, hierarchy: TypeId) -> Result<&'a Table> {
        self.tables
            .get(&hierarchy)
            .ok_or_else(|| {
                OrmError::ExecutionError(format!("No table for hierarchy {}", hierarchy))
            })
    }

    fn require(&self, feature: QueryFeatures, construct: &str) -> Result<()> {
        if self.server.query().features.contains(feature) {
            Ok(())
        } else {
            Err(OrmError::UnsupportedOperation(format!(
                "{} is not supported by '{}'",
                construct,
                self.server.name()
            )))
        }
    }

    pub fn execute(&self, provider: &Provider) -> Result<Vec<Tuple>> {
        match provider {
            Provider::Index(node) => {
                let index = self.model.index(node.index);
                self.table(index.hierarchy)?.scan(index, None)
            }
            Provider::RangeSet(node) => {
                let Provider::Index(source) = node.source.as_ref() else {
                    return Err(OrmError::UnsupportedOperation(format!(
                        "Range restriction over {} instead of an index",
                        node.source.name()
                    )));
                };
                let index = self.model.index(source.index);
                let ranges = node.ranges.evaluate(self.parameters)?;
                self.table(index.hierarchy)?.scan(index, Some(&ranges))
            }
            Provider::Filter(node) => {
                let evaluator = ExpressionEvaluator::new(self.parameters);
                let mut rows = Vec::new();
                for row in self.execute(&node.source)? {
                    if evaluator.matches(&node.predicate, &row)? == Some(true) {
                        rows.push(row);
                    }
                }
                Ok(rows)
            }
            Provider::Select(node) => Ok(self
                .execute(&node.source)?
                .iter()
                .map(|row| row.project(&node.columns))
                .collect()),
            Provider::Sort(node) => {
                let mut rows = self.execute(&node.source)?;
                rows.sort_by(|a, b| {
                    for &(column, descending) in &node.order {
                        let ordering = a.get(column).cmp(&b.get(column));
                        let ordering = if descending { ordering.reverse() } else { ordering };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    Ordering::Equal
                });
                Ok(rows)
            }
            Provider::Take(node) => {
                self.require(QueryFeatures::PAGING, "Paging")?;
                let rows = self.execute(&node.source)?;
                if node.partition.is_empty() {
                    return Ok(rows.into_iter().take(node.count).collect());
                }
                self.require(QueryFeatures::ROW_NUMBER, "Per-group paging")?;
                let mut taken: HashMap<Tuple, usize> = HashMap::new();
                Ok(rows
                    .into_iter()
                    .filter(|row| {
                        let seen = taken.entry(row.project(&node.partition)).or_default();
                        *seen += 1;
                        *seen <= node.count
                    })
                    .collect())
            }
            Provider::Skip(node) => {
                self.require(QueryFeatures::PAGING, "Paging")?;
                Ok(self.execute(&node.source)?.into_iter().skip(node.count).collect())
            }
            Provider::Join(node) => {
                let left = self.execute(&node.left)?;
                let right = self.execute(&node.right)?;
                let left_positions: Vec<usize> = node.equalities.iter().map(|(l, _)| *l).collect();
                let right_positions: Vec<usize> = node.equalities.iter().map(|(_, r)| *r).collect();

                let mut lookup: HashMap<Tuple, Vec<&Tuple>> = HashMap::new();
                for row in &right {
                    lookup.entry(row.project(&right_positions)).or_default().push(row);
                }
                let mut rows = Vec::new();
                for row in &left {
                    let join_key = row.project(&left_positions);
                    // NULL never joins
                    if join_key.iter().any(|v| v.is_none_or(|v| v.is_null())) {
                        continue;
                    }
                    if let Some(matches) = lookup.get(&join_key) {
                        rows.extend(matches.iter().map(|other| row.concat(other)));
                    }
                }
                Ok(rows)
            }
            Provider::Union(node) => {
                self.require(QueryFeatures::UNION, "UNION")?;
                let mut seen = HashSet::new();
                let mut rows = Vec::new();
                for row in self.execute(&node.left)?.into_iter().chain(self.execute(&node.right)?) {
                    if seen.insert(row.clone()) {
                        rows.push(row);
                    }
                }
                Ok(rows)
            }
        }
    }
}
