use crate::core::{IndexId, OrmError, Result, Tuple, TypeId, Value};
use crate::model::{HierarchyInfo, IndexAttributes, IndexInfo};
use crate::query::{ExpressionEvaluator, ParameterContext};
use crate::range::{Entire, RangeSet};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Rows of one hierarchy, keyed by primary key, with secondary index entries.
#[derive(Debug, Clone)]
pub struct Table {
    hierarchy: TypeId,
    width: usize,
    key_columns: Vec<usize>,
    rows: BTreeMap<Tuple, Tuple>,
    indexes: HashMap<IndexId, SecondaryIndex>,
}

#[derive(Debug, Clone)]
struct SecondaryIndex {
    info: IndexInfo,
    entries: BTreeSet<Tuple>,
}

impl SecondaryIndex {
    fn covers(&self, row: &Tuple) -> Result<bool> {
        match &self.info.filter {
            None => Ok(true),
            Some(filter) => {
                let parameters = ParameterContext::new();
                Ok(ExpressionEvaluator::new(&parameters).matches(filter, row)? == Some(true))
            }
        }
    }

    fn entry(&self, row: &Tuple) -> Tuple {
        row.project(&self.info.key_columns)
    }

    fn entries_in(&self, ranges: &RangeSet<Tuple>) -> Vec<&Tuple> {
        keys_in_ranges(ranges, |start| self.entries.range((start, Bound::Unbounded)))
    }
}

impl Table {
    pub fn new(hierarchy: &HierarchyInfo, indexes: impl IntoIterator<Item = IndexInfo>) -> Self {
        Self {
            hierarchy: hierarchy.root,
            width: hierarchy.column_count(),
            key_columns: hierarchy.key_columns.clone(),
            rows: BTreeMap::new(),
            indexes: indexes
                .into_iter()
                .filter(IndexInfo::is_secondary)
                .map(|info| {
                    (
                        info.id,
                        SecondaryIndex {
                            info,
                            entries: BTreeSet::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn hierarchy(&self) -> TypeId {
        self.hierarchy
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, key: &Tuple) -> Option<&Tuple> {
        self.rows.get(key)
    }

    pub fn max_key(&self) -> Option<&Tuple> {
        self.rows.keys().next_back()
    }

    pub fn insert(&mut self, mut row: Tuple) -> Result<()> {
        if row.len() != self.width {
            return Err(OrmError::ExecutionError(format!(
                "Row of {} has {} columns, expected {}",
                self.hierarchy,
                row.len(),
                self.width
            )));
        }
        for position in 0..self.width {
            if !row.is_available(position) {
                row.set(position, Value::Null);
            }
        }
        let key = row.project(&self.key_columns);
        if self.rows.contains_key(&key) {
            return Err(OrmError::ExecutionError(format!(
                "Duplicate key {} in {}",
                key, self.hierarchy
            )));
        }
        self.check_unique(&row, None)?;
        self.index_row(&row)?;
        self.rows.insert(key, row);
        Ok(())
    }

    pub fn update(&mut self, key: &Tuple, values: &Tuple) -> Result<()> {
        let old = self
            .rows
            .get(key)
            .cloned()
            .ok_or_else(|| {
                OrmError::ExecutionError(format!("No row {} in {}", key, self.hierarchy))
            })?;
        let mut row = old.clone();
        for (position, value) in values.iter().enumerate() {
            if let Some(value) = value {
                row.set(position, value.clone());
            }
        }
        if row.project(&self.key_columns) != *key {
            return Err(OrmError::ExecutionError(format!(
                "Update of {} in {} changes its key",
                key, self.hierarchy
            )));
        }
        self.check_unique(&row, Some(key))?;
        self.unindex_row(&old);
        self.index_row(&row)?;
        self.rows.insert(key.clone(), row);
        Ok(())
    }

    pub fn delete(&mut self, key: &Tuple) -> Result<()> {
        let old = self
            .rows
            .remove(key)
            .ok_or_else(|| {
                OrmError::ExecutionError(format!("No row {} in {}", key, self.hierarchy))
            })?;
        self.unindex_row(&old);
        Ok(())
    }

    fn check_unique(&self, row: &Tuple, existing: Option<&Tuple>) -> Result<()> {
        for index in self.indexes.values() {
            if !index.info.attributes.contains(IndexAttributes::UNIQUE) || !index.covers(row)? {
                continue;
            }
            let unique_columns: Vec<usize> = index
                .info
                .key_columns
                .iter()
                .copied()
                .filter(|c| !self.key_columns.contains(c))
                .collect();
            let candidate = row.project(&unique_columns);
            if candidate.iter().any(|v| v.is_none_or(Value::is_null)) {
                continue;
            }
            let clash = self.rows.iter().any(|(key, other)| {
                Some(key) != existing && other.project(&unique_columns) == candidate
            });
            if clash {
                return Err(OrmError::ExecutionError(format!(
                    "Unique index '{}' already contains {}",
                    index.info.name, candidate
                )));
            }
        }
        Ok(())
    }

    fn index_row(&mut self, row: &Tuple) -> Result<()> {
        for index in self.indexes.values_mut() {
            if index.covers(row)? {
                let entry = index.entry(row);
                index.entries.insert(entry);
            }
        }
        Ok(())
    }

    fn unindex_row(&mut self, row: &Tuple) {
        for index in self.indexes.values_mut() {
            let entry = index.entry(row);
            index.entries.remove(&entry);
        }
    }

    /// Entries of `index` in key order, restricted to `ranges`. Primary index
    /// entries are full rows; secondary entries hold the index key columns.
    pub fn scan(&self, index: &IndexInfo, ranges: Option<&RangeSet<Tuple>>) -> Result<Vec<Tuple>> {
        if index.is_primary() {
            let output = index.output_columns();
            let rows = match ranges {
                None => self.rows.values().map(|row| row.project(&output)).collect(),
                Some(ranges) => self
                    .keys_in(ranges)
                    .into_iter()
                    .filter_map(|key| self.rows.get(key))
                    .map(|row| row.project(&output))
                    .collect(),
            };
            return Ok(rows);
        }
        let secondary = self.secondary(index)?;
        Ok(match ranges {
            None => secondary.entries.iter().cloned().collect(),
            Some(ranges) => secondary.entries_in(ranges).into_iter().cloned().collect(),
        })
    }

    pub fn count(&self, index: &IndexInfo, ranges: Option<&RangeSet<Tuple>>) -> u64 {
        let count = if index.is_primary() {
            match ranges {
                None => self.rows.len(),
                Some(ranges) => self.keys_in(ranges).len(),
            }
        } else {
            match (self.secondary(index), ranges) {
                (Err(_), _) => 0,
                (Ok(secondary), None) => secondary.entries.len(),
                (Ok(secondary), Some(ranges)) => secondary.entries_in(ranges).len(),
            }
        };
        count as u64
    }

    fn keys_in(&self, ranges: &RangeSet<Tuple>) -> Vec<&Tuple> {
        keys_in_ranges(ranges, |start| self.rows.range((start, Bound::Unbounded)).map(|(k, _)| k))
    }

    fn secondary(&self, index: &IndexInfo) -> Result<&SecondaryIndex> {
        self.indexes.get(&index.id).ok_or_else(|| {
            OrmError::ExecutionError(format!(
                "Index '{}' does not belong to {}",
                index.name, self.hierarchy
            ))
        })
    }
}

/// Keys inside `ranges`, in order. `from` iterates the stored keys starting
/// at a bound.
fn keys_in_ranges<'a, I>(
    ranges: &RangeSet<Tuple>,
    from: impl Fn(Bound<Tuple>) -> I,
) -> Vec<&'a Tuple>
where
    I: Iterator<Item = &'a Tuple>,
{
    let mut keys = Vec::new();
    for range in ranges.ranges() {
        let start = match &range.low {
            // a bound prefix sorts before all of its extensions
            Entire::Value(value, _) => Bound::Included(value.clone()),
            _ => Bound::Unbounded,
        };
        for key in from(start) {
            let point = Entire::exact(key.clone());
            if point > range.high {
                break;
            }
            if point >= range.low {
                keys.push(key);
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::model::DomainBuilder;
    use crate::range::Range;

    fn table() -> (Table, IndexInfo, IndexInfo) {
        let mut builder = DomainBuilder::new();
        builder.entity("Item", |t| {
            t.key("Id", DataType::Integer)
                .field("Rank", DataType::Integer)
                .unique_index("IX_Rank", &["Rank"]);
        });
        let model = builder.build().unwrap();
        let item = model.type_by_name("Item").unwrap();
        let hierarchy = model.hierarchy(item.id);
        let indexes: Vec<IndexInfo> =
            hierarchy.indexes.iter().map(|&i| model.index(i).clone()).collect();
        let primary = model.index(hierarchy.primary_index).clone();
        let secondary = indexes.iter().find(|i| i.is_secondary()).unwrap().clone();
        (Table::new(hierarchy, indexes), primary, secondary)
    }

    fn row(id: i64, rank: i64) -> Tuple {
        Tuple::from_values([Value::Integer(id), Value::Integer(0), Value::Integer(rank)])
    }

    #[test]
    fn test_insert_update_delete() {
        let (mut table, primary, secondary) = table();
        table.insert(row(1, 10)).unwrap();
        table.insert(row(2, 20)).unwrap();
        assert!(table.insert(row(1, 30)).is_err());
        assert!(table.insert(row(3, 10)).is_err());

        let key = Tuple::from_values([Value::Integer(2)]);
        let mut values = Tuple::new(3);
        values.set(2, Value::Integer(25));
        table.update(&key, &values).unwrap();
        assert_eq!(table.get(&key).unwrap().get(2), Some(&Value::Integer(25)));

        let entries = table.scan(&secondary, None).unwrap();
        assert_eq!(entries, vec![
            Tuple::from_values([Value::Integer(10), Value::Integer(1)]),
            Tuple::from_values([Value::Integer(25), Value::Integer(2)]),
        ]);

        table.delete(&key).unwrap();
        assert_eq!(table.count(&primary, None), 1);
        assert_eq!(table.count(&secondary, None), 1);
    }

    #[test]
    fn test_range_scan() {
        let (mut table, primary, secondary) = table();
        for id in 1..=10 {
            table.insert(row(id, id * 10)).unwrap();
        }
        let single = |v: i64| Tuple::from_values([Value::Integer(v)]);
        let ranges = RangeSet::from_ranges([
            Range::prefix(single(3)),
            Range::new(Entire::after(single(7)), Entire::PositiveInfinity),
        ]);
        let rows = table.scan(&primary, Some(&ranges)).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get(0).cloned().unwrap()).collect();
        let expected: Vec<Value> = [3, 8, 9, 10].into_iter().map(Value::Integer).collect();
        assert_eq!(ids, expected);

        let within = Range::new(Entire::before(single(50)), Entire::after(single(70)));
        let ranges = RangeSet::from_ranges([within]);
        assert_eq!(table.count(&secondary, Some(&ranges)), 3);
        assert_eq!(table.scan(&secondary, Some(&ranges)).unwrap().len(), 3);
    }
}
