use crate::model::IndexInfo;
use crate::query::ParameterContext;
use crate::range::RangeSetInfo;
use crate::storage::StatisticsProvider;
use std::fmt;

/// Share of an index assumed to match a parametrized range with a pinned
/// first key column.
const POINT_SELECTIVITY: f64 = 0.01;

/// Share of an index assumed to match any other parametrized range.
const RANGE_SELECTIVITY: f64 = 0.33;

/// Estimated cost of reading ranges of an index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexCost {
    /// Index entries read
    pub record_count: f64,

    /// Separate range seeks
    pub seek_count: f64,
}

impl IndexCost {
    pub fn total(&self) -> f64 {
        self.record_count + self.seek_count
    }
}

impl fmt::Display for IndexCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "records={:.1} seeks={:.1}", self.record_count, self.seek_count)
    }
}

pub struct CostEstimator<'a> {
    statistics: &'a dyn StatisticsProvider,
    parameters: Option<&'a ParameterContext>,
}

impl<'a> CostEstimator<'a> {
    pub fn new(
        statistics: &'a dyn StatisticsProvider,
        parameters: Option<&'a ParameterContext>,
    ) -> Self {
        Self { statistics, parameters }
    }

    /// Concrete counts when the ranges can be evaluated, selectivity
    /// heuristics otherwise.
    pub fn estimate(&self, index: &IndexInfo, ranges: &RangeSetInfo) -> IndexCost {
        let empty = ParameterContext::new();
        let parameters = match self.parameters {
            Some(parameters) => Some(parameters),
            None if !ranges.is_parametrized() => Some(&empty),
            None => None,
        };
        if let Some(parameters) = parameters
            && let Ok(set) = ranges.evaluate(parameters)
        {
            return IndexCost {
                record_count: self.statistics.count_in_ranges(index.id, &set) as f64,
                seek_count: set.len() as f64,
            };
        }
        let selectivity = if ranges.has_point_prefix() {
            POINT_SELECTIVITY
        } else {
            RANGE_SELECTIVITY
        };
        IndexCost {
            record_count: self.statistics.record_count(index.id) as f64 * selectivity,
            seek_count: ranges.part_count() as f64,
        }
    }
}
