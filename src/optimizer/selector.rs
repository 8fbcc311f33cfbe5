use super::cost::{CostEstimator, IndexCost};
use super::extractor::RangeSetExtractor;
use crate::core::IndexId;
use crate::model::IndexInfo;
use crate::query::DisjunctiveNormalForm;
use crate::range::RangeSetInfo;
use tracing::trace;

/// Index chosen to read a part of a filtered primary index, with the ranges
/// to read.
#[derive(Debug, Clone)]
pub struct IndexSelection {
    pub index: IndexId,
    pub ranges: RangeSetInfo,
}

/// Ranges one disjunct implies on the primary index and on every candidate
/// it restricts. Independent of statistics and parameter values.
#[derive(Debug, Clone)]
pub struct DisjunctRanges {
    pub primary: RangeSetInfo,
    pub candidates: Vec<(IndexId, RangeSetInfo)>,
}

/// Picks the cheapest index per disjunct.
///
/// The primary index wins whenever its record count does not exceed the
/// record count of the best secondary candidate.
pub struct IndexSelector<'a> {
    primary: &'a IndexInfo,
    candidates: Vec<&'a IndexInfo>,
    estimator: CostEstimator<'a>,
}

impl<'a> IndexSelector<'a> {
    pub fn new(
        primary: &'a IndexInfo,
        candidates: Vec<&'a IndexInfo>,
        estimator: CostEstimator<'a>,
    ) -> Self {
        Self {
            primary,
            candidates,
            estimator,
        }
    }

    /// Selections grouped by index in first-use order, or `None` when some
    /// disjunct has to scan the whole primary index.
    pub fn select(&self, dnf: &DisjunctiveNormalForm) -> Option<Vec<IndexSelection>> {
        self.select_extracted(&extract_ranges(self.primary, &self.candidates, dnf))
    }

    /// Same as [`IndexSelector::select`] over ranges extracted earlier.
    pub fn select_extracted(&self, disjuncts: &[DisjunctRanges]) -> Option<Vec<IndexSelection>> {
        if disjuncts.is_empty() {
            return None;
        }
        let mut grouped: Vec<(IndexId, Vec<RangeSetInfo>)> = Vec::new();
        for disjunct in disjuncts {
            let (index, ranges) = self.select_disjunct(disjunct)?;
            match grouped.iter_mut().find(|(id, _)| *id == index) {
                Some((_, parts)) => parts.push(ranges),
                None => grouped.push((index, vec![ranges])),
            }
        }
        Some(
            grouped
                .into_iter()
                .map(|(index, mut parts)| IndexSelection {
                    index,
                    ranges: if parts.len() == 1 {
                        parts.remove(0)
                    } else {
                        RangeSetInfo::union(parts)
                    },
                })
                .collect(),
        )
    }

    fn select_disjunct(&self, disjunct: &DisjunctRanges) -> Option<(IndexId, RangeSetInfo)> {
        let primary_cost = self.estimator.estimate(self.primary, &disjunct.primary);

        let mut best: Option<(IndexId, &RangeSetInfo, IndexCost)> = None;
        for (id, ranges) in &disjunct.candidates {
            let Some(candidate) = self.candidates.iter().find(|c| c.id == *id) else {
                continue;
            };
            let cost = self.estimator.estimate(candidate, ranges);
            trace!(index = %candidate.name, %cost, "candidate index");
            if best.as_ref().is_none_or(|(_, _, b)| cost.total() < b.total()) {
                best = Some((*id, ranges, cost));
            }
        }

        match best {
            Some((index, ranges, cost)) if primary_cost.record_count > cost.record_count => {
                Some((index, ranges.clone()))
            }
            _ if disjunct.primary.is_full() => None,
            _ => Some((self.primary.id, disjunct.primary.clone())),
        }
    }
}

/// Extracts the ranges of every disjunct. Candidates the disjunct does not
/// restrict are left out.
pub fn extract_ranges(
    primary: &IndexInfo,
    candidates: &[&IndexInfo],
    dnf: &DisjunctiveNormalForm,
) -> Vec<DisjunctRanges> {
    dnf.disjuncts
        .iter()
        .map(|terms| DisjunctRanges {
            primary: RangeSetExtractor::new(primary).extract(terms),
            candidates: candidates
                .iter()
                .map(|candidate| (candidate.id, RangeSetExtractor::new(candidate).extract(terms)))
                .filter(|(_, ranges)| !ranges.is_full())
                .collect(),
        })
        .collect()
}
