// ============================================================================
// Index Optimization
// ============================================================================
//
// Rewrites filters over primary indexes to read narrower ranges, possibly of
// secondary indexes joined back to the primary index:
//
//   Filter(p, Index(PK))
//     => Filter(p, Union(RangeSet(Index(PK), r1),
//                        Select(Join(Select(RangeSet(Index(IX), r2)), Index(PK)))))
//
// The predicate is normalized to DNF, key ranges are extracted per disjunct
// and candidate index, and the cheapest index is chosen per disjunct. Trees
// that cannot be improved are returned as the very same `Arc`.
//
// Extracted ranges are cached per predicate; costs are taken from the
// statistics on every call.
//
// ============================================================================

pub mod cost;
pub mod extractor;
pub mod rewriter;
pub mod selector;

pub use cost::{CostEstimator, IndexCost};
pub use extractor::RangeSetExtractor;
pub use selector::{DisjunctRanges, IndexSelection, IndexSelector, extract_ranges};

use crate::config::OptimizerConfiguration;
use crate::core::IndexId;
use crate::model::{DomainModel, IndexInfo};
use crate::query::{DnfNormalizer, Expr, FilterNode, ParameterContext, Provider};
use crate::server_info::{QueryFeatures, ServerInfo};
use crate::storage::StatisticsProvider;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, debug_span};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanCacheKey {
    primary: IndexId,
    predicate: String,
}

/// Domain-wide index optimizer.
pub struct IndexOptimizer {
    model: Arc<DomainModel>,
    normalizer: DnfNormalizer,
    enabled: bool,
    plans: Mutex<LruCache<PlanCacheKey, Option<Arc<Vec<DisjunctRanges>>>>>,
}

impl IndexOptimizer {
    pub fn new(model: Arc<DomainModel>, config: &OptimizerConfiguration) -> Self {
        let capacity = NonZeroUsize::new(config.plan_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            model,
            normalizer: DnfNormalizer::new(config.max_normalized_terms),
            enabled: config.enabled,
            plans: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of predicates with cached range extraction.
    pub fn cached_plan_count(&self) -> usize {
        self.plans.lock().map_or(0, |plans| plans.len())
    }

    pub fn clear_cache(&self) {
        if let Ok(mut plans) = self.plans.lock() {
            plans.clear();
        }
    }

    /// Rewrites every filter over a primary index in `provider`.
    ///
    /// Without a parameter context, ranges that depend on parameters are
    /// costed by heuristics. Subtrees that are not rewritten keep their
    /// identity.
    pub fn optimize(
        &self,
        provider: &Arc<Provider>,
        statistics: &dyn StatisticsProvider,
        server: &ServerInfo,
        parameters: Option<&ParameterContext>,
    ) -> Arc<Provider> {
        if !self.enabled {
            return Arc::clone(provider);
        }
        let _span = debug_span!("optimize", provider = provider.name()).entered();
        self.rewrite(provider, statistics, server, parameters)
    }

    fn rewrite(
        &self,
        provider: &Arc<Provider>,
        statistics: &dyn StatisticsProvider,
        server: &ServerInfo,
        parameters: Option<&ParameterContext>,
    ) -> Arc<Provider> {
        let sources = provider.sources();
        let rewritten: Vec<Arc<Provider>> = sources
            .iter()
            .map(|source| self.rewrite(source, statistics, server, parameters))
            .collect();
        let changed = sources
            .iter()
            .zip(&rewritten)
            .any(|(old, new)| !Arc::ptr_eq(old, new));
        let current = if changed {
            provider.with_sources(rewritten)
        } else {
            Arc::clone(provider)
        };

        match current.as_ref() {
            Provider::Filter(node) => self
                .rewrite_filter(node, statistics, server, parameters)
                .map(|source| current.with_sources(vec![source]))
                .unwrap_or(current),
            _ => current,
        }
    }

    /// New source for the filter, if a cheaper one exists.
    fn rewrite_filter(
        &self,
        node: &FilterNode,
        statistics: &dyn StatisticsProvider,
        server: &ServerInfo,
        parameters: Option<&ParameterContext>,
    ) -> Option<Arc<Provider>> {
        let Provider::Index(source) = node.source.as_ref() else {
            return None;
        };
        let primary = self.model.index(source.index);
        if !primary.is_primary() {
            return None;
        }

        let selections = self.select(primary, &node.predicate, statistics, parameters)?;
        if selections.len() > 1 && !server.query().features.contains(QueryFeatures::UNION) {
            debug!(index = %primary.name, "several indexes selected but UNION is not supported");
            return None;
        }
        match rewriter::rewrite_selections(&self.model, primary, &selections) {
            Ok(rewritten) => {
                debug!(index = %primary.name, selections = selections.len(), "filter rewritten");
                Some(rewritten)
            }
            Err(e) => {
                debug!(index = %primary.name, error = %e, "rewrite failed");
                None
            }
        }
    }

    fn select(
        &self,
        primary: &IndexInfo,
        predicate: &Expr,
        statistics: &dyn StatisticsProvider,
        parameters: Option<&ParameterContext>,
    ) -> Option<Vec<IndexSelection>> {
        let hierarchy = self.model.hierarchy(primary.hierarchy);
        let candidates: Vec<&IndexInfo> = hierarchy
            .indexes
            .iter()
            .map(|&id| self.model.index(id))
            .filter(|index| index.is_secondary() && !index.is_filtered())
            .collect();
        let disjuncts = self.extract(primary, &candidates, predicate)?;
        // costs follow the current statistics, only the extraction is cached
        let estimator = CostEstimator::new(statistics, parameters);
        IndexSelector::new(primary, candidates, estimator).select_extracted(&disjuncts)
    }

    /// Ranges of every disjunct of `predicate`, or `None` when it is too
    /// complex to normalize.
    fn extract(
        &self,
        primary: &IndexInfo,
        candidates: &[&IndexInfo],
        predicate: &Expr,
    ) -> Option<Arc<Vec<DisjunctRanges>>> {
        let cache_key = PlanCacheKey {
            primary: primary.id,
            predicate: predicate.to_string(),
        };
        if let Ok(mut plans) = self.plans.lock()
            && let Some(extracted) = plans.get(&cache_key)
        {
            return extracted.clone();
        }

        let extracted = match self.normalizer.normalize(predicate) {
            Ok(dnf) => Some(Arc::new(extract_ranges(primary, candidates, &dnf))),
            Err(e) => {
                debug!(index = %primary.name, error = %e, "predicate left unoptimized");
                None
            }
        };
        if let Ok(mut plans) = self.plans.lock() {
            plans.put(cache_key, extracted.clone());
        }
        extracted
    }
}
