use crate::core::Result;
use serde::{Deserialize, Serialize};

/// Domain-wide tuning knobs.
///
/// Built with chained setters or read from JSON; every field has a default so
/// partial documents are accepted.
///
/// ```
/// use memorm::DomainConfiguration;
///
/// let config = DomainConfiguration::default()
///     .max_normalized_terms(64)
///     .max_container_count(20);
/// assert_eq!(config.optimizer.max_normalized_terms, 64);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfiguration {
    pub optimizer: OptimizerConfiguration,
    pub prefetch: PrefetchConfiguration,
    pub session: SessionConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfiguration {
    /// Rewrite filters over primary indexes to use secondary indexes
    pub enabled: bool,

    /// Upper bound for the number of disjuncts (and the terms of a single
    /// disjunct) produced by DNF normalization
    pub max_normalized_terms: usize,

    /// Capacity of the per-domain index selection cache
    pub plan_cache_capacity: usize,
}

impl Default for OptimizerConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            max_normalized_terms: 100,
            plan_cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfiguration {
    /// Number of buffered graph containers that triggers a flush
    pub max_container_count: usize,

    /// Capacity of the column selection cache
    pub column_cache_capacity: usize,

    /// Maximum number of keys in a single entity group query
    pub max_keys_per_query: usize,

    /// Item limit applied to entity set prefetch when a descriptor has none
    pub default_entity_set_item_limit: Option<usize>,
}

impl Default for PrefetchConfiguration {
    fn default() -> Self {
        Self {
            max_container_count: 100,
            column_cache_capacity: 256,
            max_keys_per_query: 40,
            default_entity_set_item_limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfiguration {
    /// Drop tracked non-paired references after every successful persist
    pub clear_references_on_persist: bool,
}

impl DomainConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Enable or disable index optimization
    pub fn optimizer_enabled(mut self, enabled: bool) -> Self {
        self.optimizer.enabled = enabled;
        self
    }

    /// Set the DNF normalization bound
    pub fn max_normalized_terms(mut self, limit: usize) -> Self {
        self.optimizer.max_normalized_terms = limit;
        self
    }

    /// Set the index selection cache capacity
    pub fn plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.optimizer.plan_cache_capacity = capacity;
        self
    }

    /// Set the prefetch flush threshold
    pub fn max_container_count(mut self, count: usize) -> Self {
        self.prefetch.max_container_count = count;
        self
    }

    /// Set the column cache capacity
    pub fn column_cache_capacity(mut self, capacity: usize) -> Self {
        self.prefetch.column_cache_capacity = capacity;
        self
    }

    /// Set the maximum key count of one entity group query
    pub fn max_keys_per_query(mut self, count: usize) -> Self {
        self.prefetch.max_keys_per_query = count;
        self
    }

    /// Set the default entity set item limit
    pub fn default_entity_set_item_limit(mut self, limit: usize) -> Self {
        self.prefetch.default_entity_set_item_limit = Some(limit);
        self
    }

    /// Clear tracked references on persist
    pub fn clear_references_on_persist(mut self, clear: bool) -> Self {
        self.session.clear_references_on_persist = clear;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DomainConfiguration::default();
        assert!(config.optimizer.enabled);
        assert_eq!(config.optimizer.max_normalized_terms, 100);
        assert_eq!(config.prefetch.max_container_count, 100);
        assert_eq!(config.prefetch.default_entity_set_item_limit, None);
    }

    #[test]
    fn test_from_partial_json() {
        let config = DomainConfiguration::from_json(
            r#"{
                "optimizer": { "max_normalized_terms": 8 },
                "prefetch": { "max_keys_per_query": 3 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.optimizer.max_normalized_terms, 8);
        assert!(config.optimizer.enabled);
        assert_eq!(config.prefetch.max_keys_per_query, 3);
        assert_eq!(config.prefetch.column_cache_capacity, 256);
    }

    #[test]
    fn test_from_invalid_json() {
        assert!(DomainConfiguration::from_json("{ not json").is_err());
    }
}
