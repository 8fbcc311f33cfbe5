use super::Expr;
use crate::core::IndexId;
use crate::model::DomainModel;
use crate::range::RangeSetInfo;
use std::fmt;
use std::sync::Arc;

/// Node of a compiled query.
///
/// Trees are immutable and shared through `Arc`; rewrites build new nodes
/// and reuse untouched subtrees.
#[derive(Debug, Clone)]
pub enum Provider {
    /// Scan of an index; outputs the index columns
    Index(IndexNode),

    /// Rows of the source for which the predicate is true
    Filter(FilterNode),

    /// Projection onto source column positions
    Select(SelectNode),

    Sort(SortNode),

    /// First `count` rows, optionally per group of equal partition columns
    Take(TakeNode),

    Skip(SkipNode),

    /// Index scan restricted to a set of key ranges
    RangeSet(RangeSetNode),

    /// Inner equi-join; outputs left columns followed by right columns
    Join(JoinNode),

    /// Rows of both sources without duplicates
    Union(UnionNode),
}

#[derive(Debug, Clone)]
pub struct IndexNode {
    pub index: IndexId,
}

#[derive(Debug, Clone)]
pub struct FilterNode {
    pub source: Arc<Provider>,
    pub predicate: Expr,
}

#[derive(Debug, Clone)]
pub struct SelectNode {
    pub source: Arc<Provider>,
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct SortNode {
    pub source: Arc<Provider>,
    /// Column position and descending flag
    pub order: Vec<(usize, bool)>,
}

#[derive(Debug, Clone)]
pub struct TakeNode {
    pub source: Arc<Provider>,
    pub count: usize,
    pub partition: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct SkipNode {
    pub source: Arc<Provider>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct RangeSetNode {
    pub source: Arc<Provider>,
    pub ranges: RangeSetInfo,
}

#[derive(Debug, Clone)]
pub struct JoinNode {
    pub left: Arc<Provider>,
    pub right: Arc<Provider>,
    /// Pairs of (left position, right position) that must be equal
    pub equalities: Vec<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct UnionNode {
    pub left: Arc<Provider>,
    pub right: Arc<Provider>,
}

impl Provider {
    pub fn index(index: IndexId) -> Arc<Provider> {
        Arc::new(Provider::Index(IndexNode { index }))
    }

    pub fn filter(source: Arc<Provider>, predicate: Expr) -> Arc<Provider> {
        Arc::new(Provider::Filter(FilterNode { source, predicate }))
    }

    pub fn select(source: Arc<Provider>, columns: Vec<usize>) -> Arc<Provider> {
        Arc::new(Provider::Select(SelectNode { source, columns }))
    }

    pub fn sort(source: Arc<Provider>, order: Vec<(usize, bool)>) -> Arc<Provider> {
        Arc::new(Provider::Sort(SortNode { source, order }))
    }

    pub fn take(source: Arc<Provider>, count: usize) -> Arc<Provider> {
        Arc::new(Provider::Take(TakeNode {
            source,
            count,
            partition: Vec::new(),
        }))
    }

    /// `count` rows per distinct value of the partition columns.
    pub fn take_per_group(
        source: Arc<Provider>,
        count: usize,
        partition: Vec<usize>,
    ) -> Arc<Provider> {
        Arc::new(Provider::Take(TakeNode {
            source,
            count,
            partition,
        }))
    }

    pub fn skip(source: Arc<Provider>, count: usize) -> Arc<Provider> {
        Arc::new(Provider::Skip(SkipNode { source, count }))
    }

    pub fn range_set(source: Arc<Provider>, ranges: RangeSetInfo) -> Arc<Provider> {
        Arc::new(Provider::RangeSet(RangeSetNode { source, ranges }))
    }

    pub fn join(
        left: Arc<Provider>,
        right: Arc<Provider>,
        equalities: Vec<(usize, usize)>,
    ) -> Arc<Provider> {
        Arc::new(Provider::Join(JoinNode {
            left,
            right,
            equalities,
        }))
    }

    pub fn union(left: Arc<Provider>, right: Arc<Provider>) -> Arc<Provider> {
        Arc::new(Provider::Union(UnionNode { left, right }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Index(_) => "Index",
            Provider::Filter(_) => "Filter",
            Provider::Select(_) => "Select",
            Provider::Sort(_) => "Sort",
            Provider::Take(_) => "Take",
            Provider::Skip(_) => "Skip",
            Provider::RangeSet(_) => "RangeSet",
            Provider::Join(_) => "Join",
            Provider::Union(_) => "Union",
        }
    }

    pub fn sources(&self) -> Vec<&Arc<Provider>> {
        match self {
            Provider::Index(_) => Vec::new(),
            Provider::Filter(node) => vec![&node.source],
            Provider::Select(node) => vec![&node.source],
            Provider::Sort(node) => vec![&node.source],
            Provider::Take(node) => vec![&node.source],
            Provider::Skip(node) => vec![&node.source],
            Provider::RangeSet(node) => vec![&node.source],
            Provider::Join(node) => vec![&node.left, &node.right],
            Provider::Union(node) => vec![&node.left, &node.right],
        }
    }

    /// Copy of this node over new sources, in `sources()` order.
    pub fn with_sources(&self, mut sources: Vec<Arc<Provider>>) -> Arc<Provider> {
        let mut next = || sources.remove(0);
        Arc::new(match self {
            Provider::Index(node) => Provider::Index(node.clone()),
            Provider::Filter(node) => Provider::Filter(FilterNode {
                source: next(),
                predicate: node.predicate.clone(),
            }),
            Provider::Select(node) => Provider::Select(SelectNode {
                source: next(),
                columns: node.columns.clone(),
            }),
            Provider::Sort(node) => Provider::Sort(SortNode {
                source: next(),
                order: node.order.clone(),
            }),
            Provider::Take(node) => Provider::Take(TakeNode {
                source: next(),
                count: node.count,
                partition: node.partition.clone(),
            }),
            Provider::Skip(node) => Provider::Skip(SkipNode {
                source: next(),
                count: node.count,
            }),
            Provider::RangeSet(node) => Provider::RangeSet(RangeSetNode {
                source: next(),
                ranges: node.ranges.clone(),
            }),
            Provider::Join(node) => {
                let left = next();
                Provider::Join(JoinNode {
                    left,
                    right: next(),
                    equalities: node.equalities.clone(),
                })
            }
            Provider::Union(_) => {
                let left = next();
                Provider::Union(UnionNode { left, right: next() })
            }
        })
    }

    /// Number of output columns.
    pub fn width(&self, model: &DomainModel) -> usize {
        match self {
            Provider::Index(node) => {
                let index = model.index(node.index);
                index.key_columns.len() + index.value_columns.len()
            }
            Provider::Filter(node) => node.source.width(model),
            Provider::Select(node) => node.columns.len(),
            Provider::Sort(node) => node.source.width(model),
            Provider::Take(node) => node.source.width(model),
            Provider::Skip(node) => node.source.width(model),
            Provider::RangeSet(node) => node.source.width(model),
            Provider::Join(node) => node.left.width(model) + node.right.width(model),
            Provider::Union(node) => node.left.width(model),
        }
    }

    /// Whether any range restriction or filter of the tree uses parameters.
    pub fn is_parametrized(&self) -> bool {
        let own = match self {
            Provider::Filter(node) => node.predicate.has_parameters(),
            Provider::RangeSet(node) => node.ranges.is_parametrized(),
            _ => false,
        };
        own || self.sources().iter().any(|s| s.is_parametrized())
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.name(), indent = depth * 2)?;
        match self {
            Provider::Index(node) => write!(f, " {}", node.index)?,
            Provider::Filter(node) => write!(f, " {}", node.predicate)?,
            Provider::Select(node) => write!(f, " {:?}", node.columns)?,
            Provider::Sort(node) => write!(f, " {:?}", node.order)?,
            Provider::Take(node) if node.partition.is_empty() => write!(f, " {}", node.count)?,
            Provider::Take(node) => write!(f, " {} per {:?}", node.count, node.partition)?,
            Provider::Skip(node) => write!(f, " {}", node.count)?,
            Provider::RangeSet(node) => write!(f, " {}", node.ranges)?,
            Provider::Join(node) => write!(f, " {:?}", node.equalities)?,
            Provider::Union(_) => {}
        }
        writeln!(f)?;
        for source in self.sources() {
            source.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_sources_keeps_shape() {
        let left = Provider::index(IndexId(0));
        let right = Provider::index(IndexId(1));
        let join = Provider::join(left, right, vec![(0, 0)]);
        let replaced =
            join.with_sources(vec![Provider::index(IndexId(2)), Provider::index(IndexId(3))]);
        let Provider::Join(node) = replaced.as_ref() else {
            panic!("expected join");
        };
        assert!(matches!(node.left.as_ref(), Provider::Index(IndexNode { index: IndexId(2) })));
        assert!(matches!(node.right.as_ref(), Provider::Index(IndexNode { index: IndexId(3) })));
        assert_eq!(node.equalities, vec![(0, 0)]);
    }

    #[test]
    fn test_display_tree() {
        let tree = Provider::take(
            Provider::filter(Provider::index(IndexId(0)), Expr::column(1).eq(Expr::parameter("x"))),
            10,
        );
        let text = tree.to_string();
        assert!(text.starts_with("Take 10\n  Filter (#1 = @x)\n    Index I0"));
        assert!(tree.is_parametrized());
    }
}
