// ============================================================================
// Query Layer
// ============================================================================
//
// Predicate expressions, their three-valued evaluation, named parameters,
// DNF normalization, the provider tree that compiled queries are made of and
// its SQL rendering for a described backend.
//
// ============================================================================

pub mod compiler;
pub mod evaluator;
pub mod expr;
pub mod normalizer;
pub mod parameter;
pub mod provider;

pub use compiler::{CompiledQuery, SqlCompiler};
pub use evaluator::ExpressionEvaluator;
pub use expr::{BinaryOp, Expr, Function};
pub use normalizer::{DisjunctiveNormalForm, DnfNormalizer};
pub use parameter::ParameterContext;
pub use provider::{
    FilterNode, IndexNode, JoinNode, Provider, RangeSetNode, SelectNode, SkipNode, SortNode,
    TakeNode, UnionNode,
};
