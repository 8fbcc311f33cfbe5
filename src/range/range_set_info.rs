use super::{Entire, Range, RangeSet};
use crate::core::{Result, Tuple, Value};
use crate::query::ParameterContext;
use std::fmt;
use std::sync::OnceLock;

/// Upper bound of equality prefixes expanded into separate ranges before the
/// remaining columns are treated as unrestricted.
const MAX_PREFIX_COMBINATIONS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Parameter(String),
}

impl Operand {
    fn resolve<'a>(&'a self, parameters: &'a ParameterContext) -> Result<&'a Value> {
        match self {
            Operand::Literal(value) => Ok(value),
            Operand::Parameter(name) => parameters.get(name),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{}", value),
            Operand::Parameter(name) => write!(f, "@{}", name),
        }
    }
}

/// Restriction of one index key column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnConstraint {
    pub op: ConstraintOp,
    /// Absent for `IS [NOT] NULL`
    pub operand: Option<Operand>,
}

impl ColumnConstraint {
    pub fn new(op: ConstraintOp, operand: Operand) -> Self {
        Self {
            op,
            operand: Some(operand),
        }
    }

    pub fn is_null(negated: bool) -> Self {
        Self {
            op: if negated { ConstraintOp::IsNotNull } else { ConstraintOp::IsNull },
            operand: None,
        }
    }

    fn is_parametrized(&self) -> bool {
        matches!(self.operand, Some(Operand::Parameter(_)))
    }

    /// Ranges of single-value tuples selected by the constraint. Comparisons
    /// never select NULL.
    pub fn evaluate(&self, parameters: &ParameterContext) -> Result<RangeSet<Tuple>> {
        let single = |value: &Value| Tuple::from_values([value.clone()]);
        let above_null = || Entire::after(single(&Value::Null));

        let value = match (&self.op, &self.operand) {
            (ConstraintOp::IsNull, _) => {
                return Ok(RangeSet::from_ranges([Range::prefix(single(&Value::Null))]));
            }
            (ConstraintOp::IsNotNull, _) => {
                let range = Range::new(above_null(), Entire::PositiveInfinity);
                return Ok(RangeSet::from_ranges([range]));
            }
            (_, Some(operand)) => operand.resolve(parameters)?,
            (_, None) => return Ok(RangeSet::full()),
        };
        if value.is_null() {
            return Ok(RangeSet::empty());
        }
        let v = single(value);
        let ranges = match self.op {
            ConstraintOp::Eq => vec![Range::prefix(v)],
            ConstraintOp::NotEq => vec![
                Range::new(above_null(), Entire::before(v.clone())),
                Range::new(Entire::after(v), Entire::PositiveInfinity),
            ],
            ConstraintOp::Lt => vec![Range::new(above_null(), Entire::before(v))],
            ConstraintOp::LtEq => vec![Range::new(above_null(), Entire::after(v))],
            ConstraintOp::Gt => vec![Range::new(Entire::after(v), Entire::PositiveInfinity)],
            ConstraintOp::GtEq => vec![Range::new(Entire::before(v), Entire::PositiveInfinity)],
            ConstraintOp::IsNull | ConstraintOp::IsNotNull => Vec::new(),
        };
        Ok(RangeSet::from_ranges(ranges))
    }
}

impl fmt::Display for ColumnConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            ConstraintOp::Eq => "=",
            ConstraintOp::NotEq => "<>",
            ConstraintOp::Lt => "<",
            ConstraintOp::LtEq => "<=",
            ConstraintOp::Gt => ">",
            ConstraintOp::GtEq => ">=",
            ConstraintOp::IsNull => return write!(f, "IS NULL"),
            ConstraintOp::IsNotNull => return write!(f, "IS NOT NULL"),
        };
        match &self.operand {
            Some(operand) => write!(f, "{} {}", op, operand),
            None => write!(f, "{}", op),
        }
    }
}

#[derive(Debug, Clone)]
enum RangeSetKind {
    Constant(RangeSet<Tuple>),
    /// Constraints per index key position
    Conjunction(Vec<Vec<ColumnConstraint>>),
    Union(Vec<RangeSetInfo>),
    Intersection(Vec<RangeSetInfo>),
}

/// Symbolic range set over index keys, evaluated lazily under a parameter
/// context. Parameter-free infos evaluate once.
#[derive(Debug, Clone)]
pub struct RangeSetInfo {
    kind: RangeSetKind,
    cached: OnceLock<RangeSet<Tuple>>,
}

impl RangeSetInfo {
    fn from_kind(kind: RangeSetKind) -> Self {
        Self {
            kind,
            cached: OnceLock::new(),
        }
    }

    pub fn constant(set: RangeSet<Tuple>) -> Self {
        Self::from_kind(RangeSetKind::Constant(set))
    }

    pub fn full() -> Self {
        Self::constant(RangeSet::full())
    }

    pub fn empty() -> Self {
        Self::constant(RangeSet::empty())
    }

    /// Ranges selected by per-key-position constraints that all must hold.
    pub fn conjunction(constraints: Vec<Vec<ColumnConstraint>>) -> Self {
        Self::from_kind(RangeSetKind::Conjunction(constraints))
    }

    pub fn union(infos: Vec<RangeSetInfo>) -> Self {
        Self::from_kind(RangeSetKind::Union(infos))
    }

    pub fn intersection(infos: Vec<RangeSetInfo>) -> Self {
        Self::from_kind(RangeSetKind::Intersection(infos))
    }

    /// Whether the info selects every key regardless of parameter values.
    pub fn is_full(&self) -> bool {
        match &self.kind {
            RangeSetKind::Constant(set) => set.is_full(),
            RangeSetKind::Conjunction(constraints) => constraints.first().is_none_or(Vec::is_empty),
            RangeSetKind::Union(infos) => infos.iter().any(RangeSetInfo::is_full),
            RangeSetKind::Intersection(infos) => infos.iter().all(RangeSetInfo::is_full),
        }
    }

    pub fn is_parametrized(&self) -> bool {
        match &self.kind {
            RangeSetKind::Constant(_) => false,
            RangeSetKind::Conjunction(constraints) => constraints
                .iter()
                .flatten()
                .any(ColumnConstraint::is_parametrized),
            RangeSetKind::Union(infos) | RangeSetKind::Intersection(infos) => {
                infos.iter().any(RangeSetInfo::is_parametrized)
            }
        }
    }

    /// Whether every part pins the first key column to single values.
    pub fn has_point_prefix(&self) -> bool {
        match &self.kind {
            RangeSetKind::Constant(set) => set.as_prefixes().is_some() && !set.is_empty(),
            RangeSetKind::Conjunction(constraints) => constraints
                .first()
                .is_some_and(|first| {
                    first
                        .iter()
                        .any(|c| matches!(c.op, ConstraintOp::Eq | ConstraintOp::IsNull))
                }),
            RangeSetKind::Union(infos) => {
                !infos.is_empty() && infos.iter().all(RangeSetInfo::has_point_prefix)
            }
            RangeSetKind::Intersection(infos) => infos.iter().any(RangeSetInfo::has_point_prefix),
        }
    }

    /// Number of symbolic parts, a lower bound of the range count.
    pub fn part_count(&self) -> usize {
        match &self.kind {
            RangeSetKind::Constant(set) => set.len(),
            RangeSetKind::Conjunction(_) => 1,
            RangeSetKind::Union(infos) => infos.iter().map(RangeSetInfo::part_count).sum(),
            RangeSetKind::Intersection(infos) => {
                infos.iter().map(RangeSetInfo::part_count).max().unwrap_or(1)
            }
        }
    }

    pub fn evaluate(&self, parameters: &ParameterContext) -> Result<RangeSet<Tuple>> {
        if let Some(set) = self.cached.get() {
            return Ok(set.clone());
        }
        let set = match &self.kind {
            RangeSetKind::Constant(set) => set.clone(),
            RangeSetKind::Conjunction(constraints) => {
                evaluate_conjunction(constraints, parameters)?
            }
            RangeSetKind::Union(infos) => {
                let mut result = RangeSet::empty();
                for info in infos {
                    result = result.union(&info.evaluate(parameters)?);
                }
                result
            }
            RangeSetKind::Intersection(infos) => {
                let mut result = RangeSet::full();
                for info in infos {
                    result = result.intersect(&info.evaluate(parameters)?);
                }
                result
            }
        };
        if !self.is_parametrized() {
            let _ = self.cached.set(set.clone());
        }
        Ok(set)
    }
}

fn evaluate_conjunction(
    constraints: &[Vec<ColumnConstraint>],
    parameters: &ParameterContext,
) -> Result<RangeSet<Tuple>> {
    let mut prefixes = vec![Tuple::default()];
    for column in constraints {
        if column.is_empty() {
            break;
        }
        let mut set = RangeSet::full();
        for constraint in column {
            set = set.intersect(&constraint.evaluate(parameters)?);
        }
        if set.is_empty() {
            return Ok(RangeSet::empty());
        }
        if let Some(points) = set.as_prefixes()
            && prefixes.len() * points.len() <= MAX_PREFIX_COMBINATIONS
        {
            prefixes = prefixes
                .iter()
                .flat_map(|prefix| points.iter().map(move |point| prefix.concat(point)))
                .collect();
            continue;
        }
        // first non-point column closes the prefix
        let ranges = prefixes.iter().flat_map(|prefix| {
            set.ranges()
                .iter()
                .map(move |range| {
                    Range::new(extend(prefix, &range.low), extend(prefix, &range.high))
                })
        });
        return Ok(RangeSet::from_ranges(ranges));
    }
    if prefixes.len() == 1 && prefixes[0].is_empty() {
        return Ok(RangeSet::full());
    }
    Ok(RangeSet::from_ranges(prefixes.into_iter().map(Range::prefix)))
}

fn extend(prefix: &Tuple, bound: &Entire<Tuple>) -> Entire<Tuple> {
    match bound {
        Entire::Value(value, shift) => Entire::Value(prefix.concat(value), *shift),
        Entire::NegativeInfinity if prefix.is_empty() => Entire::NegativeInfinity,
        Entire::NegativeInfinity => Entire::before(prefix.clone()),
        Entire::PositiveInfinity if prefix.is_empty() => Entire::PositiveInfinity,
        Entire::PositiveInfinity => Entire::after(prefix.clone()),
    }
}

impl fmt::Display for RangeSetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RangeSetKind::Constant(set) => write!(f, "{}", set),
            RangeSetKind::Conjunction(constraints) => {
                let mut first = true;
                for (position, column) in constraints.iter().enumerate() {
                    for constraint in column {
                        if !first {
                            write!(f, " AND ")?;
                        }
                        first = false;
                        write!(f, "k{} {}", position, constraint)?;
                    }
                }
                if first {
                    write!(f, "*")?;
                }
                Ok(())
            }
            RangeSetKind::Union(infos) | RangeSetKind::Intersection(infos) => {
                let separator = if matches!(self.kind, RangeSetKind::Union(_)) {
                    " | "
                } else {
                    " & "
                };
                let parts: Vec<String> = infos.iter().map(|i| format!("({})", i)).collect();
                write!(f, "{}", parts.join(separator))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: &[i64]) -> Tuple {
        Tuple::from_values(values.iter().map(|&v| Value::Integer(v)))
    }

    fn lit(v: i64) -> Operand {
        Operand::Literal(Value::Integer(v))
    }

    fn compare(op: ConstraintOp, v: i64) -> RangeSetInfo {
        RangeSetInfo::conjunction(vec![vec![ColumnConstraint::new(op, lit(v))]])
    }

    #[test]
    fn test_equality_prefix_then_range() {
        let info = RangeSetInfo::conjunction(vec![
            vec![ColumnConstraint::new(ConstraintOp::Eq, lit(1))],
            vec![ColumnConstraint::new(ConstraintOp::Gt, lit(10))],
        ]);
        let set = info.evaluate(&ParameterContext::new()).unwrap();
        assert!(set.contains(&key(&[1, 11])));
        assert!(!set.contains(&key(&[1, 10])));
        assert!(!set.contains(&key(&[2, 11])));
        assert!(!info.is_full());
        assert!(info.has_point_prefix());
    }

    #[test]
    fn test_comparisons_skip_null() {
        let info = compare(ConstraintOp::Lt, 5);
        let set = info.evaluate(&ParameterContext::new()).unwrap();
        let null_key = Tuple::from_values([Value::Null]);
        assert!(!set.contains(&null_key));
        assert!(set.contains(&key(&[4])));

        let is_null = RangeSetInfo::conjunction(vec![vec![ColumnConstraint::is_null(false)]]);
        let set = is_null.evaluate(&ParameterContext::new()).unwrap();
        assert!(set.contains(&null_key));
        assert!(!set.contains(&key(&[4])));
    }

    #[test]
    fn test_null_literal_selects_nothing() {
        let info = RangeSetInfo::conjunction(vec![vec![ColumnConstraint::new(
            ConstraintOp::Eq,
            Operand::Literal(Value::Null),
        )]]);
        assert!(info.evaluate(&ParameterContext::new()).unwrap().is_empty());
    }

    #[test]
    fn test_parameters_and_cache() {
        let info = RangeSetInfo::conjunction(vec![vec![ColumnConstraint::new(
            ConstraintOp::Eq,
            Operand::Parameter("p".into()),
        )]]);
        assert!(info.is_parametrized());
        let one = info.evaluate(&ParameterContext::new().with("p", 1)).unwrap();
        let two = info.evaluate(&ParameterContext::new().with("p", 2)).unwrap();
        assert!(one.contains(&key(&[1])));
        assert!(two.contains(&key(&[2])));
        assert!(info.evaluate(&ParameterContext::new()).is_err());

        let constant = compare(ConstraintOp::Eq, 3);
        constant.evaluate(&ParameterContext::new()).unwrap();
        assert!(constant.cached.get().is_some());
    }

    #[test]
    fn test_unconstrained_first_column_is_full() {
        let info = RangeSetInfo::conjunction(vec![
            vec![],
            vec![ColumnConstraint::new(ConstraintOp::Eq, lit(3))],
        ]);
        assert!(info.is_full());
        assert!(info.evaluate(&ParameterContext::new()).unwrap().is_full());
    }

    #[test]
    fn test_union() {
        let a = compare(ConstraintOp::Eq, 1);
        let b = compare(ConstraintOp::Eq, 7);
        let set = RangeSetInfo::union(vec![a, b]).evaluate(&ParameterContext::new()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&key(&[7, 0])));
    }
}
