use crate::model::IndexInfo;
use crate::query::{BinaryOp, DisjunctiveNormalForm, Expr};
use crate::range::{ColumnConstraint, ConstraintOp, Operand, RangeSetInfo};

/// Derives index key ranges implied by normalized predicates.
///
/// Predicates address the columns of the primary index output, which is the
/// hierarchy column layout. Atoms that do not restrict a key column of the
/// index are ignored, so the extracted ranges always cover every row the
/// predicate selects.
pub struct RangeSetExtractor<'a> {
    index: &'a IndexInfo,
}

impl<'a> RangeSetExtractor<'a> {
    pub fn new(index: &'a IndexInfo) -> Self {
        Self { index }
    }

    /// Ranges implied by one conjunction of atoms.
    pub fn extract(&self, terms: &[Expr]) -> RangeSetInfo {
        let mut constraints = vec![Vec::new(); self.index.key_columns.len()];
        for term in terms {
            if let Some((column, constraint)) = constraint_of(term)
                && let Some(position) = self.index.key_position(column)
            {
                constraints[position].push(constraint);
            }
        }
        RangeSetInfo::conjunction(constraints)
    }

    /// Union of the ranges of every disjunct.
    pub fn extract_all(&self, dnf: &DisjunctiveNormalForm) -> RangeSetInfo {
        match dnf.disjuncts.as_slice() {
            [] => RangeSetInfo::empty(),
            [single] => self.extract(single),
            disjuncts => {
                RangeSetInfo::union(disjuncts.iter().map(|terms| self.extract(terms)).collect())
            }
        }
    }
}

/// Column restricted by an atom, with the restriction oriented as
/// `column op operand`.
fn constraint_of(term: &Expr) -> Option<(usize, ColumnConstraint)> {
    match term {
        Expr::BinaryOp { left, op, right } if op.is_comparison() => {
            let (column, op, operand) = match (left.as_ref(), right.as_ref()) {
                (Expr::Column(column), other) => (*column, *op, operand_of(other)?),
                (other, Expr::Column(column)) => (*column, op.flipped(), operand_of(other)?),
                _ => return None,
            };
            Some((column, ColumnConstraint::new(constraint_op(op)?, operand)))
        }
        Expr::IsNull { expr, negated } => match expr.as_ref() {
            Expr::Column(column) => Some((*column, ColumnConstraint::is_null(*negated))),
            _ => None,
        },
        _ => None,
    }
}

fn operand_of(expr: &Expr) -> Option<Operand> {
    match expr {
        Expr::Literal(value) => Some(Operand::Literal(value.clone())),
        Expr::Parameter(name) => Some(Operand::Parameter(name.clone())),
        _ => None,
    }
}

fn constraint_op(op: BinaryOp) -> Option<ConstraintOp> {
    Some(match op {
        BinaryOp::Eq => ConstraintOp::Eq,
        BinaryOp::NotEq => ConstraintOp::NotEq,
        BinaryOp::Lt => ConstraintOp::Lt,
        BinaryOp::LtEq => ConstraintOp::LtEq,
        BinaryOp::Gt => ConstraintOp::Gt,
        BinaryOp::GtEq => ConstraintOp::GtEq,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IndexId, Tuple, TypeId, Value};
    use crate::model::IndexAttributes;
    use crate::query::{DnfNormalizer, ParameterContext};
    use crate::range::{Entire, Range, RangeSet};

    fn index(key_columns: Vec<usize>) -> IndexInfo {
        IndexInfo {
            id: IndexId(1),
            name: "IX_Test".into(),
            hierarchy: TypeId(0),
            declaring_type: TypeId(0),
            key_columns,
            value_columns: Vec::new(),
            attributes: IndexAttributes::SECONDARY,
            filter: None,
        }
    }

    fn key(values: &[i64]) -> Tuple {
        Tuple::from_values(values.iter().map(|v| Value::Integer(*v)))
    }

    fn evaluate(index: &IndexInfo, predicate: Expr) -> RangeSet<Tuple> {
        let dnf = DnfNormalizer::new(100).normalize(&predicate).unwrap();
        RangeSetExtractor::new(index)
            .extract_all(&dnf)
            .evaluate(&ParameterContext::new())
            .unwrap()
    }

    #[test]
    fn test_equality_prefix_then_range() {
        let index = index(vec![2, 3, 0]);
        let predicate = Expr::column(2)
            .eq(Expr::literal(5i64))
            .and(Expr::column(3).gt(Expr::literal(10i64)));
        let set = evaluate(&index, predicate);
        let expected = Range::new(Entire::after(key(&[5, 10])), Entire::after(key(&[5])));
        assert_eq!(set.ranges(), &[expected]);
        assert!(set.contains(&key(&[5, 11, 1])));
        assert!(!set.contains(&key(&[5, 10, 1])));
        assert!(!set.contains(&key(&[6, 0, 1])));
    }

    #[test]
    fn test_reversed_operands_are_flipped() {
        let index = index(vec![1]);
        let set = evaluate(&index, Expr::literal(3i64).lt(Expr::column(1)));
        assert!(set.contains(&key(&[4])));
        assert!(!set.contains(&key(&[3])));
    }

    #[test]
    fn test_unrelated_terms_give_full_range() {
        let index = index(vec![1]);
        assert!(evaluate(&index, Expr::column(4).eq(Expr::literal(1i64))).is_full());
        let info = RangeSetExtractor::new(&index).extract(&[Expr::column(1).eq(Expr::column(2))]);
        assert!(info.is_full());
    }

    #[test]
    fn test_disjunction_and_null_handling() {
        let index = index(vec![1]);
        let predicate = Expr::column(1)
            .in_list(vec![Expr::literal(1i64), Expr::literal(3i64)])
            .or(Expr::column(1).is_null());
        let set = evaluate(&index, predicate);
        assert!(set.contains(&key(&[1])));
        assert!(set.contains(&key(&[3])));
        assert!(set.contains(&Tuple::from_values([Value::Null])));
        assert!(!set.contains(&key(&[2])));

        let set = evaluate(&index, Expr::column(1).not_eq(Expr::literal(2i64)));
        assert!(!set.contains(&Tuple::from_values([Value::Null])));
        assert!(set.contains(&key(&[1])));
    }

    #[test]
    fn test_parameters_stay_symbolic() {
        let index = index(vec![1]);
        let predicate = Expr::column(1).gt_eq(Expr::parameter("min"));
        let info = RangeSetExtractor::new(&index).extract(&[predicate]);
        assert!(info.is_parametrized());
        let set = info
            .evaluate(&ParameterContext::new().with("min", Value::Integer(7)))
            .unwrap();
        assert!(set.contains(&key(&[7])));
        assert!(!set.contains(&key(&[6])));
    }
}
