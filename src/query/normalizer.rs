use super::{BinaryOp, Expr};
use crate::core::{OrmError, Result, Value};

/// Predicate in disjunctive normal form: an OR of AND-ed atoms.
///
/// No disjunct means `FALSE`; a single empty disjunct means `TRUE`.
#[derive(Debug, Clone, PartialEq)]
pub struct DisjunctiveNormalForm {
    pub disjuncts: Vec<Vec<Expr>>,
}

impl DisjunctiveNormalForm {
    pub fn is_false(&self) -> bool {
        self.disjuncts.is_empty()
    }

    pub fn is_true(&self) -> bool {
        self.disjuncts.iter().any(Vec::is_empty)
    }

    pub fn to_expr(&self) -> Expr {
        Expr::any(
            self.disjuncts
                .iter()
                .map(|terms| Expr::all(terms.iter().cloned())),
        )
    }
}

/// Bounded DNF conversion.
#[derive(Debug, Clone)]
pub struct DnfNormalizer {
    max_terms: usize,
}

impl DnfNormalizer {
    pub fn new(max_terms: usize) -> Self {
        Self { max_terms }
    }

    pub fn normalize(&self, expr: &Expr) -> Result<DisjunctiveNormalForm> {
        let nnf = push_not(expr, false);
        let disjuncts = self.distribute(&nnf)?;
        Ok(DisjunctiveNormalForm { disjuncts })
    }

    fn check(&self, terms: usize) -> Result<()> {
        if terms > self.max_terms {
            return Err(OrmError::PredicateTooComplex {
                terms,
                limit: self.max_terms,
            });
        }
        Ok(())
    }

    fn distribute(&self, expr: &Expr) -> Result<Vec<Vec<Expr>>> {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOp::Or,
                right,
            } => {
                let mut disjuncts = self.distribute(left)?;
                let right = self.distribute(right)?;
                self.check(disjuncts.len() + right.len())?;
                disjuncts.extend(right);
                Ok(disjuncts)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let left = self.distribute(left)?;
                let right = self.distribute(right)?;
                self.check(left.len() * right.len())?;
                let mut disjuncts = Vec::with_capacity(left.len() * right.len());
                for l in &left {
                    for r in &right {
                        self.check(l.len() + r.len())?;
                        let mut terms = l.clone();
                        terms.extend(r.iter().cloned());
                        disjuncts.push(terms);
                    }
                }
                Ok(disjuncts)
            }
            Expr::Literal(Value::Boolean(true)) => Ok(vec![Vec::new()]),
            Expr::Literal(Value::Boolean(false)) => Ok(Vec::new()),
            atom => Ok(vec![vec![atom.clone()]]),
        }
    }
}

/// Negation normal form: NOT only on atoms it cannot be folded into, BETWEEN
/// and IN expanded into comparisons.
fn push_not(expr: &Expr, negate: bool) -> Expr {
    match expr {
        Expr::Not(inner) => push_not(inner, !negate),
        Expr::BinaryOp { left, op, right } if op.is_logical() => {
            let op = match (op, negate) {
                (BinaryOp::And, true) => BinaryOp::Or,
                (BinaryOp::Or, true) => BinaryOp::And,
                (op, _) => *op,
            };
            push_not(left, negate).binary(op, push_not(right, negate))
        }
        Expr::BinaryOp { left, op, right } if op.is_comparison() && negate => {
            let inverted = op.negated().unwrap_or(*op);
            (**left).clone().binary(inverted, (**right).clone())
        }
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: expr.clone(),
            negated: *negated != negate,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = (**expr).clone();
            if *negated != negate {
                value
                    .clone()
                    .lt((**low).clone())
                    .or(value.gt((**high).clone()))
            } else {
                value
                    .clone()
                    .gt_eq((**low).clone())
                    .and(value.lt_eq((**high).clone()))
            }
        }
        Expr::In { expr, list, negated } => {
            let value = (**expr).clone();
            if *negated != negate {
                Expr::all(list.iter().map(|item| value.clone().not_eq(item.clone())))
            } else {
                Expr::any(list.iter().map(|item| value.clone().eq(item.clone())))
            }
        }
        Expr::Literal(Value::Boolean(b)) if negate => Expr::Literal(Value::Boolean(!b)),
        other if negate => Expr::Not(Box::new(other.clone())),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(i: usize) -> Expr {
        Expr::column(i)
    }

    fn v(i: i64) -> Expr {
        Expr::literal(i)
    }

    #[test]
    fn test_distributes_and_over_or() {
        let expr = c(0).eq(v(1)).or(c(0).eq(v(2))).and(c(1).gt(v(3)));
        let dnf = DnfNormalizer::new(100).normalize(&expr).unwrap();
        assert_eq!(
            dnf.disjuncts,
            vec![vec![c(0).eq(v(1)), c(1).gt(v(3))], vec![c(0).eq(v(2)), c(1).gt(v(3))]]
        );
    }

    #[test]
    fn test_pushes_not_to_leaves() {
        let expr = c(0).lt(v(1)).and(c(1).is_null()).negate();
        let dnf = DnfNormalizer::new(100).normalize(&expr).unwrap();
        assert_eq!(dnf.disjuncts, vec![vec![c(0).gt_eq(v(1))], vec![c(1).is_not_null()]]);
    }

    #[test]
    fn test_expands_between_and_in() {
        let expr = c(0).between(v(1), v(5));
        let dnf = DnfNormalizer::new(100).normalize(&expr).unwrap();
        assert_eq!(dnf.disjuncts, vec![vec![c(0).gt_eq(v(1)), c(0).lt_eq(v(5))]]);

        let expr = c(0).in_list(vec![v(1), v(2), v(3)]);
        let dnf = DnfNormalizer::new(100).normalize(&expr).unwrap();
        assert_eq!(dnf.disjuncts.len(), 3);

        let expr = c(0).in_list(vec![]);
        assert!(DnfNormalizer::new(100).normalize(&expr).unwrap().is_false());
    }

    #[test]
    fn test_bound_exceeded() {
        // (a1 or b1) and (a2 or b2) and ... grows as 2^n
        let expr = Expr::all((0..8).map(|i| c(i).eq(v(1)).or(c(i).eq(v(2)))));
        let result = DnfNormalizer::new(100).normalize(&expr);
        assert!(matches!(result, Err(OrmError::PredicateTooComplex { limit: 100, .. })));
        assert!(DnfNormalizer::new(256).normalize(&expr).is_ok());
    }
}
