use crate::core::{OrmError, Result, TypeId, Value};
use crate::model::{DomainModel, FieldKind};
use crate::server_info::FunctionFeatures;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Predicate and scalar expression over the columns of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column position in the output of the source provider
    Column(usize),

    /// Field reference by dotted name, resolved to a column before use
    Field(String),

    Literal(Value),

    /// Named parameter, bound through a `ParameterContext`
    Parameter(String),

    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    Not(Box<Expr>),

    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },

    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },

    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    Function {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,

    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Logical
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// `NOT (a op b)` as `a op' b`.
    pub fn negated(self) -> Option<Self> {
        Some(match self {
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Lt => Self::GtEq,
            Self::LtEq => Self::Gt,
            Self::Gt => Self::LtEq,
            Self::GtEq => Self::Lt,
            _ => return None,
        })
    }

    /// `a op b` as `b op' a`.
    pub fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => other,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        };
        write!(f, "{}", symbol)
    }
}

/// Scalar functions usable inside predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Function {
    Abs,
    Round,
    Power,
    Sqrt,
    Lower,
    Upper,
    Length,
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Self::Abs => "ABS",
            Self::Round => "ROUND",
            Self::Power => "POWER",
            Self::Sqrt => "SQRT",
            Self::Lower => "LOWER",
            Self::Upper => "UPPER",
            Self::Length => "LENGTH",
        }
    }

    /// Capability flag a backend must advertise to run this function.
    pub fn feature(self) -> FunctionFeatures {
        match self {
            Self::Abs => FunctionFeatures::ABS,
            Self::Round => FunctionFeatures::ROUND,
            Self::Power => FunctionFeatures::POWER,
            Self::Sqrt => FunctionFeatures::SQRT,
            Self::Lower => FunctionFeatures::LOWER,
            Self::Upper => FunctionFeatures::UPPER,
            Self::Length => FunctionFeatures::LENGTH,
        }
    }
}

impl Expr {
    pub fn column(position: usize) -> Self {
        Self::Column(position)
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn null() -> Self {
        Self::Literal(Value::Null)
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }

    pub fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Self::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn lt_eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::LtEq, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn gt_eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::GtEq, right)
    }

    pub fn and(self, right: Expr) -> Self {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list(self, list: Vec<Expr>) -> Self {
        Self::In {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn between(self, low: Expr, high: Expr) -> Self {
        Self::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
            negated: false,
        }
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Self::Function { function, args }
    }

    /// Conjunction of all `terms`; `TRUE` when empty.
    pub fn all(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms
            .into_iter()
            .reduce(Expr::and)
            .unwrap_or(Expr::Literal(Value::Boolean(true)))
    }

    /// Disjunction of all `terms`; `FALSE` when empty.
    pub fn any(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms
            .into_iter()
            .reduce(Expr::or)
            .unwrap_or(Expr::Literal(Value::Boolean(false)))
    }

    /// Column positions referenced by the expression.
    pub fn columns(&self) -> BTreeSet<usize> {
        let mut columns = BTreeSet::new();
        self.visit(&mut |expr| {
            if let Expr::Column(c) = expr {
                columns.insert(*c);
            }
        });
        columns
    }

    pub fn has_parameters(&self) -> bool {
        let mut found = false;
        self.visit(&mut |expr| found |= matches!(expr, Expr::Parameter(_)));
        found
    }

    pub fn functions(&self) -> Vec<Function> {
        let mut functions = Vec::new();
        self.visit(&mut |expr| {
            if let Expr::Function { function, .. } = expr {
                functions.push(*function);
            }
        });
        functions
    }

    fn visit(&self, visitor: &mut dyn FnMut(&Expr)) {
        visitor(self);
        match self {
            Expr::Column(_) | Expr::Field(_) | Expr::Literal(_) | Expr::Parameter(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.visit(visitor);
                right.visit(visitor);
            }
            Expr::Not(expr) | Expr::IsNull { expr, .. } => expr.visit(visitor),
            Expr::In { expr, list, .. } => {
                expr.visit(visitor);
                list.iter().for_each(|item| item.visit(visitor));
            }
            Expr::Between { expr, low, high, .. } => {
                expr.visit(visitor);
                low.visit(visitor);
                high.visit(visitor);
            }
            Expr::Function { args, .. } => args.iter().for_each(|arg| arg.visit(visitor)),
        }
    }

    /// Rewrites every column position through `map`.
    pub fn remap_columns(&self, map: &dyn Fn(usize) -> usize) -> Expr {
        self.transform(&mut |expr| match expr {
            Expr::Column(c) => Ok(Some(Expr::Column(map(*c)))),
            _ => Ok(None),
        })
        .unwrap_or_else(|_| self.clone())
    }

    /// Replaces `Field` references with column positions.
    pub fn resolve_with(&self, resolver: &dyn Fn(&str) -> Result<usize>) -> Result<Expr> {
        self.transform(&mut |expr| match expr {
            Expr::Field(name) => resolver(name).map(|c| Some(Expr::Column(c))),
            _ => Ok(None),
        })
    }

    /// Resolves field references against the hierarchy layout of `type_id`.
    pub fn resolve(&self, model: &DomainModel, type_id: TypeId) -> Result<Expr> {
        self.resolve_with(&|name| {
            let field = model.field_of(type_id, name)?;
            match (field.kind, field.columns.as_slice()) {
                (FieldKind::Primitive, [column]) => Ok(*column),
                (FieldKind::Entity, [column]) => Ok(*column),
                _ => Err(OrmError::UnsupportedOperation(format!(
                    "Field '{}' does not map to a single column",
                    name
                ))),
            }
        })
    }

    fn transform(&self, rewrite: &mut dyn FnMut(&Expr) -> Result<Option<Expr>>) -> Result<Expr> {
        if let Some(replacement) = rewrite(self)? {
            return Ok(replacement);
        }
        Ok(match self {
            Expr::Column(_) | Expr::Field(_) | Expr::Literal(_) | Expr::Parameter(_) => {
                self.clone()
            }
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: Box::new(left.transform(rewrite)?),
                op: *op,
                right: Box::new(right.transform(rewrite)?),
            },
            Expr::Not(expr) => Expr::Not(Box::new(expr.transform(rewrite)?)),
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(expr.transform(rewrite)?),
                negated: *negated,
            },
            Expr::In { expr, list, negated } => Expr::In {
                expr: Box::new(expr.transform(rewrite)?),
                list: list
                    .iter()
                    .map(|item| item.transform(rewrite))
                    .collect::<Result<_>>()?,
                negated: *negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: Box::new(expr.transform(rewrite)?),
                low: Box::new(low.transform(rewrite)?),
                high: Box::new(high.transform(rewrite)?),
                negated: *negated,
            },
            Expr::Function { function, args } => Expr::Function {
                function: *function,
                args: args
                    .iter()
                    .map(|arg| arg.transform(rewrite))
                    .collect::<Result<_>>()?,
            },
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(position) => write!(f, "#{}", position),
            Expr::Field(name) => write!(f, "{}", name),
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Parameter(name) => write!(f, "@{}", name),
            Expr::BinaryOp { left, op, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Not(expr) => write!(f, "NOT {}", expr),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::In { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}IN ({})", expr, not, items.join(", "))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::Function { function, args } => {
                let items: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", function.name(), items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let expr = Expr::column(2)
            .gt(Expr::literal(5))
            .and(Expr::field("Name").in_list(vec![Expr::literal("a"), Expr::parameter("p")]));
        assert_eq!(expr.to_string(), "((#2 > 5) AND Name IN ('a', @p))");
    }

    #[test]
    fn test_columns_and_parameters() {
        let expr = Expr::column(1)
            .eq(Expr::parameter("x"))
            .or(Expr::column(3).is_null());
        assert_eq!(expr.columns().into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(expr.has_parameters());
        assert!(!Expr::column(1).eq(Expr::literal(1)).has_parameters());
    }

    #[test]
    fn test_resolve_with() {
        let expr = Expr::field("A").lt(Expr::field("B"));
        let resolved = expr
            .resolve_with(&|name| if name == "A" { Ok(4) } else { Ok(7) })
            .unwrap();
        assert_eq!(resolved, Expr::column(4).lt(Expr::column(7)));
        let failing =
            expr.resolve_with(&|name| Err(OrmError::FieldNotFound(name.into(), "T".into())));
        assert!(failing.is_err());
    }

    #[test]
    fn test_negated_operators() {
        assert_eq!(BinaryOp::Lt.negated(), Some(BinaryOp::GtEq));
        assert_eq!(BinaryOp::And.negated(), None);
        assert_eq!(BinaryOp::LtEq.flipped(), BinaryOp::GtEq);
    }
}
