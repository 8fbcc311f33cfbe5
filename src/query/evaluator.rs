use super::{BinaryOp, Expr, Function, ParameterContext};
use crate::core::{OrmError, Result, Tuple, Value};
use std::cmp::Ordering;

/// Evaluates expressions against rows with SQL three-valued logic.
pub struct ExpressionEvaluator<'a> {
    parameters: &'a ParameterContext,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(parameters: &'a ParameterContext) -> Self {
        Self { parameters }
    }

    /// Evaluates a predicate: `Some(true)`, `Some(false)` or `None` for unknown.
    pub fn matches(&self, expr: &Expr, row: &Tuple) -> Result<Option<bool>> {
        to_truth(&self.evaluate(expr, row)?)
    }

    pub fn evaluate(&self, expr: &Expr, row: &Tuple) -> Result<Value> {
        match expr {
            Expr::Column(position) => row.get(*position).cloned().ok_or_else(|| {
                OrmError::ExecutionError(format!(
                    "Column #{} is not available in row {}",
                    position, row
                ))
            }),
            Expr::Field(name) => Err(OrmError::ExecutionError(format!(
                "Field reference '{}' must be resolved before evaluation",
                name
            ))),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Parameter(name) => self.parameters.get(name).cloned(),
            Expr::BinaryOp { left, op, right } if op.is_logical() => {
                self.logical(left, *op, right, row)
            }
            Expr::BinaryOp { left, op, right } => {
                let left = self.evaluate(left, row)?;
                let right = self.evaluate(right, row)?;
                if op.is_comparison() {
                    compare(&left, *op, &right)
                } else {
                    arithmetic(&left, *op, &right)
                }
            }
            Expr::Not(expr) => Ok(truth_value(self.matches(expr, row)?.map(|b| !b))),
            Expr::IsNull { expr, negated } => {
                let value = self.evaluate(expr, row)?;
                Ok(Value::Boolean(value.is_null() != *negated))
            }
            Expr::In { expr, list, negated } => {
                let value = self.evaluate(expr, row)?;
                let result = self.in_list(&value, list, row)?;
                Ok(truth_value(result.map(|b| b != *negated)))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = self.evaluate(expr, row)?;
                let low = compare(&value, BinaryOp::GtEq, &self.evaluate(low, row)?)?;
                let high = compare(&value, BinaryOp::LtEq, &self.evaluate(high, row)?)?;
                let result = and3(to_truth(&low)?, to_truth(&high)?);
                Ok(truth_value(result.map(|b| b != *negated)))
            }
            Expr::Function { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg, row))
                    .collect::<Result<Vec<_>>>()?;
                call(*function, &args)
            }
        }
    }

    fn logical(&self, left: &Expr, op: BinaryOp, right: &Expr, row: &Tuple) -> Result<Value> {
        let left = self.matches(left, row)?;
        // short circuit
        match (op, left) {
            (BinaryOp::And, Some(false)) => return Ok(Value::Boolean(false)),
            (BinaryOp::Or, Some(true)) => return Ok(Value::Boolean(true)),
            _ => {}
        }
        let right = self.matches(right, row)?;
        Ok(truth_value(match op {
            BinaryOp::And => and3(left, right),
            _ => or3(left, right),
        }))
    }

    fn in_list(&self, value: &Value, list: &[Expr], row: &Tuple) -> Result<Option<bool>> {
        if value.is_null() {
            return Ok(None);
        }
        let mut saw_null = false;
        for item in list {
            let item = self.evaluate(item, row)?;
            match value.sql_compare(&item)? {
                Some(Ordering::Equal) => return Ok(Some(true)),
                Some(_) => {}
                None => saw_null = true,
            }
        }
        Ok(if saw_null { None } else { Some(false) })
    }
}

fn to_truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(OrmError::TypeMismatch(format!(
            "Expected a boolean predicate, got {}",
            other.type_name()
        ))),
    }
}

fn truth_value(truth: Option<bool>) -> Value {
    truth.map_or(Value::Null, Value::Boolean)
}

fn and3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

pub fn compare(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    let Some(ordering) = left.sql_compare(right)? else {
        return Ok(Value::Null);
    };
    let result = match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        other => {
            return Err(OrmError::ExecutionError(format!("'{}' is not a comparison", other)));
        }
    };
    Ok(Value::Boolean(result))
}

fn arithmetic(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Subtract => a.checked_sub(*b),
                BinaryOp::Multiply => a.checked_mul(*b),
                BinaryOp::Divide => {
                    if *b == 0 {
                        return Err(OrmError::ExecutionError("Division by zero".into()));
                    }
                    a.checked_div(*b)
                }
                _ => None,
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| {
                    OrmError::ExecutionError(format!("Integer overflow in {} {} {}", a, op, b))
                })
        }
        _ if left.is_numeric() && right.is_numeric() => {
            let (a, b) = (left.as_f64().unwrap_or_default(), right.as_f64().unwrap_or_default());
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => {
                    if b == 0.0 {
                        return Err(OrmError::ExecutionError("Division by zero".into()));
                    }
                    a / b
                }
                other => {
                    return Err(OrmError::ExecutionError(format!("'{}' is not arithmetic", other)));
                }
            }))
        }
        _ => Err(OrmError::TypeMismatch(format!(
            "Cannot apply '{}' to {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn call(function: Function, args: &[Value]) -> Result<Value> {
    let arity = match function {
        Function::Power => 2,
        Function::Round => args.len().clamp(1, 2),
        _ => 1,
    };
    if args.len() != arity {
        return Err(OrmError::ExecutionError(format!(
            "{} expects {} argument(s), got {}",
            function.name(),
            arity,
            args.len()
        )));
    }
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let numeric = |value: &Value| {
        value.as_f64().ok_or_else(|| {
            OrmError::TypeMismatch(format!(
                "{} expects a number, got {}",
                function.name(),
                value.type_name()
            ))
        })
    };
    let text = |value: &Value| {
        value.as_str().map(str::to_string).ok_or_else(|| {
            OrmError::TypeMismatch(format!(
                "{} expects text, got {}",
                function.name(),
                value.type_name()
            ))
        })
    };

    match function {
        Function::Abs => match &args[0] {
            Value::Integer(i) => Ok(Value::Integer(i.abs())),
            other => Ok(Value::Float(numeric(other)?.abs())),
        },
        Function::Round => {
            let digits = match args.get(1) {
                Some(d) => d.as_i64().unwrap_or(0) as i32,
                None => 0,
            };
            match &args[0] {
                Value::Integer(i) if digits >= 0 => Ok(Value::Integer(*i)),
                other => {
                    let scale = 10f64.powi(digits);
                    Ok(Value::Float((numeric(other)? * scale).round() / scale))
                }
            }
        }
        Function::Power => Ok(Value::Float(numeric(&args[0])?.powf(numeric(&args[1])?))),
        Function::Sqrt => Ok(Value::Float(numeric(&args[0])?.sqrt())),
        Function::Lower => Ok(Value::Text(text(&args[0])?.to_lowercase())),
        Function::Upper => Ok(Value::Text(text(&args[0])?.to_uppercase())),
        Function::Length => Ok(Value::Integer(text(&args[0])?.chars().count() as i64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Tuple {
        Tuple::from_values([Value::Integer(5), Value::Null, Value::from("Abc")])
    }

    #[test]
    fn test_three_valued_logic() {
        let params = ParameterContext::new();
        let evaluator = ExpressionEvaluator::new(&params);
        let null_cmp = Expr::column(1).eq(Expr::literal(1));
        assert_eq!(evaluator.matches(&null_cmp, &row()).unwrap(), None);
        let or = null_cmp.clone().or(Expr::column(0).gt(Expr::literal(1)));
        assert_eq!(evaluator.matches(&or, &row()).unwrap(), Some(true));
        let and = null_cmp.clone().and(Expr::column(0).gt(Expr::literal(1)));
        assert_eq!(evaluator.matches(&and, &row()).unwrap(), None);
        assert_eq!(evaluator.matches(&null_cmp.negate(), &row()).unwrap(), None);
    }

    #[test]
    fn test_in_and_between() {
        let params = ParameterContext::new().with("p", 5);
        let evaluator = ExpressionEvaluator::new(&params);
        let in_list = Expr::column(0).in_list(vec![Expr::literal(1), Expr::parameter("p")]);
        assert_eq!(evaluator.matches(&in_list, &row()).unwrap(), Some(true));
        let in_with_null = Expr::column(0).in_list(vec![Expr::literal(1), Expr::null()]);
        assert_eq!(evaluator.matches(&in_with_null, &row()).unwrap(), None);
        let between = Expr::column(0).between(Expr::literal(5), Expr::literal(9));
        assert_eq!(evaluator.matches(&between, &row()).unwrap(), Some(true));
    }

    #[test]
    fn test_functions() {
        let params = ParameterContext::new();
        let evaluator = ExpressionEvaluator::new(&params);
        let upper = Expr::call(Function::Upper, vec![Expr::column(2)]);
        assert_eq!(evaluator.evaluate(&upper, &row()).unwrap(), Value::from("ABC"));
        let length = Expr::call(Function::Length, vec![Expr::column(2)]);
        assert_eq!(evaluator.evaluate(&length, &row()).unwrap(), Value::Integer(3));
        let power = Expr::call(Function::Power, vec![Expr::column(0), Expr::literal(2)]);
        assert_eq!(evaluator.evaluate(&power, &row()).unwrap(), Value::Float(25.0));
    }

    #[test]
    fn test_errors() {
        let params = ParameterContext::new();
        let evaluator = ExpressionEvaluator::new(&params);
        let divide = Expr::column(0).binary(BinaryOp::Divide, Expr::literal(0));
        assert!(evaluator.evaluate(&divide, &row()).is_err());
        assert!(evaluator.evaluate(&Expr::parameter("x"), &row()).is_err());
        assert!(evaluator.matches(&Expr::column(0), &row()).is_err());
    }
}
