use super::{BinaryOp, Expr, ParameterContext, Provider};
use crate::core::{OrmError, Result, Tuple, Value};
use crate::model::DomainModel;
use crate::range::{Entire, Range, Shift};
use crate::server_info::{QueryFeatures, ServerInfo};
use tracing::trace;

/// SQL text of a provider tree plus the parameter names it binds, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<String>,
}

/// Renders provider trees as SQL for a backend, rejecting constructs the
/// backend does not advertise.
pub struct SqlCompiler<'a> {
    model: &'a DomainModel,
    server: &'a ServerInfo,
}

#[derive(Default)]
struct CompileState {
    next_alias: usize,
    parameters: Vec<String>,
}

impl CompileState {
    fn alias(&mut self) -> String {
        self.next_alias += 1;
        format!("t{}", self.next_alias)
    }
}

impl<'a> SqlCompiler<'a> {
    pub fn new(model: &'a DomainModel, server: &'a ServerInfo) -> Self {
        Self { model, server }
    }

    /// Compiles `provider`; failures are reported as `Translation` errors
    /// wrapping the cause.
    pub fn compile(
        &self,
        provider: &Provider,
        parameters: &ParameterContext,
    ) -> Result<CompiledQuery> {
        let mut state = CompileState::default();
        let result = self
            .node(provider, parameters, &mut state)
            .and_then(|sql| {
                let limit = self.server.query().max_query_parameter_count;
                if state.parameters.len() > limit {
                    return Err(OrmError::UnsupportedOperation(format!(
                        "Query uses {} parameters, '{}' accepts at most {}",
                        state.parameters.len(),
                        self.server.name(),
                        limit
                    )));
                }
                Ok(sql)
            });
        match result {
            Ok(sql) => {
                trace!(sql = %sql, "query compiled");
                Ok(CompiledQuery {
                    sql,
                    parameters: state.parameters,
                })
            }
            Err(error) => {
                let text = provider.to_string();
                let summary = text.lines().next().unwrap_or_default().to_string();
                Err(error.into_translation(summary))
            }
        }
    }

    fn require(&self, feature: QueryFeatures, construct: &str) -> Result<()> {
        if self.server.query().features.contains(feature) {
            Ok(())
        } else {
            Err(OrmError::UnsupportedOperation(format!(
                "{} is not supported by '{}'",
                construct,
                self.server.name()
            )))
        }
    }

    fn node(
        &self,
        provider: &Provider,
        parameters: &ParameterContext,
        state: &mut CompileState,
    ) -> Result<String> {
        match provider {
            Provider::Index(node) => {
                let index = self.model.index(node.index);
                let hierarchy = self.model.hierarchy(index.hierarchy);
                let table = &self.model.type_info(hierarchy.root).name;
                let columns: Vec<String> = index
                    .output_columns()
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| format!("\"{}\" AS c{}", hierarchy.columns[c].name, i))
                    .collect();
                Ok(format!("SELECT {} FROM \"{}\"", columns.join(", "), table))
            }
            Provider::Filter(node) => {
                let source = self.node(&node.source, parameters, state)?;
                let alias = state.alias();
                let predicate = self.predicate(&node.predicate, &alias, state)?;
                Ok(format!("SELECT * FROM ({}) AS {} WHERE {}", source, alias, predicate))
            }
            Provider::Select(node) => {
                let source = self.node(&node.source, parameters, state)?;
                let alias = state.alias();
                let columns: Vec<String> = node
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{}.c{} AS c{}", alias, c, i))
                    .collect();
                Ok(format!("SELECT {} FROM ({}) AS {}", columns.join(", "), source, alias))
            }
            Provider::Sort(node) => {
                let source = self.node(&node.source, parameters, state)?;
                let alias = state.alias();
                let order: Vec<String> = node
                    .order
                    .iter()
                    .map(|(c, descending)| {
                        format!("{}.c{}{}", alias, c, if *descending { " DESC" } else { "" })
                    })
                    .collect();
                Ok(format!("SELECT * FROM ({}) AS {} ORDER BY {}", source, alias, order.join(", ")))
            }
            Provider::Take(node) => {
                self.require(QueryFeatures::PAGING, "Paging")?;
                let source = self.node(&node.source, parameters, state)?;
                let alias = state.alias();
                if node.partition.is_empty() {
                    return Ok(format!(
                        "SELECT * FROM ({}) AS {} LIMIT {}",
                        source, alias, node.count
                    ));
                }
                self.require(QueryFeatures::ROW_NUMBER, "Per-group paging")?;
                let width = node.source.width(self.model);
                let columns: Vec<String> = (0..width).map(|c| format!("c{}", c)).collect();
                let partition: Vec<String> =
                    node.partition.iter().map(|c| format!("{}.c{}", alias, c)).collect();
                let outer = state.alias();
                Ok(format!(
                    concat!(
                        "SELECT {} FROM (SELECT {}.*, ROW_NUMBER() OVER (PARTITION BY {}) AS rn ",
                        "FROM ({}) AS {}) AS {} WHERE rn <= {}"
                    ),
                    columns.join(", "),
                    alias,
                    partition.join(", "),
                    source,
                    alias,
                    outer,
                    node.count
                ))
            }
            Provider::Skip(node) => {
                self.require(QueryFeatures::PAGING, "Paging")?;
                let source = self.node(&node.source, parameters, state)?;
                let alias = state.alias();
                Ok(format!("SELECT * FROM ({}) AS {} OFFSET {}", source, alias, node.count))
            }
            Provider::RangeSet(node) => {
                let source = self.node(&node.source, parameters, state)?;
                let alias = state.alias();
                let ranges = node.ranges.evaluate(parameters)?;
                if ranges.is_full() {
                    return Ok(source);
                }
                if ranges.is_empty() {
                    return Ok(format!("SELECT * FROM ({}) AS {} WHERE 1 = 0", source, alias));
                }
                let conditions: Vec<String> =
                    ranges.ranges().iter().map(|r| range_condition(r, &alias)).collect();
                Ok(format!(
                    "SELECT * FROM ({}) AS {} WHERE {}",
                    source,
                    alias,
                    conditions.join(" OR ")
                ))
            }
            Provider::Join(node) => {
                let left_width = node.left.width(self.model);
                let right_width = node.right.width(self.model);
                let left = self.node(&node.left, parameters, state)?;
                let right = self.node(&node.right, parameters, state)?;
                let (l, r) = (state.alias(), state.alias());
                let mut columns: Vec<String> =
                    (0..left_width).map(|c| format!("{}.c{} AS c{}", l, c, c)).collect();
                columns.extend(
                    (0..right_width).map(|c| format!("{}.c{} AS c{}", r, c, left_width + c)),
                );
                let on: Vec<String> = node
                    .equalities
                    .iter()
                    .map(|(a, b)| format!("{}.c{} = {}.c{}", l, a, r, b))
                    .collect();
                Ok(format!(
                    "SELECT {} FROM ({}) AS {} INNER JOIN ({}) AS {} ON {}",
                    columns.join(", "),
                    left,
                    l,
                    right,
                    r,
                    on.join(" AND ")
                ))
            }
            Provider::Union(node) => {
                self.require(QueryFeatures::UNION, "UNION")?;
                let left = self.node(&node.left, parameters, state)?;
                let right = self.node(&node.right, parameters, state)?;
                Ok(format!("({}) UNION ({})", left, right))
            }
        }
    }

    /// Expression in boolean position.
    fn predicate(&self, expr: &Expr, alias: &str, state: &mut CompileState) -> Result<String> {
        let full_boolean = self
            .server
            .query()
            .features
            .contains(QueryFeatures::FULL_BOOLEAN_EXPRESSIONS);
        match expr {
            Expr::BinaryOp { left, op, right } if op.is_logical() => Ok(format!(
                "({} {} {})",
                self.predicate(left, alias, state)?,
                op,
                self.predicate(right, alias, state)?
            )),
            Expr::Not(inner) => Ok(format!("NOT ({})", self.predicate(inner, alias, state)?)),
            Expr::Column(_) | Expr::Parameter(_) | Expr::Literal(_) | Expr::Function { .. }
                if !full_boolean =>
            {
                Ok(format!("({} = TRUE)", self.scalar(expr, alias, state)?))
            }
            _ => self.scalar(expr, alias, state),
        }
    }

    /// Expression in value position.
    fn scalar(&self, expr: &Expr, alias: &str, state: &mut CompileState) -> Result<String> {
        let full_boolean = self
            .server
            .query()
            .features
            .contains(QueryFeatures::FULL_BOOLEAN_EXPRESSIONS);
        let operand = |e: &Expr, state: &mut CompileState| -> Result<String> {
            let is_predicate = match e {
                Expr::BinaryOp { op, .. } => op.is_comparison() || op.is_logical(),
                Expr::Not(_) | Expr::IsNull { .. } | Expr::In { .. } | Expr::Between { .. } => true,
                _ => false,
            };
            if is_predicate && !full_boolean {
                return Err(OrmError::UnsupportedOperation(format!(
                    "Boolean expression '{}' used as a value is not supported by '{}'",
                    e,
                    self.server.name()
                )));
            }
            self.scalar(e, alias, state)
        };

        match expr {
            Expr::Column(c) => Ok(format!("{}.c{}", alias, c)),
            Expr::Field(name) => Err(OrmError::UnsupportedOperation(format!(
                "Unresolved field reference '{}'",
                name
            ))),
            Expr::Literal(value) => Ok(literal(value)),
            Expr::Parameter(name) => {
                if !state.parameters.contains(name) {
                    state.parameters.push(name.clone());
                }
                Ok(format!("@{}", name))
            }
            Expr::BinaryOp { op, .. } if op.is_logical() => self.predicate(expr, alias, state),
            Expr::BinaryOp { left, op, right } => {
                let left = operand(left.as_ref(), state)?;
                let right = operand(right.as_ref(), state)?;
                Ok(format!("({} {} {})", left, op, right))
            }
            Expr::Not(_) => self.predicate(expr, alias, state),
            Expr::IsNull { expr, negated } => Ok(format!(
                "{} IS {}NULL",
                operand(expr.as_ref(), state)?,
                if *negated { "NOT " } else { "" }
            )),
            Expr::In { expr, list, negated } => {
                let value = operand(expr.as_ref(), state)?;
                let items = list.iter().map(|e| operand(e, state)).collect::<Result<Vec<_>>>()?;
                Ok(format!(
                    "{} {}IN ({})",
                    value,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                ))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Ok(format!(
                "{} {}BETWEEN {} AND {}",
                operand(expr.as_ref(), state)?,
                if *negated { "NOT " } else { "" },
                operand(low.as_ref(), state)?,
                operand(high.as_ref(), state)?
            )),
            Expr::Function { function, args } => {
                if !self.server.supports_function(function.feature()) {
                    return Err(OrmError::UnsupportedOperation(format!(
                        "Function {} is not supported by '{}'",
                        function.name(),
                        self.server.name()
                    )));
                }
                let args = args.iter().map(|e| operand(e, state)).collect::<Result<Vec<_>>>()?;
                Ok(format!("{}({})", function.name(), args.join(", ")))
            }
        }
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.into(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Guid(g) => format!("'{}'", g),
    }
}

/// Lexicographic condition of a key range over the leading output columns.
fn range_condition(range: &Range<Tuple>, alias: &str) -> String {
    let mut parts = Vec::new();
    if let Entire::Value(value, shift) = &range.low {
        let strict = *shift == Shift::Positive;
        parts.push(lexicographic(value, alias, true, strict));
    }
    if let Entire::Value(value, shift) = &range.high {
        let strict = *shift == Shift::Negative;
        parts.push(lexicographic(value, alias, false, strict));
    }
    if parts.is_empty() {
        return "1 = 1".into();
    }
    format!("({})", parts.join(" AND "))
}

/// `(c0, c1, ..) > (v0, v1, ..)` (or `<`, optionally non-strict) expanded
/// into column comparisons; NULL sorts before every value.
fn lexicographic(bound: &Tuple, alias: &str, greater: bool, strict: bool) -> String {
    let values: Vec<&Value> = bound.iter().map(|v| v.unwrap_or(&Value::Null)).collect();
    let mut alternatives = Vec::new();
    for i in 0..values.len() {
        let mut terms: Vec<String> = (0..i).map(|j| equals(alias, j, values[j])).collect();
        let last = i + 1 == values.len();
        let term = if last && !strict {
            compare(alias, i, values[i], greater, false)
        } else {
            compare(alias, i, values[i], greater, true)
        };
        terms.push(term);
        alternatives.push(format!("({})", terms.join(" AND ")));
    }
    format!("({})", alternatives.join(" OR "))
}

fn equals(alias: &str, column: usize, value: &Value) -> String {
    if value.is_null() {
        format!("{}.c{} IS NULL", alias, column)
    } else {
        format!("{}.c{} = {}", alias, column, literal(value))
    }
}

fn compare(alias: &str, column: usize, value: &Value, greater: bool, strict: bool) -> String {
    let column_ref = format!("{}.c{}", alias, column);
    if value.is_null() {
        return match (greater, strict) {
            (true, true) => format!("{} IS NOT NULL", column_ref),
            (true, false) => "1 = 1".into(),
            (false, true) => "1 = 0".into(),
            (false, false) => format!("{} IS NULL", column_ref),
        };
    }
    let op = match (greater, strict) {
        (true, true) => BinaryOp::Gt,
        (true, false) => BinaryOp::GtEq,
        (false, true) => BinaryOp::Lt,
        (false, false) => BinaryOp::LtEq,
    };
    let comparison = format!("{} {} {}", column_ref, op, literal(value));
    if greater {
        comparison
    } else {
        // NULL sorts first, so it is below every upper bound
        format!("({} IS NULL OR {})", column_ref, comparison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, IndexId};
    use crate::model::DomainBuilder;
    use crate::query::Function;
    use crate::server_info::{DataTypeCollection, FunctionFeatures};

    fn model() -> DomainModel {
        let mut builder = DomainBuilder::new();
        builder.entity("Item", |t| {
            t.key("Id", DataType::Integer)
                .field("Name", DataType::Text)
                .field("Active", DataType::Boolean);
        });
        builder.build().unwrap()
    }

    fn server(features: QueryFeatures) -> ServerInfo {
        ServerInfo::builder("test")
            .query_features(features)
            .functions(FunctionFeatures::LOWER)
            .data_types(DataTypeCollection::complete())
            .build()
            .unwrap()
    }

    fn scan(model: &DomainModel) -> (IndexId, usize, usize) {
        let item = model.type_by_name("Item").unwrap().id;
        let name = model.field_of(item, "Name").unwrap().columns[0];
        let active = model.field_of(item, "Active").unwrap().columns[0];
        (model.hierarchy(item).primary_index, name, active)
    }

    #[test]
    fn test_unsupported_function_is_wrapped() {
        let model = model();
        let server = server(QueryFeatures::FULL_BOOLEAN_EXPRESSIONS);
        let (primary, name, _) = scan(&model);
        let compiler = SqlCompiler::new(&model, &server);

        let lower = Expr::call(Function::Lower, vec![Expr::column(name)]).eq(Expr::literal("x"));
        let compiled = compiler
            .compile(&Provider::filter(Provider::index(primary), lower), &ParameterContext::new())
            .unwrap();
        assert!(compiled.sql.contains("LOWER("));

        let upper = Expr::call(Function::Upper, vec![Expr::column(name)]).eq(Expr::literal("X"));
        let error = compiler
            .compile(&Provider::filter(Provider::index(primary), upper), &ParameterContext::new())
            .unwrap_err();
        assert!(matches!(error, OrmError::Translation { .. }));
        assert!(matches!(error.root_cause(), OrmError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_boolean_columns_without_full_boolean_support() {
        let model = model();
        let server = server(QueryFeatures::empty());
        let (primary, _, active) = scan(&model);
        let compiler = SqlCompiler::new(&model, &server);

        let compiled = compiler
            .compile(
                &Provider::filter(Provider::index(primary), Expr::column(active)),
                &ParameterContext::new(),
            )
            .unwrap();
        assert!(compiled.sql.contains(&format!("(t1.c{} = TRUE)", active)));

        let as_value = Expr::column(active).eq(Expr::column(active).is_null());
        let provider = Provider::filter(Provider::index(primary), as_value);
        let result = compiler.compile(&provider, &ParameterContext::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_literals_and_parameters() {
        let model = model();
        let server = server(QueryFeatures::FULL_BOOLEAN_EXPRESSIONS);
        let (primary, name, _) = scan(&model);
        let predicate = Expr::column(name)
            .eq(Expr::literal("O'Brien"))
            .or(Expr::column(name).eq(Expr::parameter("name")))
            .or(Expr::column(name).eq(Expr::parameter("name")));

        let provider = Provider::filter(Provider::index(primary), predicate);
        let compiled = SqlCompiler::new(&model, &server)
            .compile(&provider, &ParameterContext::new())
            .unwrap();
        assert!(compiled.sql.contains("'O''Brien'"));
        assert!(compiled.sql.contains("@name"));
        assert_eq!(compiled.parameters, vec!["name".to_string()]);
    }
}
