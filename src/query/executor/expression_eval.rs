// Expression Evaluation
//
// Evaluates expression trees against a single row. Used for computed
// columns, fallback WHERE and HAVING filters, ORDER BY expressions, and for
// folding constant function calls at compile time.

use std::cmp::Ordering;

use crate::query::ast::{BinaryOperator, ColumnRef, Expr, ExprArena, ExprId, Literal, UnaryOperator};
use crate::query::executor::functions::{FunctionRegistry, STANDARD_FUNCTIONS, is_aggregate};
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};

/// Scalar evaluator used by the pipeline
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, arena: &ExprArena, expr: ExprId, row: &Row, params: &[DataValue]) -> QueryResult<DataValue>;
}

/// Default tree-walking evaluator
pub struct RowEvaluator {
    functions: &'static FunctionRegistry,
}

impl Default for RowEvaluator {
    fn default() -> Self {
        RowEvaluator {
            functions: &STANDARD_FUNCTIONS,
        }
    }
}

impl RowEvaluator {
    pub fn new(functions: &'static FunctionRegistry) -> Self {
        RowEvaluator { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        self.functions
    }
}

impl ExpressionEvaluator for RowEvaluator {
    fn evaluate(&self, arena: &ExprArena, expr: ExprId, row: &Row, params: &[DataValue]) -> QueryResult<DataValue> {
        Evaluation {
            arena,
            row,
            params,
            functions: self.functions,
        }
        .eval(expr)
    }
}

/// Evaluate with the standard function table
pub fn evaluate_expression(arena: &ExprArena, expr: ExprId, row: &Row, params: &[DataValue]) -> QueryResult<DataValue> {
    RowEvaluator::default().evaluate(arena, expr, row, params)
}

/// Find a column in a row. Qualified names are tried as `table.name` first,
/// then bare; bare names fall back to any `prefix.name` key.
pub fn lookup_column<'a>(row: &'a Row, col: &ColumnRef) -> Option<&'a DataValue> {
    if let Some(table) = &col.table {
        if let Some(value) = row.get(&format!("{}.{}", table, col.name)) {
            return Some(value);
        }
    }
    if let Some(value) = row.get(&col.name) {
        return Some(value);
    }
    if col.table.is_none() {
        let suffix = format!(".{}", col.name);
        return row
            .columns()
            .iter()
            .find(|key| key.ends_with(&suffix))
            .and_then(|key| row.get(key));
    }
    None
}

pub fn literal_value(literal: &Literal) -> DataValue {
    match literal {
        Literal::Integer(i) => DataValue::Integer(*i),
        Literal::Float(f) => DataValue::Float(*f),
        Literal::String(s) => DataValue::Text(s.clone()),
        Literal::Boolean(b) => DataValue::Boolean(*b),
        Literal::Null => DataValue::Null,
    }
}

struct Evaluation<'a> {
    arena: &'a ExprArena,
    row: &'a Row,
    params: &'a [DataValue],
    functions: &'a FunctionRegistry,
}

impl Evaluation<'_> {
    fn eval(&self, id: ExprId) -> QueryResult<DataValue> {
        match self.arena.get(id) {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            // Records are schema-less: a missing bin reads as NULL
            Expr::Column(col) => Ok(lookup_column(self.row, col).cloned().unwrap_or(DataValue::Null)),
            Expr::Placeholder(index) => index
                .checked_sub(1)
                .and_then(|i| self.params.get(i))
                .cloned()
                .ok_or(QueryError::ParameterNotFound(*index)),
            Expr::BinaryOp { left, op, right } => self.binary(*left, *op, *right),
            Expr::Unary { op, expr } => {
                let value = self.eval(*expr)?;
                match (op, value) {
                    (_, DataValue::Null) => Ok(DataValue::Null),
                    (UnaryOperator::Not, value) => Ok(DataValue::Boolean(!value.is_truthy())),
                    (UnaryOperator::Minus, DataValue::Integer(i)) => {
                        i.checked_neg().map(DataValue::Integer).ok_or(QueryError::NumericOverflow)
                    }
                    (UnaryOperator::Minus, DataValue::Float(f)) => Ok(DataValue::Float(-f)),
                    (UnaryOperator::Minus, other) => Err(QueryError::TypeMismatch(format!(
                        "Cannot negate {}",
                        other.type_name()
                    ))),
                }
            }
            Expr::IsNull { expr, negated } => {
                let is_null = self.eval(*expr)?.is_null();
                Ok(DataValue::Boolean(is_null != *negated))
            }
            Expr::Between { expr, low, high, negated } => {
                let value = self.eval(*expr)?;
                let low = self.eval(*low)?;
                let high = self.eval(*high)?;
                if value.is_null() || low.is_null() || high.is_null() {
                    return Ok(DataValue::Null);
                }
                let inside = value.compare(&low)? != Ordering::Less && value.compare(&high)? != Ordering::Greater;
                Ok(DataValue::Boolean(inside != *negated))
            }
            Expr::InList { expr, list, negated } => {
                let value = self.eval(*expr)?;
                if value.is_null() {
                    return Ok(DataValue::Null);
                }
                let mut found = false;
                for item in list {
                    if self.eval(*item)? == value {
                        found = true;
                        break;
                    }
                }
                Ok(DataValue::Boolean(found != *negated))
            }
            Expr::InSubquery { .. } | Expr::Subquery(_) => Err(QueryError::UnsupportedConstruct(
                "sub-query inside a row expression".to_string(),
            )),
            Expr::Function { name, args, .. } => {
                if is_aggregate(name) {
                    // Aggregates are computed upstream and stored under their text
                    let key = self.arena.render(id);
                    return self.row.get(&key).cloned().ok_or_else(|| {
                        QueryError::ExecutionError(format!("Aggregate {} is not available in this row", key))
                    });
                }
                let values = args.iter().map(|arg| self.eval(*arg)).collect::<QueryResult<Vec<_>>>()?;
                self.functions.call(name, &values)
            }
            Expr::Wildcard => Err(QueryError::InvalidOperation("'*' outside of count(*)".to_string())),
            Expr::Parenthesis(inner) => self.eval(*inner),
            Expr::Array(items) => Ok(DataValue::List(
                items.iter().map(|item| self.eval(*item)).collect::<QueryResult<Vec<_>>>()?,
            )),
            Expr::FieldAccess { expr, key } => {
                let container = self.eval(*expr)?;
                let key = self.eval(*key)?;
                match (container, key) {
                    (DataValue::List(items), DataValue::Integer(i)) => Ok(usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(DataValue::Null)),
                    (DataValue::Null, _) => Ok(DataValue::Null),
                    (container, key) => Err(QueryError::TypeMismatch(format!(
                        "Cannot index {} with {}",
                        container.type_name(),
                        key.type_name()
                    ))),
                }
            }
        }
    }

    fn binary(&self, left: ExprId, op: BinaryOperator, right: ExprId) -> QueryResult<DataValue> {
        let left_val = self.eval(left)?;

        // Short-circuit logical operators, NULL is treated as unknown
        match op {
            BinaryOperator::And => {
                if !left_val.is_null() && !left_val.is_truthy() {
                    return Ok(DataValue::Boolean(false));
                }
                let right_val = self.eval(right)?;
                if !right_val.is_null() && !right_val.is_truthy() {
                    return Ok(DataValue::Boolean(false));
                }
                if left_val.is_null() || right_val.is_null() {
                    return Ok(DataValue::Null);
                }
                return Ok(DataValue::Boolean(true));
            }
            BinaryOperator::Or => {
                if left_val.is_truthy() {
                    return Ok(DataValue::Boolean(true));
                }
                let right_val = self.eval(right)?;
                if right_val.is_truthy() {
                    return Ok(DataValue::Boolean(true));
                }
                if left_val.is_null() || right_val.is_null() {
                    return Ok(DataValue::Null);
                }
                return Ok(DataValue::Boolean(false));
            }
            _ => {}
        }

        let right_val = self.eval(right)?;
        if left_val.is_null() || right_val.is_null() {
            return Ok(DataValue::Null);
        }

        if op.is_comparison() {
            let ordering = match (&left_val, &right_val) {
                (DataValue::Boolean(b), DataValue::Integer(_)) => DataValue::Integer(*b as i64).compare(&right_val)?,
                (DataValue::Integer(_), DataValue::Boolean(b)) => left_val.compare(&DataValue::Integer(*b as i64))?,
                _ => left_val.compare(&right_val)?,
            };
            let result = match op {
                BinaryOperator::Eq => ordering == Ordering::Equal,
                BinaryOperator::NotEq => ordering != Ordering::Equal,
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::LtEq => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(DataValue::Boolean(result));
        }

        arithmetic(op, left_val, right_val)
    }
}

fn arithmetic(op: BinaryOperator, left: DataValue, right: DataValue) -> QueryResult<DataValue> {
    match (left, right) {
        (DataValue::Integer(a), DataValue::Integer(b)) => {
            let result = match op {
                BinaryOperator::Plus => a.checked_add(b),
                BinaryOperator::Minus => a.checked_sub(b),
                BinaryOperator::Multiply => a.checked_mul(b),
                BinaryOperator::Divide => {
                    if b == 0 {
                        return Err(QueryError::DivisionByZero);
                    }
                    a.checked_div(b)
                }
                BinaryOperator::Modulo => {
                    if b == 0 {
                        return Err(QueryError::DivisionByZero);
                    }
                    a.checked_rem(b)
                }
                other => return Err(unsupported_operator(other)),
            };
            result.map(DataValue::Integer).ok_or(QueryError::NumericOverflow)
        }
        (left, right) => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => {
                let result = match op {
                    BinaryOperator::Plus => a + b,
                    BinaryOperator::Minus => a - b,
                    BinaryOperator::Multiply => a * b,
                    BinaryOperator::Divide => {
                        if b == 0.0 {
                            return Err(QueryError::DivisionByZero);
                        }
                        a / b
                    }
                    BinaryOperator::Modulo => {
                        if b == 0.0 {
                            return Err(QueryError::DivisionByZero);
                        }
                        a % b
                    }
                    other => return Err(unsupported_operator(other)),
                };
                Ok(DataValue::Float(result))
            }
            _ => match (op, left, right) {
                (BinaryOperator::Plus, DataValue::Text(a), DataValue::Text(b)) => Ok(DataValue::Text(a + &b)),
                (op, left, right) => Err(QueryError::TypeMismatch(format!(
                    "Cannot apply {} to {} and {}",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))),
            },
        },
    }
}

fn unsupported_operator(op: BinaryOperator) -> QueryError {
    QueryError::InvalidOperation(format!("Operator {} is not arithmetic", op.symbol()))
}
