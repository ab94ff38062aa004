// Query Result Implementation
//
// This module defines the value, row and error types shared by the planner,
// the row pipeline and the store layer.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Possible data types for values in a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
    List(Vec<DataValue>),
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            DataValue::Null => 0.hash(state),
            DataValue::Integer(i) => {
                1.hash(state);
                i.hash(state);
            }
            DataValue::Float(f) => {
                2.hash(state);
                f.to_bits().hash(state);
            }
            DataValue::Text(s) => {
                3.hash(state);
                s.hash(state);
            }
            DataValue::Boolean(b) => {
                4.hash(state);
                b.hash(state);
            }
            DataValue::Blob(b) => {
                5.hash(state);
                b.hash(state);
            }
            DataValue::List(items) => {
                6.hash(state);
                items.hash(state);
            }
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "'{}'", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
            DataValue::Blob(b) => write!(f, "X'{}'", hex::encode(b)),
            DataValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl PartialOrd for DataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (DataValue::Null, DataValue::Null) => Some(Ordering::Equal),
            (DataValue::Null, _) => Some(Ordering::Less),
            (_, DataValue::Null) => Some(Ordering::Greater),

            (DataValue::Integer(a), DataValue::Integer(b)) => a.partial_cmp(b),
            (DataValue::Float(a), DataValue::Float(b)) => a.partial_cmp(b),
            (DataValue::Integer(a), DataValue::Float(b)) => (*a as f64).partial_cmp(b),
            (DataValue::Float(a), DataValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (DataValue::Text(a), DataValue::Text(b)) => Some(a.cmp(b)),
            (DataValue::Boolean(a), DataValue::Boolean(b)) => a.partial_cmp(b),
            (DataValue::Blob(a), DataValue::Blob(b)) => Some(a.cmp(b)),
            (DataValue::List(a), DataValue::List(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl DataValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::Null => "null",
            DataValue::Integer(_) => "integer",
            DataValue::Float(_) => "float",
            DataValue::Text(_) => "string",
            DataValue::Boolean(_) => "boolean",
            DataValue::Blob(_) => "blob",
            DataValue::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Integer(i) => Some(*i),
            DataValue::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Integer(i) => Some(*i as f64),
            DataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Truth value of a predicate result. NULL is not true.
    pub fn is_truthy(&self) -> bool {
        match self {
            DataValue::Boolean(b) => *b,
            DataValue::Integer(i) => *i != 0,
            _ => false,
        }
    }

    /// Compare two DataValues for sorting purposes.
    /// NULLs are considered less than any non-NULL value.
    pub fn compare(&self, other: &Self) -> QueryResult<Ordering> {
        match (self, other) {
            (DataValue::Null, DataValue::Null) => Ok(Ordering::Equal),
            (DataValue::Null, _) => Ok(Ordering::Less),
            (_, DataValue::Null) => Ok(Ordering::Greater),
            (a, b) => a.partial_cmp(b).ok_or_else(|| {
                QueryError::TypeMismatch(format!(
                    "Cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                ))
            }),
        }
    }

    /// Total order used by ORDER BY. Records are schema-less, so one bin may
    /// hold different kinds: kinds rank NULL, boolean, number, string, blob,
    /// list, and numbers compare by value across integer and float.
    pub fn sort_order(&self, other: &Self) -> Ordering {
        fn rank(value: &DataValue) -> u8 {
            match value {
                DataValue::Null => 0,
                DataValue::Boolean(_) => 1,
                DataValue::Integer(_) | DataValue::Float(_) => 2,
                DataValue::Text(_) => 3,
                DataValue::Blob(_) => 4,
                DataValue::List(_) => 5,
            }
        }
        match (self, other) {
            (DataValue::Integer(a), DataValue::Integer(b)) => a.cmp(b),
            (DataValue::List(a), DataValue::List(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.sort_order(y))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (a, b) if rank(a) == rank(b) => a.partial_cmp(b).unwrap_or_else(|| match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            }),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Serialize a sequence of values into bytes with a stable ordering key
    pub fn serialize_row(values: &[DataValue]) -> QueryResult<Vec<u8>> {
        bincode::serialize(values)
            .map_err(|e| QueryError::ExecutionError(format!("Failed to serialize row: {}", e)))
    }
}

/// Represents a row flowing through the pipeline
#[derive(Debug, Clone)]
pub struct Row {
    /// Values indexed by column label
    values: HashMap<String, DataValue>,
    /// Column order for consistent output
    column_order: Vec<String>,
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        if self.column_order != other.column_order {
            return false;
        }
        self.column_order
            .iter()
            .all(|col| self.values.get(col) == other.values.get(col))
    }
}

impl Eq for Row {}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

impl Row {
    /// Create a new empty row
    pub fn new() -> Self {
        Row {
            values: HashMap::new(),
            column_order: Vec::new(),
        }
    }

    /// Create a row from column values
    pub fn from_values(columns: Vec<String>, values: Vec<DataValue>) -> Self {
        let mut row = Row::new();
        for (col, val) in columns.into_iter().zip(values) {
            row.set(col, val);
        }
        row
    }

    /// Get a value by column label
    pub fn get(&self, column: &str) -> Option<&DataValue> {
        self.values.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Set a value for a column, appending the column if it is new
    pub fn set(&mut self, column: String, value: DataValue) {
        if !self.values.contains_key(&column) {
            self.column_order.push(column.clone());
        }
        self.values.insert(column, value);
    }

    pub fn remove(&mut self, column: &str) -> Option<DataValue> {
        let value = self.values.remove(column)?;
        self.column_order.retain(|c| c != column);
        Some(value)
    }

    /// Get all columns in the row
    pub fn columns(&self) -> &[String] {
        &self.column_order
    }

    /// Get all values in column order
    pub fn values(&self) -> Vec<&DataValue> {
        self.column_order
            .iter()
            .filter_map(|col| self.values.get(col))
            .collect()
    }

    /// Get all values with their corresponding column labels, in column order
    pub fn values_with_names(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.column_order
            .iter()
            .filter_map(|col| self.values.get(col).map(|v| (col, v)))
    }

    pub fn len(&self) -> usize {
        self.column_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.column_order.is_empty()
    }

    /// Bytes identifying the row content, used for deduplication
    pub fn content_key(&self) -> QueryResult<Vec<u8>> {
        let values: Vec<DataValue> = self.values().into_iter().cloned().collect();
        DataValue::serialize_row(&values)
    }
}

/// Represents query compilation and execution errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// Statement shape that cannot be compiled at all
    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),
    /// Value of the wrong type where a specific type is required
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    /// Join condition other than a single column equality
    #[error("Unsupported join condition: {0}")]
    UnsupportedJoinCondition(String),
    /// Sub-query used as a value returned more than one column
    #[error("Inner query must return only one column, got {0}")]
    WrongColumnCount(usize),
    /// Sub-query used in a comparison returned more than one row
    #[error("Operator {0} requires 1 parameter")]
    TooManyRows(String),
    /// A second access strategy was assigned to a plan
    #[error("More than one queries have been created: {0}")]
    DuplicatePlanStrategy(String),
    /// Table or qualifier not known to the statement or the store
    #[error("Table not found: {0}")]
    MissingTable(String),
    /// Row does not carry a column the projection expects
    #[error("Projection mismatch: {0}")]
    ProjectionMismatch(String),
    /// Select item shape that cannot be projected
    #[error("Unsupported column expression: {0}")]
    UnsupportedColumnExpression(String),
    /// Positional parameter without a bound value
    #[error("Parameter {0} is not bound")]
    ParameterNotFound(usize),
    /// Insert of a key that already exists
    #[error("Duplicate entries: {0}")]
    DuplicateKey(String),
    /// Unknown scalar function
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    /// Error from the store
    #[error("Storage error: {0}")]
    StorageError(String),
    /// Error during query execution
    #[error("Execution error: {0}")]
    ExecutionError(String),
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    /// Numeric overflow
    #[error("Numeric overflow")]
    NumericOverflow,
    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
