// Standard Scalar Functions
//
// Process-wide, read-only table of the scalar functions the row evaluator
// can call. Aggregate names are listed separately so the planner can tell
// them apart.

use std::cmp::Ordering;
use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::query::executor::result::{DataValue, QueryError, QueryResult};

pub type ScalarFunction = fn(&[DataValue]) -> QueryResult<DataValue>;

const AGGREGATE_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max"];

/// Lookup table from lower-case function name to implementation
pub struct FunctionRegistry {
    functions: HashMap<&'static str, ScalarFunction>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        FunctionRegistry {
            functions: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, function: ScalarFunction) {
        self.functions.insert(name, function);
    }

    pub fn get(&self, name: &str) -> Option<ScalarFunction> {
        self.functions.get(name.to_ascii_lowercase().as_str()).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn call(&self, name: &str, args: &[DataValue]) -> QueryResult<DataValue> {
        let function = self
            .get(name)
            .ok_or_else(|| QueryError::UnknownFunction(name.to_string()))?;
        function(args)
    }

    fn standard() -> Self {
        let mut registry = FunctionRegistry::empty();
        registry.register("len", length);
        registry.register("length", length);
        registry.register("upper", upper);
        registry.register("ucase", upper);
        registry.register("lower", lower);
        registry.register("lcase", lower);
        registry.register("trim", trim);
        registry.register("ltrim", ltrim);
        registry.register("rtrim", rtrim);
        registry.register("concat", concat);
        registry.register("left", left);
        registry.register("right", right);
        registry.register("substring", substring);
        registry.register("abs", abs);
        registry.register("coalesce", coalesce);
        registry.register("ifnull", ifnull);
        registry.register("strcmp", strcmp);
        registry.register("instr", instr);
        registry.register("reverse", reverse);
        registry
    }
}

/// Functions available to every evaluator
pub static STANDARD_FUNCTIONS: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::standard);

/// Whether `name` is an aggregate rather than a scalar function
pub fn is_aggregate(name: &str) -> bool {
    AGGREGATE_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str())
}

fn arity(name: &str, args: &[DataValue], min: usize, max: usize) -> QueryResult<()> {
    if args.len() < min || args.len() > max {
        return Err(QueryError::InvalidOperation(format!(
            "{} expects {} to {} arguments, got {}",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

fn text_arg<'a>(name: &str, value: &'a DataValue) -> QueryResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| QueryError::TypeMismatch(format!("{} expects a string, got {}", name, value.type_name())))
}

fn int_arg(name: &str, value: &DataValue) -> QueryResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| QueryError::TypeMismatch(format!("{} expects an integer, got {}", name, value.type_name())))
}

/// Text form used when concatenating
fn plain_text(value: &DataValue) -> String {
    match value {
        DataValue::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_fn(name: &str, args: &[DataValue], f: impl Fn(&str) -> DataValue) -> QueryResult<DataValue> {
    arity(name, args, 1, 1)?;
    if args[0].is_null() {
        return Ok(DataValue::Null);
    }
    Ok(f(text_arg(name, &args[0])?))
}

fn length(args: &[DataValue]) -> QueryResult<DataValue> {
    string_fn("length", args, |s| DataValue::Integer(s.chars().count() as i64))
}

fn upper(args: &[DataValue]) -> QueryResult<DataValue> {
    string_fn("upper", args, |s| DataValue::Text(s.to_uppercase()))
}

fn lower(args: &[DataValue]) -> QueryResult<DataValue> {
    string_fn("lower", args, |s| DataValue::Text(s.to_lowercase()))
}

fn trim(args: &[DataValue]) -> QueryResult<DataValue> {
    string_fn("trim", args, |s| DataValue::Text(s.trim().to_string()))
}

fn ltrim(args: &[DataValue]) -> QueryResult<DataValue> {
    string_fn("ltrim", args, |s| DataValue::Text(s.trim_start().to_string()))
}

fn rtrim(args: &[DataValue]) -> QueryResult<DataValue> {
    string_fn("rtrim", args, |s| DataValue::Text(s.trim_end().to_string()))
}

fn reverse(args: &[DataValue]) -> QueryResult<DataValue> {
    string_fn("reverse", args, |s| DataValue::Text(s.chars().rev().collect()))
}

fn concat(args: &[DataValue]) -> QueryResult<DataValue> {
    Ok(DataValue::Text(
        args.iter().filter(|v| !v.is_null()).map(plain_text).collect(),
    ))
}

fn left(args: &[DataValue]) -> QueryResult<DataValue> {
    arity("left", args, 2, 2)?;
    if args.iter().any(DataValue::is_null) {
        return Ok(DataValue::Null);
    }
    let s = text_arg("left", &args[0])?;
    let n = int_arg("left", &args[1])?.max(0) as usize;
    Ok(DataValue::Text(s.chars().take(n).collect()))
}

fn right(args: &[DataValue]) -> QueryResult<DataValue> {
    arity("right", args, 2, 2)?;
    if args.iter().any(DataValue::is_null) {
        return Ok(DataValue::Null);
    }
    let s = text_arg("right", &args[0])?;
    let n = int_arg("right", &args[1])?.max(0) as usize;
    let len = s.chars().count();
    Ok(DataValue::Text(s.chars().skip(len.saturating_sub(n)).collect()))
}

fn substring(args: &[DataValue]) -> QueryResult<DataValue> {
    arity("substring", args, 2, 3)?;
    if args.iter().any(DataValue::is_null) {
        return Ok(DataValue::Null);
    }
    let s = text_arg("substring", &args[0])?;
    let start = (int_arg("substring", &args[1])?.max(1) - 1) as usize;
    let chars = s.chars().skip(start);
    let out: String = match args.get(2) {
        Some(len) => chars.take(int_arg("substring", len)?.max(0) as usize).collect(),
        None => chars.collect(),
    };
    Ok(DataValue::Text(out))
}

fn abs(args: &[DataValue]) -> QueryResult<DataValue> {
    arity("abs", args, 1, 1)?;
    match &args[0] {
        DataValue::Null => Ok(DataValue::Null),
        DataValue::Integer(i) => i.checked_abs().map(DataValue::Integer).ok_or(QueryError::NumericOverflow),
        DataValue::Float(f) => Ok(DataValue::Float(f.abs())),
        other => Err(QueryError::TypeMismatch(format!("abs expects a number, got {}", other.type_name()))),
    }
}

fn coalesce(args: &[DataValue]) -> QueryResult<DataValue> {
    Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(DataValue::Null))
}

fn ifnull(args: &[DataValue]) -> QueryResult<DataValue> {
    arity("ifnull", args, 2, 2)?;
    coalesce(args)
}

fn strcmp(args: &[DataValue]) -> QueryResult<DataValue> {
    arity("strcmp", args, 2, 2)?;
    if args.iter().any(DataValue::is_null) {
        return Ok(DataValue::Null);
    }
    let ordering = text_arg("strcmp", &args[0])?.cmp(text_arg("strcmp", &args[1])?);
    Ok(DataValue::Integer(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

fn instr(args: &[DataValue]) -> QueryResult<DataValue> {
    arity("instr", args, 2, 2)?;
    if args.iter().any(DataValue::is_null) {
        return Ok(DataValue::Null);
    }
    let haystack = text_arg("instr", &args[0])?;
    let needle = text_arg("instr", &args[1])?;
    let position = haystack
        .find(needle)
        .map_or(0, |byte| haystack[..byte].chars().count() as i64 + 1);
    Ok(DataValue::Integer(position))
}
