// Predicate Instructions
//
// Postfix programs the store evaluates against each record during a scan.
// The same interpreter filters records fetched by key on the client.

use std::cmp::Ordering;
use std::fmt;

use crate::common::types::Record;
use crate::query::executor::result::{DataValue, QueryError, QueryResult};

/// How a bin value is read before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinKind {
    Integer,
    String,
    /// Not yet known; fixed once the compared value is bound
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Operator seen from the other side: `a < b` is `b > a`
    pub fn mirrored(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            op => op,
        }
    }

    fn matches(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{}", symbol)
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionValue {
    Integer(i64),
    String(String),
    /// Compares false against everything
    Null,
    /// Positional parameter, replaced at bind time
    Placeholder(usize),
    /// Column of the enclosing row in a join, replaced per outer row
    OuterColumn(String),
    /// Result slot of a sub-query, replaced at execution
    Subquery(usize),
}

impl InstructionValue {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            InstructionValue::Integer(_) | InstructionValue::String(_) | InstructionValue::Null
        )
    }

    /// Bin kind implied by a resolved value
    pub fn kind(&self) -> BinKind {
        match self {
            InstructionValue::Integer(_) => BinKind::Integer,
            InstructionValue::String(_) => BinKind::String,
            _ => BinKind::Unresolved,
        }
    }
}

/// One step of a postfix predicate program
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateInstruction {
    Bin { name: String, kind: BinKind },
    /// The record's user key
    Key { kind: BinKind },
    Value(InstructionValue),
    Compare(CompareOp),
    /// Pops `n` results and pushes their conjunction
    And(usize),
    /// Pops `n` results and pushes their disjunction
    Or(usize),
}

enum StackItem<'a> {
    Operand(Option<DataValue>, BinKind),
    Literal(&'a InstructionValue),
    Result(bool),
}

/// Evaluate a predicate program against a record. An empty program matches.
pub fn matches(instructions: &[PredicateInstruction], record: &Record) -> QueryResult<bool> {
    if instructions.is_empty() {
        return Ok(true);
    }

    let mut stack: Vec<StackItem<'_>> = Vec::with_capacity(instructions.len());
    for instruction in instructions {
        match instruction {
            PredicateInstruction::Bin { name, kind } => {
                stack.push(StackItem::Operand(record.bin(name).cloned(), *kind));
            }
            PredicateInstruction::Key { kind } => {
                stack.push(StackItem::Operand(Some(record.key.user_key.to_value()), *kind));
            }
            PredicateInstruction::Value(value) => {
                if !value.is_resolved() {
                    return Err(QueryError::ExecutionError(format!(
                        "Unresolved predicate value {:?}",
                        value
                    )));
                }
                stack.push(StackItem::Literal(value));
            }
            PredicateInstruction::Compare(op) => {
                let value = stack.pop();
                let operand = stack.pop();
                match (operand, value) {
                    (Some(StackItem::Operand(bin, kind)), Some(StackItem::Literal(value))) => {
                        stack.push(StackItem::Result(compare(bin.as_ref(), kind, *op, value)));
                    }
                    _ => return Err(malformed("comparison expects a bin and a value")),
                }
            }
            PredicateInstruction::And(n) | PredicateInstruction::Or(n) => {
                if stack.len() < *n {
                    return Err(malformed("not enough operands for a logical operator"));
                }
                let operands = stack.split_off(stack.len() - n);
                let mut results = Vec::with_capacity(*n);
                for item in operands {
                    match item {
                        StackItem::Result(b) => results.push(b),
                        _ => return Err(malformed("logical operator over a non-boolean operand")),
                    }
                }
                let combined = match instruction {
                    PredicateInstruction::And(_) => results.iter().all(|b| *b),
                    _ => results.iter().any(|b| *b),
                };
                stack.push(StackItem::Result(combined));
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(StackItem::Result(b)), true) => Ok(b),
        _ => Err(malformed("program does not reduce to a single result")),
    }
}

fn compare(bin: Option<&DataValue>, kind: BinKind, op: CompareOp, value: &InstructionValue) -> bool {
    let Some(bin) = bin else {
        return false;
    };
    match (kind, bin, value) {
        (BinKind::Integer | BinKind::Unresolved, DataValue::Integer(a), InstructionValue::Integer(b)) => {
            op.matches(a.cmp(b))
        }
        (BinKind::Integer | BinKind::Unresolved, DataValue::Boolean(a), InstructionValue::Integer(b)) => {
            op.matches((*a as i64).cmp(b))
        }
        (BinKind::String | BinKind::Unresolved, DataValue::Text(a), InstructionValue::String(b)) => {
            op.matches(a.as_str().cmp(b.as_str()))
        }
        _ => false,
    }
}

fn malformed(message: &str) -> QueryError {
    QueryError::ExecutionError(format!("Malformed predicate program: {}", message))
}

/// Combine programs into one that holds when all of them hold
pub fn conjunction(programs: Vec<Vec<PredicateInstruction>>) -> Vec<PredicateInstruction> {
    let programs: Vec<_> = programs.into_iter().filter(|p| !p.is_empty()).collect();
    let count = programs.len();
    let mut out: Vec<PredicateInstruction> = programs.into_iter().flatten().collect();
    if count > 1 {
        out.push(PredicateInstruction::And(count));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Bins, RecordKey, UserKey};

    fn record() -> Record {
        let mut bins = Bins::new();
        bins.insert("age".to_string(), DataValue::Integer(30));
        bins.insert("name".to_string(), DataValue::Text("Ann".to_string()));
        Record::new(RecordKey::new("test", "people", UserKey::Integer(7)), bins)
    }

    fn bin(name: &str, kind: BinKind) -> PredicateInstruction {
        PredicateInstruction::Bin { name: name.to_string(), kind }
    }

    fn int(v: i64) -> PredicateInstruction {
        PredicateInstruction::Value(InstructionValue::Integer(v))
    }

    #[test]
    fn test_between_program() {
        let program = vec![
            bin("age", BinKind::Integer),
            int(18),
            PredicateInstruction::Compare(CompareOp::GtEq),
            bin("age", BinKind::Integer),
            int(30),
            PredicateInstruction::Compare(CompareOp::LtEq),
            PredicateInstruction::And(2),
        ];
        assert!(matches(&program, &record()).unwrap());
    }

    #[test]
    fn test_typed_bin_rejects_other_kinds() {
        let program = vec![
            bin("name", BinKind::Integer),
            int(1),
            PredicateInstruction::Compare(CompareOp::NotEq),
        ];
        assert!(!matches(&program, &record()).unwrap());

        let missing = vec![bin("nope", BinKind::Integer), int(1), PredicateInstruction::Compare(CompareOp::NotEq)];
        assert!(!matches(&missing, &record()).unwrap());
    }

    #[test]
    fn test_key_and_or() {
        let program = vec![
            PredicateInstruction::Key { kind: BinKind::Integer },
            int(1),
            PredicateInstruction::Compare(CompareOp::Eq),
            PredicateInstruction::Key { kind: BinKind::Integer },
            int(7),
            PredicateInstruction::Compare(CompareOp::Eq),
            PredicateInstruction::Or(2),
        ];
        assert!(matches(&program, &record()).unwrap());
        assert!(!matches(&[PredicateInstruction::Or(0)], &record()).unwrap());
    }

    #[test]
    fn test_unresolved_value_is_an_error() {
        let program = vec![
            bin("age", BinKind::Unresolved),
            PredicateInstruction::Value(InstructionValue::Placeholder(1)),
            PredicateInstruction::Compare(CompareOp::Eq),
        ];
        assert!(matches!(matches(&program, &record()), Err(QueryError::ExecutionError(_))));
    }

    #[test]
    fn test_conjunction_skips_empty_programs() {
        let one = vec![bin("age", BinKind::Integer), int(30), PredicateInstruction::Compare(CompareOp::Eq)];
        assert_eq!(conjunction(vec![one.clone(), Vec::new()]), one);
        assert_eq!(conjunction(vec![one.clone(), one.clone()]).last(), Some(&PredicateInstruction::And(2)));
    }
}
