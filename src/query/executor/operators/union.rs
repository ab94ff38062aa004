// Set Operation Operators
//
// Concatenation of sibling pipelines and duplicate elimination for UNION.

use std::collections::HashSet;

use crate::query::executor::operators::Operator;
use crate::query::executor::result::{QueryResult, Row};

/// Emits the rows of each input in turn. Rows of later inputs take the
/// labels of the first one, matched by position.
pub struct ConcatOperator {
    inputs: Vec<Box<dyn Operator>>,
    /// Output labels; `None` passes rows through unchanged
    labels: Option<Vec<String>>,
    current: usize,
}

impl ConcatOperator {
    pub fn new(inputs: Vec<Box<dyn Operator>>, labels: Option<Vec<String>>) -> Self {
        ConcatOperator {
            inputs,
            labels,
            current: 0,
        }
    }

    fn relabel(&self, row: Row) -> Row {
        match &self.labels {
            Some(labels) if labels.len() == row.len() && labels.as_slice() != row.columns() => {
                let values = row.values().into_iter().cloned().collect();
                Row::from_values(labels.clone(), values)
            }
            _ => row,
        }
    }
}

impl Operator for ConcatOperator {
    fn init(&mut self) -> QueryResult<()> {
        self.current = 0;
        for input in &mut self.inputs {
            input.init()?;
        }
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        while let Some(input) = self.inputs.get_mut(self.current) {
            if let Some(row) = input.next()? {
                return Ok(Some(self.relabel(row)));
            }
            self.current += 1;
        }
        Ok(None)
    }

    /// Closes every input, last built first, and reports the first failure
    fn close(&mut self) -> QueryResult<()> {
        let mut result = Ok(());
        for input in self.inputs.iter_mut().rev() {
            if let Err(e) = input.close() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Drops rows whose values were already emitted; the first occurrence wins
pub struct DistinctOperator {
    input: Box<dyn Operator>,
    seen: HashSet<Vec<u8>>,
}

impl DistinctOperator {
    pub fn new(input: Box<dyn Operator>) -> Self {
        DistinctOperator {
            input,
            seen: HashSet::new(),
        }
    }
}

impl Operator for DistinctOperator {
    fn init(&mut self) -> QueryResult<()> {
        self.seen.clear();
        self.input.init()
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if self.seen.insert(row.content_key()?) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> QueryResult<()> {
        self.seen.clear();
        self.input.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::executor::operators::test_support::{CloseLog, MockOperator, collect, row};
    use crate::query::executor::result::{DataValue, QueryError};

    fn ids(name: &str, ids: &[i64]) -> Box<dyn Operator> {
        Box::new(MockOperator::new(
            ids.iter().map(|i| row(vec![(name, DataValue::Integer(*i))])).collect(),
        ))
    }

    #[test]
    fn test_concat_relabels_by_position() {
        let mut op = ConcatOperator::new(vec![ids("a", &[1, 2]), ids("b", &[2, 3])], Some(vec!["a".to_string()]));
        let rows = collect(&mut op);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.columns() == ["a".to_string()]));
    }

    #[test]
    fn test_distinct_keeps_first_occurrence() {
        let concat = ConcatOperator::new(vec![ids("a", &[1, 2]), ids("b", &[2, 3, 1])], Some(vec!["a".to_string()]));
        let mut op = DistinctOperator::new(Box::new(concat));
        let values: Vec<_> = collect(&mut op)
            .iter()
            .filter_map(|r| r.get("a").and_then(DataValue::as_i64))
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_close_reaches_every_input_in_reverse() {
        let log = CloseLog::default();
        let inputs: Vec<Box<dyn Operator>> = vec![
            Box::new(MockOperator::new(Vec::new()).tracked("first", &log)),
            Box::new(MockOperator::new(Vec::new()).tracked("second", &log).failing_close()),
            Box::new(MockOperator::new(Vec::new()).tracked("third", &log)),
        ];
        let mut op = ConcatOperator::new(inputs, None);
        op.init().unwrap();
        let err = op.close().unwrap_err();
        assert!(matches!(err, QueryError::ExecutionError(_)));
        assert_eq!(log.closed(), vec!["third", "second", "first"]);
    }
}
