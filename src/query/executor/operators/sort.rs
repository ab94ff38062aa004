// Sort Operator
//
// Buffers its input and emits it ordered by the sort keys. The sort is
// stable; NULL sorts first and values of different kinds order by kind.
// With a known top-N only the rows that can still be returned are kept.

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use crate::query::executor::engine::ExecutionContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::query::planner::plan::{OrderKey, OrderSpec};

pub struct SortOperator {
    input: Box<dyn Operator>,
    ctx: Arc<ExecutionContext>,
    order_by: Vec<OrderSpec>,
    /// offset + limit, when both are known
    top_n: Option<usize>,
    output: Option<std::vec::IntoIter<Row>>,
}

impl SortOperator {
    pub fn new(input: Box<dyn Operator>, ctx: Arc<ExecutionContext>, order_by: Vec<OrderSpec>, top_n: Option<usize>) -> Self {
        SortOperator {
            input,
            ctx,
            order_by,
            top_n,
            output: None,
        }
    }

    fn sort_key(&self, row: &Row) -> QueryResult<Vec<DataValue>> {
        let mut key = Vec::with_capacity(self.order_by.len());
        for spec in &self.order_by {
            let value = match &spec.key {
                OrderKey::Column(name) => row.get(name).cloned().unwrap_or(DataValue::Null),
                OrderKey::Expr(expr) => self.ctx.evaluate(*expr, row)?,
                OrderKey::Position(position) => row
                    .columns()
                    .get(position.saturating_sub(1))
                    .and_then(|name| row.get(name))
                    .cloned()
                    .unwrap_or(DataValue::Null),
            };
            key.push(value);
        }
        Ok(key)
    }

    fn compare(&self, a: &[DataValue], b: &[DataValue]) -> Ordering {
        for (spec, (va, vb)) in self.order_by.iter().zip(a.iter().zip(b)) {
            match va.sort_order(vb) {
                Ordering::Equal => continue,
                ord if spec.desc => return ord.reverse(),
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    fn sort_input(&mut self) -> QueryResult<Vec<Row>> {
        let mut keyed: Vec<(Vec<DataValue>, Row)> = Vec::new();
        while let Some(row) = self.input.next()? {
            if let Some(max) = self.ctx.config.max_sort_rows {
                if keyed.len() >= max {
                    return Err(QueryError::ExecutionError(format!(
                        "Sort input exceeds the limit of {} rows",
                        max
                    )));
                }
            }
            keyed.push((self.sort_key(&row)?, row));
        }

        keyed.sort_by(|(a, _), (b, _)| self.compare(a, b));
        if let Some(n) = self.top_n {
            keyed.truncate(n);
        }
        debug!("Sorted {} rows by {} keys", keyed.len(), self.order_by.len());
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl Operator for SortOperator {
    fn init(&mut self) -> QueryResult<()> {
        self.output = None;
        self.input.init()
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        if self.output.is_none() {
            let rows = self.sort_input()?;
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }

    fn close(&mut self) -> QueryResult<()> {
        self.output = None;
        self.input.close()
    }
}
