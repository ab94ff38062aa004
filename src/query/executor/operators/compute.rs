// Compute Operator
//
// Evaluates computed columns on the client and stores each value in the
// row under the column's source key. An alias is also bound to the value
// when the row carries no bin of that name, so row filters can refer to it.

use std::sync::Arc;

use crate::query::ast::ExprId;
use crate::query::executor::engine::ExecutionContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{QueryResult, Row};

pub struct ComputeOperator {
    input: Box<dyn Operator>,
    ctx: Arc<ExecutionContext>,
    /// (row key, expression) pairs, evaluated in order
    columns: Vec<(String, ExprId)>,
    /// (alias, row key) pairs
    aliases: Vec<(String, String)>,
}

impl ComputeOperator {
    pub fn new(input: Box<dyn Operator>, ctx: Arc<ExecutionContext>, columns: Vec<(String, ExprId)>) -> Self {
        ComputeOperator {
            input,
            ctx,
            columns,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<(String, String)>) -> Self {
        self.aliases = aliases;
        self
    }
}

impl Operator for ComputeOperator {
    fn init(&mut self) -> QueryResult<()> {
        self.input.init()
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        let Some(mut row) = self.input.next()? else {
            return Ok(None);
        };
        for (key, expr) in &self.columns {
            let value = self.ctx.evaluate(*expr, &row)?;
            row.set(key.clone(), value);
        }
        for (alias, key) in &self.aliases {
            if row.contains(alias) {
                continue;
            }
            if let Some(value) = row.get(key).cloned() {
                row.set(alias.clone(), value);
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) -> QueryResult<()> {
        self.input.close()
    }
}
