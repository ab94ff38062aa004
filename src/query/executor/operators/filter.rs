// Filter Operator Implementation
//
// Keeps the rows for which an expression evaluates to true. Serves WHERE
// clauses the store cannot evaluate and HAVING.

use std::sync::Arc;

use crate::query::ast::ExprId;
use crate::query::executor::engine::ExecutionContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{QueryResult, Row};

/// Filter operator that filters rows based on a predicate
pub struct FilterOperator {
    /// The input operator
    input: Box<dyn Operator>,
    ctx: Arc<ExecutionContext>,
    /// The predicate to evaluate
    predicate: ExprId,
}

impl FilterOperator {
    /// Create a new filter operator
    pub fn new(input: Box<dyn Operator>, ctx: Arc<ExecutionContext>, predicate: ExprId) -> Self {
        FilterOperator { input, ctx, predicate }
    }
}

impl Operator for FilterOperator {
    fn init(&mut self) -> QueryResult<()> {
        self.input.init()
    }

    /// Get the next row that satisfies the predicate; NULL counts as false
    fn next(&mut self) -> QueryResult<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if self.ctx.evaluate(self.predicate, &row)?.is_truthy() {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> QueryResult<()> {
        self.input.close()
    }
}
