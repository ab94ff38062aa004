// Limit Operator
//
// Skips `offset` rows and stops after `limit` rows.

use crate::query::executor::operators::Operator;
use crate::query::executor::result::{QueryResult, Row};

pub struct LimitOperator {
    input: Box<dyn Operator>,
    offset: u64,
    limit: Option<u64>,
    skipped: u64,
    returned: u64,
}

impl LimitOperator {
    pub fn new(input: Box<dyn Operator>, offset: u64, limit: Option<u64>) -> Self {
        LimitOperator {
            input,
            offset,
            limit,
            skipped: 0,
            returned: 0,
        }
    }
}

impl Operator for LimitOperator {
    fn init(&mut self) -> QueryResult<()> {
        self.skipped = 0;
        self.returned = 0;
        self.input.init()
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        if self.limit.is_some_and(|limit| self.returned >= limit) {
            return Ok(None);
        }
        while self.skipped < self.offset {
            if self.input.next()?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        let row = self.input.next()?;
        if row.is_some() {
            self.returned += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> QueryResult<()> {
        self.input.close()
    }
}
