// Nested Loop Join Implementation
//
// For every outer row the joined table's plan is specialised with the outer
// values it references, given its own access strategy and fetched. Joining
// on the inner primary key turns each probe into a point lookup.

use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use crate::common::types::{PRIMARY_KEY, UserKey};
use crate::query::executor::engine::ExecutionContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::operators::fetch::FetchOperator;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::query::planner::plan::{Condition, JoinSpec, JoinType, KeyCondition, KeyValue, QueryPlan};
use crate::query::planner::selector::select_strategy;
use crate::storage::filter::{CompareOp, InstructionValue};

/// Nested Loop Join operator implementation
pub struct NestedLoopJoin {
    /// Outer input operator
    outer: Box<dyn Operator>,
    ctx: Arc<ExecutionContext>,
    spec: JoinSpec,
    /// Joined rows of the current outer row not yet returned
    pending: VecDeque<Row>,
    probes: usize,
}

impl NestedLoopJoin {
    pub fn new(outer: Box<dyn Operator>, ctx: Arc<ExecutionContext>, spec: JoinSpec) -> Self {
        NestedLoopJoin {
            outer,
            ctx,
            spec,
            pending: VecDeque::new(),
            probes: 0,
        }
    }

    /// Plan of the joined table for one outer row; `None` when nothing can match
    fn probe_plan(&self, outer: &Row) -> QueryResult<Option<QueryPlan>> {
        let join_value = match outer.get(&self.spec.outer_key) {
            None | Some(DataValue::Null) => return Ok(None),
            Some(value) => instruction_value(value)?,
        };

        let mut plan = self.spec.plan.clone();
        if let Some(condition) = plan.condition.as_mut() {
            let mut failure = None;
            condition.for_each_value(&mut |value, kind| {
                let InstructionValue::OuterColumn(key) = &*value else {
                    return;
                };
                let resolved = match outer.get(key) {
                    None => Ok(InstructionValue::Null),
                    Some(v) => instruction_value(v),
                };
                match resolved {
                    Ok(resolved) => {
                        *kind = resolved.kind();
                        *value = resolved;
                    }
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
        }

        if self.spec.inner_column == PRIMARY_KEY {
            let key = match join_value {
                InstructionValue::Integer(i) => UserKey::Integer(i),
                InstructionValue::String(s) => UserKey::Text(s),
                _ => return Ok(None),
            };
            plan.add_key_condition(KeyCondition::Equal(KeyValue::Key(key)));
        } else {
            plan.add_condition(Condition::compare(&self.spec.inner_column, CompareOp::Eq, join_value));
        }
        select_strategy(&mut plan)?;
        Ok(Some(plan))
    }

    fn join_row(&mut self, outer: Row) -> QueryResult<()> {
        let mut inner_rows = Vec::new();
        if let Some(plan) = self.probe_plan(&outer)? {
            self.probes += 1;
            let mut fetch = FetchOperator::new(self.ctx.clone(), &plan)?;
            fetch.init()?;
            while let Some(row) = fetch.next()? {
                inner_rows.push(row);
            }
            fetch.close()?;
        }

        if inner_rows.is_empty() {
            if self.spec.join_type == JoinType::LeftSkipIfMissing {
                let mut padded = outer;
                for column in &self.spec.plan.columns {
                    if !padded.contains(&column.source) {
                        padded.set(column.source.clone(), DataValue::Null);
                    }
                }
                self.pending.push_back(padded);
            }
            return Ok(());
        }

        for inner in inner_rows {
            let mut joined = outer.clone();
            for (name, value) in inner.values_with_names() {
                joined.set(format!("{}.{}", self.spec.qualifier, name), value.clone());
            }
            self.pending.push_back(joined);
        }
        Ok(())
    }
}

/// Outer value as a predicate value. Only integers and strings can be compared by the store.
fn instruction_value(value: &DataValue) -> QueryResult<InstructionValue> {
    match value {
        DataValue::Integer(i) => Ok(InstructionValue::Integer(*i)),
        DataValue::Boolean(b) => Ok(InstructionValue::Integer(i64::from(*b))),
        DataValue::Text(s) => Ok(InstructionValue::String(s.clone())),
        DataValue::Null => Ok(InstructionValue::Null),
        other => Err(QueryError::TypeMismatch(format!(
            "Cannot join on a {} value",
            other.type_name()
        ))),
    }
}

impl Operator for NestedLoopJoin {
    fn init(&mut self) -> QueryResult<()> {
        self.pending.clear();
        self.probes = 0;
        self.outer.init()
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            match self.outer.next()? {
                Some(outer) => self.join_row(outer)?,
                None => return Ok(None),
            }
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        debug!("Join with {} ran {} probes", self.spec.qualifier, self.probes);
        self.pending.clear();
        self.outer.close()
    }
}
