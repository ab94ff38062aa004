// Fetch Operators
//
// Leaf operators reading the store through the plan's committed access
// strategy. Records become rows keyed by bin name, plus the user key and,
// on request, the key digest.

use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use crate::common::types::{PRIMARY_KEY, PRIMARY_KEY_DIGEST, Record, RecordKey, UserKey};
use crate::query::executor::engine::ExecutionContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::operators::agg::OutputMapping;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::query::planner::plan::{AccessStrategy, QueryPlan};
use crate::storage::filter::{PredicateInstruction, conjunction, matches};
use crate::storage::{IndexFilter, ScanRequest};

/// Turn a record into a pipeline row
pub fn record_row(record: Record, with_digest: bool) -> Row {
    let mut row = Row::new();
    row.set(PRIMARY_KEY.to_string(), record.key.user_key.to_value());
    if with_digest {
        row.set(PRIMARY_KEY_DIGEST.to_string(), DataValue::Blob(record.key.digest()));
    }
    for (name, value) in record.bins {
        row.set(name, value);
    }
    row
}

fn plan_set(plan: &QueryPlan) -> QueryResult<String> {
    plan.set
        .clone()
        .ok_or_else(|| QueryError::InvalidOperation("plan reads a sub-query, not the store".to_string()))
}

fn plan_strategy(plan: &QueryPlan) -> QueryResult<AccessStrategy> {
    plan.strategy().cloned().ok_or_else(|| {
        QueryError::ExecutionError(format!(
            "No access strategy selected for {}.{}",
            plan.namespace,
            plan.set.as_deref().unwrap_or("<source>")
        ))
    })
}

/// Reads records by key, by index or by scanning the set
pub struct FetchOperator {
    ctx: Arc<ExecutionContext>,
    namespace: String,
    set: String,
    strategy: AccessStrategy,
    with_digest: bool,
    results: VecDeque<Row>,
    initialized: bool,
}

impl FetchOperator {
    pub fn new(ctx: Arc<ExecutionContext>, plan: &QueryPlan) -> QueryResult<Self> {
        Ok(FetchOperator {
            ctx,
            namespace: plan.namespace.clone(),
            set: plan_set(plan)?,
            strategy: plan_strategy(plan)?,
            with_digest: plan.needs_digest,
            results: VecDeque::new(),
            initialized: false,
        })
    }

    fn record_key(&self, user_key: &UserKey) -> RecordKey {
        RecordKey::new(self.namespace.as_str(), self.set.as_str(), user_key.clone())
    }

    fn keep(&mut self, record: Record, residual: &[PredicateInstruction]) -> QueryResult<()> {
        if matches(residual, &record)? {
            self.results.push_back(record_row(record, self.with_digest));
        }
        Ok(())
    }

    fn scan(&mut self, filter: Option<&IndexFilter>, instructions: &[PredicateInstruction]) -> QueryResult<()> {
        let request = ScanRequest {
            namespace: &self.namespace,
            set: &self.set,
            filter,
            instructions,
        };
        let with_digest = self.with_digest;
        let results = &mut self.results;
        self.ctx.store.scan(&request, &mut |record| {
            results.push_back(record_row(record, with_digest));
            Ok(true)
        })
    }
}

impl Operator for FetchOperator {
    fn init(&mut self) -> QueryResult<()> {
        if self.initialized {
            return Ok(());
        }
        match self.strategy.clone() {
            AccessStrategy::PointLookup { key, residual } => {
                let key = self.record_key(&key);
                if let Some(record) = self.ctx.store.get(&key)? {
                    self.keep(record, &residual)?;
                }
            }
            AccessStrategy::BatchLookup { keys, residual } => {
                for chunk in keys.chunks(self.ctx.config.batch_size.max(1)) {
                    let keys: Vec<RecordKey> = chunk.iter().map(|key| self.record_key(key)).collect();
                    for record in self.ctx.store.get_many(&keys)?.into_iter().flatten() {
                        self.keep(record, &residual)?;
                    }
                }
            }
            AccessStrategy::IndexFilteredScan { filter, residual } => self.scan(Some(&filter), &residual)?,
            AccessStrategy::FullScan { residual, key_predicate } => {
                let program = conjunction(vec![residual, key_predicate.unwrap_or_default()]);
                self.scan(None, &program)?;
            }
            AccessStrategy::Aggregation { .. } => {
                return Err(QueryError::InvalidOperation(
                    "aggregation plans are read through the reducer".to_string(),
                ));
            }
        }
        debug!(
            "{} on {}.{} returned {} rows",
            self.strategy.name(),
            self.namespace,
            self.set,
            self.results.len()
        );
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        if !self.initialized {
            self.init()?;
        }
        Ok(self.results.pop_front())
    }

    fn close(&mut self) -> QueryResult<()> {
        self.results.clear();
        self.initialized = false;
        Ok(())
    }
}

/// Runs the plan's reducer call in the store and maps its output to rows
pub struct AggregateFetchOperator {
    ctx: Arc<ExecutionContext>,
    namespace: String,
    set: String,
    strategy: AccessStrategy,
    mapping: OutputMapping,
    results: VecDeque<Row>,
    initialized: bool,
}

impl AggregateFetchOperator {
    pub fn new(ctx: Arc<ExecutionContext>, plan: &QueryPlan) -> QueryResult<Self> {
        let mapping = plan
            .aggregation
            .as_ref()
            .map(|aggregation| aggregation.mapping.clone())
            .ok_or_else(|| QueryError::InvalidOperation("plan has no aggregation".to_string()))?;
        Ok(AggregateFetchOperator {
            ctx,
            namespace: plan.namespace.clone(),
            set: plan_set(plan)?,
            strategy: plan_strategy(plan)?,
            mapping,
            results: VecDeque::new(),
            initialized: false,
        })
    }
}

impl Operator for AggregateFetchOperator {
    fn init(&mut self) -> QueryResult<()> {
        if self.initialized {
            return Ok(());
        }
        let AccessStrategy::Aggregation { filter, residual, call } = &self.strategy else {
            return Err(QueryError::InvalidOperation(format!(
                "{} cannot feed an aggregation",
                self.strategy.name()
            )));
        };
        let request = ScanRequest {
            namespace: &self.namespace,
            set: &self.set,
            filter: filter.as_ref(),
            instructions: residual,
        };
        let output = self.ctx.store.aggregate(&request, call)?;
        debug!("{} on {}.{} produced {} rows", call, self.namespace, self.set, output.len());
        self.results = output.iter().map(|bins| self.mapping.to_row(bins)).collect();
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        if !self.initialized {
            self.init()?;
        }
        Ok(self.results.pop_front())
    }

    fn close(&mut self) -> QueryResult<()> {
        self.results.clear();
        self.initialized = false;
        Ok(())
    }
}
