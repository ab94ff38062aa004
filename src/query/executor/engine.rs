// Query Execution Engine Implementation
//
// Runs compiled statements against a key/value store. A compiled plan is
// immutable and can be bound any number of times; each binding works on
// its own copy of the statement. Queries return a lazily pulled row
// stream, DML statements the number of records they touched.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::common::config::EngineConfig;
use crate::common::types::{Bins, PRIMARY_KEY, RecordKey, UserKey};
use crate::query::ast::{ExprArena, ExprId};
use crate::query::executor::expression_eval::{ExpressionEvaluator, RowEvaluator};
use crate::query::executor::operators::Operator;
use crate::query::executor::pipeline;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::query::planner::binder::ParameterBinder;
use crate::query::planner::plan::{CompiledStatement, DeletePlan, InsertPlan, QueryNode, QueryPlan, UpdatePlan};
use crate::storage::{KeyValueStore, WriteMode};

/// Everything the operators of one execution share
pub struct ExecutionContext {
    pub store: Arc<dyn KeyValueStore>,
    pub arena: Arc<ExprArena>,
    /// Bound parameter values, `?N` is `params[N - 1]`
    pub params: Vec<DataValue>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub config: EngineConfig,
}

impl ExecutionContext {
    pub fn new(store: Arc<dyn KeyValueStore>, arena: Arc<ExprArena>, params: Vec<DataValue>, config: EngineConfig) -> Self {
        ExecutionContext {
            store,
            arena,
            params,
            evaluator: Arc::new(RowEvaluator::default()),
            config,
        }
    }

    /// Context with an empty arena, no parameters and the default configuration
    pub fn for_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, Arc::new(ExprArena::new()), Vec::new(), EngineConfig::default())
    }

    pub fn with_arena(mut self, arena: Arc<ExprArena>) -> Self {
        self.arena = arena;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Evaluate an expression of the arena against one row
    pub fn evaluate(&self, expr: ExprId, row: &Row) -> QueryResult<DataValue> {
        self.evaluator.evaluate(&self.arena, expr, row, &self.params)
    }
}

/// Output of a compiled statement, ready to be bound
#[derive(Debug, Clone)]
pub struct ExecutablePlan {
    arena: Arc<ExprArena>,
    statement: CompiledStatement,
    parameter_count: usize,
    config: EngineConfig,
}

impl ExecutablePlan {
    pub(crate) fn new(
        arena: Arc<ExprArena>,
        statement: CompiledStatement,
        parameter_count: usize,
        config: EngineConfig,
    ) -> Self {
        ExecutablePlan {
            arena,
            statement,
            parameter_count,
            config,
        }
    }

    pub fn statement(&self) -> &CompiledStatement {
        &self.statement
    }

    /// Highest placeholder index used by the statement
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Plan that reads the store, if the statement has one
    pub fn query_plan(&self) -> Option<&QueryPlan> {
        self.statement.query_plan()
    }

    pub fn arena(&self) -> &Arc<ExprArena> {
        &self.arena
    }

    /// Substitute parameters into a copy of the statement and reselect its
    /// access strategies. The plan itself is left untouched.
    pub fn bind(&self, params: &[DataValue]) -> QueryResult<BoundPlan> {
        if params.len() < self.parameter_count {
            return Err(QueryError::ParameterNotFound(params.len() + 1));
        }
        let mut statement = self.statement.clone();
        ParameterBinder::new(params).bind_statement(&mut statement)?;
        debug!("Bound {} parameters", params.len());
        Ok(BoundPlan {
            arena: self.arena.clone(),
            statement,
            params: params.to_vec(),
            config: self.config.clone(),
        })
    }

    /// Execute a statement without parameters
    pub fn execute(&self, store: Arc<dyn KeyValueStore>) -> QueryResult<ExecutionResult> {
        self.bind(&[])?.execute(store)
    }
}

/// A statement with every parameter substituted
#[derive(Debug, Clone)]
pub struct BoundPlan {
    arena: Arc<ExprArena>,
    statement: CompiledStatement,
    params: Vec<DataValue>,
    config: EngineConfig,
}

impl BoundPlan {
    pub fn statement(&self) -> &CompiledStatement {
        &self.statement
    }

    pub fn query_plan(&self) -> Option<&QueryPlan> {
        self.statement.query_plan()
    }

    pub fn execute(self, store: Arc<dyn KeyValueStore>) -> QueryResult<ExecutionResult> {
        let ctx = Arc::new(ExecutionContext::new(store, self.arena, self.params, self.config));
        match self.statement {
            CompiledStatement::Query(node) => execute_query(&ctx, node).map(ExecutionResult::Rows),
            CompiledStatement::Insert(insert) => execute_insert(&ctx, &insert).map(ExecutionResult::Affected),
            CompiledStatement::Update(update) => execute_update(&ctx, update).map(ExecutionResult::Affected),
            CompiledStatement::Delete(delete) => execute_delete(&ctx, delete).map(ExecutionResult::Affected),
            CompiledStatement::Truncate { namespace, set } => {
                if !ctx.store.truncate(&namespace, &set)? {
                    return Err(QueryError::MissingTable(format!("{}.{}", namespace, set)));
                }
                info!("Truncated {}.{}", namespace, set);
                Ok(ExecutionResult::Affected(0))
            }
            CompiledStatement::CreateIndex(index) => {
                info!("Creating index {} on {}.{}({})", index.name, index.namespace, index.set, index.bin);
                ctx.store.create_index(index)?;
                Ok(ExecutionResult::Affected(0))
            }
            CompiledStatement::DropIndex { namespace, name } => {
                info!("Dropping index {} in {}", name, namespace);
                ctx.store.drop_index(&namespace, &name)?;
                Ok(ExecutionResult::Affected(0))
            }
        }
    }
}

/// What executing a statement produced
pub enum ExecutionResult {
    Rows(RowStream),
    /// Records written or removed
    Affected(u64),
}

impl ExecutionResult {
    /// Drain the rows of a query
    pub fn into_rows(self) -> QueryResult<Vec<Row>> {
        match self {
            ExecutionResult::Rows(stream) => stream.collect_rows(),
            ExecutionResult::Affected(_) => Err(QueryError::InvalidOperation(
                "Statement does not return rows".to_string(),
            )),
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            ExecutionResult::Affected(count) => Some(*count),
            ExecutionResult::Rows(_) => None,
        }
    }
}

fn execute_query(ctx: &Arc<ExecutionContext>, mut node: QueryNode) -> QueryResult<RowStream> {
    pipeline::prepare(ctx, &mut node)?;
    let labels = node.labels().into_iter().map(str::to_string).collect();
    let root = pipeline::build(ctx, &node)?;
    RowStream::open(labels, root)
}

fn execute_insert(ctx: &ExecutionContext, insert: &InsertPlan) -> QueryResult<u64> {
    let empty = Row::new();
    let mut written = 0;
    for values in &insert.rows {
        let mut key = None;
        let mut bins = Bins::new();
        for (index, (name, expr)) in insert.columns.iter().zip(values).enumerate() {
            let value = ctx.evaluate(*expr, &empty)?;
            if index == insert.key_index {
                key = Some(UserKey::from_value(&value)?);
            } else if !value.is_null() {
                bins.insert(name.clone(), value);
            }
        }
        let key = key.ok_or_else(|| QueryError::InvalidOperation(format!("INSERT into {} has no {} value", insert.set, PRIMARY_KEY)))?;
        let record_key = RecordKey::new(insert.namespace.as_str(), insert.set.as_str(), key.clone());
        if ctx.store.put(&record_key, bins, WriteMode::CreateOnly)? {
            written += 1;
        } else if !insert.ignore {
            return Err(QueryError::DuplicateKey(format!("{} already exists in {}", key, insert.set)));
        }
    }
    info!("Inserted {} records into {}.{}", written, insert.namespace, insert.set);
    Ok(written)
}

fn execute_update(ctx: &Arc<ExecutionContext>, update: UpdatePlan) -> QueryResult<u64> {
    let UpdatePlan { mut selection, assignments, limit } = update;
    let rows = pipeline::selected_rows(ctx, &mut selection, limit)?;
    let set = selection.set.clone().unwrap_or_default();
    let mut updated = 0;
    for row in rows {
        let key = record_key(&selection, &set, &row)?;
        let mut bins = Bins::new();
        for (name, expr) in &assignments {
            bins.insert(name.clone(), ctx.evaluate(*expr, &row)?);
        }
        ctx.store.put(&key, bins, WriteMode::Upsert)?;
        updated += 1;
    }
    info!("Updated {} records in {}.{}", updated, selection.namespace, set);
    Ok(updated)
}

fn execute_delete(ctx: &Arc<ExecutionContext>, delete: DeletePlan) -> QueryResult<u64> {
    let DeletePlan { mut selection, limit } = delete;
    let rows = pipeline::selected_rows(ctx, &mut selection, limit)?;
    let set = selection.set.clone().unwrap_or_default();
    let mut deleted = 0;
    for row in rows {
        if ctx.store.delete(&record_key(&selection, &set, &row)?)? {
            deleted += 1;
        }
    }
    info!("Deleted {} records from {}.{}", deleted, selection.namespace, set);
    Ok(deleted)
}

fn record_key(selection: &QueryPlan, set: &str, row: &Row) -> QueryResult<RecordKey> {
    let value = row
        .get(PRIMARY_KEY)
        .ok_or_else(|| QueryError::ExecutionError(format!("Selected row of {} carries no key", set)))?;
    Ok(RecordKey::new(selection.namespace.as_str(), set, UserKey::from_value(value)?))
}

/// Rows of a query, pulled from the operator tree one at a time
pub struct RowStream {
    labels: Vec<String>,
    root: Box<dyn Operator>,
    finished: bool,
}

impl RowStream {
    fn open(labels: Vec<String>, mut root: Box<dyn Operator>) -> QueryResult<Self> {
        root.init()?;
        Ok(RowStream {
            labels,
            root,
            finished: false,
        })
    }

    /// Labels of the projected columns; empty for `SELECT *`
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn next_row(&mut self) -> QueryResult<Option<Row>> {
        if self.finished {
            return Ok(None);
        }
        match self.root.next() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.close()?;
                Ok(None)
            }
            Err(e) => {
                if let Err(close_err) = self.close() {
                    warn!("Closing row stream after a failed read failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    pub fn collect_rows(mut self) -> QueryResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Release the operators; later calls return no rows
    pub fn close(&mut self) -> QueryResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.root.close()
    }
}

impl Iterator for RowStream {
    type Item = QueryResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing row stream failed: {}", e);
        }
    }
}
