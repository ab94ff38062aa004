// Query Compiler
//
// Turns a parsed statement into an executable plan. Projection and WHERE
// handling live in their own modules as further `impl CompileContext`
// blocks; this module drives statements, FROM/JOIN resolution, grouping,
// ordering, paging and set operations.

use std::sync::Arc;

use log::{debug, info};

use super::plan::{
    AggregationPlan, ChainLink, ChainMode, ChainPlan, ColumnRole, CompiledStatement, DeletePlan, FallbackExpression,
    InsertPlan, JoinSpec, JoinType, OrderKey, OrderSpec, QueryNode, QueryPlan, RowBound, UpdatePlan,
};
use super::selector::select_strategy;
use crate::common::config::EngineConfig;
use crate::common::types::PRIMARY_KEY;
use crate::query::ast::{
    BinaryOperator, ColumnRef, Expr, ExprArena, ExprId, Join, JoinKind, Literal, ObjectName, OrderByItem,
    ParsedStatement, Query, Select, SelectItem, SetExpr, SetOperator, Statement, TableFactor,
};
use crate::query::executor::engine::ExecutablePlan;
use crate::query::executor::expression_eval::RowEvaluator;
use crate::query::executor::functions::is_aggregate;
use crate::query::executor::operators::agg::{
    DISTINCT_FUNCTION, DISTINCT_MODULE, GROUP_ARG_PREFIX, GROUPBY_FUNCTION, GROUPBY_MODULE, OutputMapping,
    STATS_FUNCTION, STATS_MODULE,
};
use crate::query::executor::result::{QueryError, QueryResult};
use crate::storage::{AggregateCall, IndexCatalog, IndexDefinition};

/// Compiles parsed statements against a fixed configuration and index catalog
pub struct Compiler {
    config: EngineConfig,
    indexes: IndexCatalog,
    evaluator: RowEvaluator,
}

impl Compiler {
    pub fn new(config: EngineConfig, indexes: IndexCatalog) -> Self {
        Compiler {
            config,
            indexes,
            evaluator: RowEvaluator::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compile(&self, parsed: &ParsedStatement) -> QueryResult<ExecutablePlan> {
        let mut ctx = CompileContext {
            arena: parsed.arena.clone(),
            config: &self.config,
            indexes: &self.indexes,
            evaluator: &self.evaluator,
        };
        let statement = ctx.compile_statement(&parsed.statement)?;
        let parameter_count = parameter_count(&parsed.arena, &parsed.statement);
        if let Some(plan) = statement.query_plan() {
            info!(
                "Compiled statement on {}.{} using {}",
                plan.namespace,
                plan.set.as_deref().unwrap_or("<source>"),
                plan.strategy().map_or("no store access", |s| s.name())
            );
        }
        Ok(ExecutablePlan::new(
            Arc::new(ctx.arena),
            statement,
            parameter_count,
            self.config.clone(),
        ))
    }
}

/// Mutable state threaded through one compilation
pub(crate) struct CompileContext<'c> {
    /// Copy of the statement's arena; compilation may add nodes to it
    pub(crate) arena: ExprArena,
    pub(crate) config: &'c EngineConfig,
    pub(crate) indexes: &'c IndexCatalog,
    pub(crate) evaluator: &'c RowEvaluator,
}

/// A table visible to column references: index 0 is the main table,
/// index `k` the `k`-th joined table.
#[derive(Debug, Clone)]
pub(crate) struct TableRef {
    pub(crate) set: Option<String>,
    pub(crate) alias: Option<String>,
}

impl TableRef {
    fn qualifier(&self) -> Option<&str> {
        self.alias.as_deref().or(self.set.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TableScope {
    tables: Vec<TableRef>,
}

impl TableScope {
    pub(crate) fn single(set: Option<String>, alias: Option<String>) -> Self {
        TableScope {
            tables: vec![TableRef { set, alias }],
        }
    }

    fn push(&mut self, table: TableRef) {
        self.tables.push(table);
    }

    /// Index of the table a column belongs to; unqualified names belong to the main table
    pub(crate) fn resolve(&self, col: &ColumnRef) -> QueryResult<usize> {
        let Some(qualifier) = col.table.as_deref() else {
            return Ok(0);
        };
        self.tables
            .iter()
            .position(|t| t.alias.as_deref() == Some(qualifier))
            .or_else(|| {
                self.tables
                    .iter()
                    .position(|t| t.alias.is_none() && t.set.as_deref() == Some(qualifier))
            })
            .ok_or_else(|| QueryError::MissingTable(qualifier.to_string()))
    }

    pub(crate) fn qualifier(&self, index: usize) -> Option<&str> {
        self.tables.get(index).and_then(TableRef::qualifier)
    }

    /// Key of a table's value inside pipeline rows
    pub(crate) fn row_key(&self, index: usize, name: &str) -> String {
        match (index, self.qualifier(index)) {
            (0, _) | (_, None) => name.to_string(),
            (_, Some(qualifier)) => format!("{}.{}", qualifier, name),
        }
    }
}

impl CompileContext<'_> {
    fn compile_statement(&mut self, statement: &Statement) -> QueryResult<CompiledStatement> {
        match statement {
            Statement::Query(query) => Ok(CompiledStatement::Query(self.compile_query(query)?)),
            Statement::Insert(insert) => {
                let (namespace, set) = self.table_name(&insert.table);
                let key_index = insert
                    .columns
                    .iter()
                    .position(|c| c == PRIMARY_KEY)
                    .ok_or_else(|| {
                        QueryError::UnsupportedConstruct(format!("INSERT into {} requires the {} column", set, PRIMARY_KEY))
                    })?;
                for row in &insert.rows {
                    if row.len() != insert.columns.len() {
                        return Err(QueryError::InvalidOperation(format!(
                            "INSERT lists {} columns but a row has {} values",
                            insert.columns.len(),
                            row.len()
                        )));
                    }
                    if row.iter().any(|id| self.has_subquery(*id)) {
                        return Err(QueryError::UnsupportedConstruct(
                            "sub-queries are not allowed in VALUES".to_string(),
                        ));
                    }
                }
                Ok(CompiledStatement::Insert(InsertPlan {
                    namespace,
                    set,
                    columns: insert.columns.clone(),
                    key_index,
                    rows: insert.rows.clone(),
                    ignore: insert.ignore,
                }))
            }
            Statement::Update(update) => {
                let selection = self.selection_plan(&update.table, update.selection)?;
                let mut assignments = Vec::with_capacity(update.assignments.len());
                for (column, value) in &update.assignments {
                    if column == PRIMARY_KEY {
                        return Err(QueryError::UnsupportedConstruct(
                            "the primary key cannot be updated".to_string(),
                        ));
                    }
                    if self.has_subquery(*value) {
                        return Err(QueryError::UnsupportedConstruct(
                            "sub-queries are not allowed in SET".to_string(),
                        ));
                    }
                    assignments.push((column.clone(), *value));
                }
                Ok(CompiledStatement::Update(UpdatePlan {
                    selection,
                    assignments,
                    limit: self.row_bound(update.limit)?,
                }))
            }
            Statement::Delete(delete) => Ok(CompiledStatement::Delete(DeletePlan {
                selection: self.selection_plan(&delete.table, delete.selection)?,
                limit: self.row_bound(delete.limit)?,
            })),
            Statement::Truncate { table } => {
                let (namespace, set) = self.table_name(table);
                Ok(CompiledStatement::Truncate { namespace, set })
            }
            Statement::CreateIndex(create) => {
                let (namespace, set) = self.table_name(&create.table);
                Ok(CompiledStatement::CreateIndex(IndexDefinition {
                    namespace,
                    set,
                    bin: create.column.clone(),
                    name: create.name.clone(),
                    index_type: create.index_type,
                }))
            }
            Statement::DropIndex { name, table } => {
                let (namespace, _) = self.table_name(table);
                Ok(CompiledStatement::DropIndex {
                    namespace,
                    name: name.clone(),
                })
            }
        }
    }

    fn table_name(&self, name: &ObjectName) -> (String, String) {
        let namespace = name
            .schema
            .clone()
            .unwrap_or_else(|| self.config.default_namespace.clone());
        (namespace, name.name.clone())
    }

    pub(crate) fn has_subquery(&self, id: ExprId) -> bool {
        self.arena
            .any(id, &|e| matches!(e, Expr::Subquery(_) | Expr::InSubquery { .. }))
    }

    fn table_plan(&self, name: &ObjectName, alias: Option<String>) -> QueryPlan {
        let (namespace, set) = self.table_name(name);
        let mut plan = QueryPlan::new(&namespace, Some(set.clone()), alias);
        plan.indexes = self.indexes.for_set(&namespace, &set);
        plan
    }

    /// Records an UPDATE or DELETE applies to
    fn selection_plan(&mut self, table: &ObjectName, selection: Option<ExprId>) -> QueryResult<QueryPlan> {
        let mut plan = self.table_plan(table, None);
        let scope = TableScope::single(plan.set.clone(), None);
        if let Some(selection) = selection {
            self.compile_where(&mut plan, &scope, selection)?;
        }
        select_strategy(&mut plan)?;
        Ok(plan)
    }

    pub(crate) fn compile_query(&mut self, query: &Query) -> QueryResult<QueryNode> {
        match &query.body {
            SetExpr::Select(select) => {
                let plan = self.compile_select(select, &query.order_by, query.limit, query.offset)?;
                Ok(QueryNode::Plan(Box::new(plan)))
            }
            body @ SetExpr::SetOperation { .. } => {
                let mut chain = self.compile_chain(body)?;
                chain.order_by = self.chain_order(&chain.head, &query.order_by)?;
                chain.offset = self.row_bound(query.offset)?;
                chain.limit = self.row_bound(query.limit)?;
                Ok(QueryNode::Chain(Box::new(chain)))
            }
        }
    }

    fn compile_set_expr(&mut self, body: &SetExpr) -> QueryResult<QueryNode> {
        match body {
            SetExpr::Select(select) => Ok(QueryNode::Plan(Box::new(self.compile_select(select, &[], None, None)?))),
            SetExpr::SetOperation { .. } => Ok(QueryNode::Chain(Box::new(self.compile_chain(body)?))),
        }
    }

    /// Flatten a left-deep set operation into a head and its links
    fn compile_chain(&mut self, body: &SetExpr) -> QueryResult<ChainPlan> {
        let mut parts = Vec::new();
        flatten_set_operation(body, None, &mut parts);

        let mut nodes = Vec::with_capacity(parts.len());
        for (op, part) in parts {
            nodes.push((op, self.compile_set_expr(part)?));
        }
        let mut nodes = nodes.into_iter();
        let (_, head) = nodes
            .next()
            .ok_or_else(|| QueryError::InvalidOperation("empty set operation".to_string()))?;

        let width = (!head.first_plan().wildcard).then(|| head.labels().len());
        let mut links = Vec::new();
        for (op, node) in nodes {
            if let Some(width) = width {
                let other = node.labels().len();
                if !node.first_plan().wildcard && other != width {
                    return Err(QueryError::ProjectionMismatch(format!(
                        "set operation combines {} columns with {} columns",
                        width, other
                    )));
                }
            }
            let mode = match op {
                Some(SetOperator::Union) => ChainMode::Union,
                _ => ChainMode::UnionAll,
            };
            links.push(ChainLink { node, mode });
        }
        debug!("Compiled set operation with {} siblings", links.len() + 1);

        Ok(ChainPlan {
            head,
            links,
            order_by: Vec::new(),
            offset: None,
            limit: None,
        })
    }

    fn compile_select(
        &mut self,
        select: &Select,
        order_by: &[OrderByItem],
        limit: Option<ExprId>,
        offset: Option<ExprId>,
    ) -> QueryResult<QueryPlan> {
        let mut plan = match &select.from {
            TableFactor::Table { name, alias } => self.table_plan(name, alias.clone()),
            TableFactor::Derived { subquery, alias } => {
                let source = self.compile_query(subquery)?;
                let mut plan = QueryPlan::new(&self.config.default_namespace, None, alias.clone());
                plan.source = Some(Box::new(source));
                plan
            }
        };
        let mut scope = TableScope::single(plan.set.clone(), plan.alias.clone());

        for (index, join) in select.joins.iter().enumerate() {
            let spec = self.compile_join(&mut scope, index + 1, join)?;
            plan.joins.push(spec);
        }

        let aggregate = !select.group_by.is_empty()
            || select.having.is_some()
            || select.projection.iter().any(|item| match item {
                SelectItem::Expr { expr, .. } => self.has_aggregate(*expr),
                SelectItem::Wildcard => false,
            })
            || order_by.iter().any(|item| self.has_aggregate(item.expr));
        if aggregate && !plan.joins.is_empty() {
            return Err(QueryError::UnsupportedConstruct(
                "aggregation over joined tables is not supported".to_string(),
            ));
        }

        let groups = self.group_columns(&scope, &select.group_by)?;
        if aggregate && select.group_by.is_empty() && select.having.is_some() && !self.has_aggregate_anywhere(select) {
            return Err(QueryError::UnsupportedConstruct(
                "HAVING requires GROUP BY or an aggregate".to_string(),
            ));
        }
        let grouping = aggregate.then_some(groups.as_slice());

        self.resolve_projection(&mut plan, &scope, &select.projection, grouping)?;

        if let Some(selection) = select.selection {
            self.compile_where(&mut plan, &scope, selection)?;
        }

        if let Some(having) = select.having {
            if self.has_subquery(having) {
                return Err(QueryError::UnsupportedConstruct(
                    "sub-queries are not allowed in HAVING".to_string(),
                ));
            }
            self.register_grouped_expression(&mut plan, &scope, having, &groups)?;
            plan.having = Some(FallbackExpression {
                text: self.arena.render(having),
                expr: having,
            });
        }

        plan.order_by = self.plan_order(&mut plan, &scope, order_by, grouping)?;

        if aggregate {
            plan.aggregation = Some(self.aggregation_plan(&plan, &groups));
        } else if select.distinct {
            plan.distinct = true;
            plan.aggregation = Some(self.distinct_plan(&plan)?);
        }
        if plan.aggregation.is_some() && plan.source.is_none() && plan.fallback.is_some() {
            return Err(QueryError::UnsupportedConstruct(
                "a WHERE clause evaluated row by row cannot be combined with store-side aggregation".to_string(),
            ));
        }

        plan.offset = self.row_bound(offset)?;
        plan.limit = self.row_bound(limit)?;

        for join in &mut plan.joins {
            select_strategy(&mut join.plan)?;
        }
        select_strategy(&mut plan)?;
        Ok(plan)
    }

    fn compile_join(&self, scope: &mut TableScope, index: usize, join: &Join) -> QueryResult<JoinSpec> {
        let TableFactor::Table { name, alias } = &join.relation else {
            return Err(QueryError::UnsupportedConstruct(
                "only tables can be joined, not sub-queries".to_string(),
            ));
        };
        let plan = self.table_plan(name, alias.clone());
        scope.push(TableRef {
            set: plan.set.clone(),
            alias: alias.clone(),
        });
        let qualifier = scope
            .qualifier(index)
            .map(str::to_string)
            .unwrap_or_else(|| name.name.clone());

        let constraint = join.constraint.ok_or_else(|| {
            QueryError::UnsupportedJoinCondition(format!("JOIN {} has no ON clause", qualifier))
        })?;
        let unsupported = || QueryError::UnsupportedJoinCondition(self.arena.render(constraint));
        let inner = self.arena.unwrap_parens(constraint);
        let Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } = self.arena.get(inner)
        else {
            return Err(unsupported());
        };
        let (Expr::Column(left), Expr::Column(right)) = (
            self.arena.get(self.arena.unwrap_parens(*left)),
            self.arena.get(self.arena.unwrap_parens(*right)),
        ) else {
            return Err(unsupported());
        };
        let (left_table, right_table) = (scope.resolve(left)?, scope.resolve(right)?);
        let (inner_col, outer_col, outer_table) = if left_table == index && right_table < index {
            (left, right, right_table)
        } else if right_table == index && left_table < index {
            (right, left, left_table)
        } else {
            return Err(unsupported());
        };

        Ok(JoinSpec {
            join_type: match join.kind {
                JoinKind::Inner => JoinType::Inner,
                JoinKind::Left => JoinType::LeftSkipIfMissing,
            },
            qualifier,
            plan,
            outer_key: scope.row_key(outer_table, &outer_col.name),
            inner_column: inner_col.name.clone(),
        })
    }

    pub(crate) fn is_aggregate_call(&self, id: ExprId) -> bool {
        matches!(self.arena.get(id), Expr::Function { name, .. } if is_aggregate(name))
    }

    pub(crate) fn has_aggregate(&self, id: ExprId) -> bool {
        self.arena
            .any(id, &|e| matches!(e, Expr::Function { name, .. } if is_aggregate(name)))
    }

    fn has_aggregate_anywhere(&self, select: &Select) -> bool {
        select.having.is_some_and(|h| self.has_aggregate(h))
            || select.projection.iter().any(|item| match item {
                SelectItem::Expr { expr, .. } => self.has_aggregate(*expr),
                SelectItem::Wildcard => false,
            })
    }

    fn group_columns(&self, scope: &TableScope, group_by: &[ExprId]) -> QueryResult<Vec<String>> {
        let mut groups = Vec::with_capacity(group_by.len());
        for id in group_by {
            let Expr::Column(col) = self.arena.get(self.arena.unwrap_parens(*id)) else {
                return Err(QueryError::UnsupportedConstruct(format!(
                    "GROUP BY supports plain columns only, got {}",
                    self.arena.render(*id)
                )));
            };
            if scope.resolve(col)? != 0 || col.is_primary_key() || col.is_digest() {
                return Err(QueryError::UnsupportedConstruct(format!("cannot group by {}", col)));
            }
            if !groups.contains(&col.name) {
                groups.push(col.name.clone());
            }
        }
        Ok(groups)
    }

    fn aggregation_plan(&self, plan: &QueryPlan, groups: &[String]) -> AggregationPlan {
        let mut specs: Vec<String> = Vec::new();
        for spec in plan.columns.iter().filter_map(|c| c.aggregate.as_ref()) {
            let spec = spec.to_string();
            if !specs.contains(&spec) {
                specs.push(spec);
            }
        }
        let call = if groups.is_empty() {
            AggregateCall {
                module: STATS_MODULE.to_string(),
                function: STATS_FUNCTION.to_string(),
                args: specs,
            }
        } else {
            let mut args: Vec<String> = groups.iter().map(|g| format!("{}{}", GROUP_ARG_PREFIX, g)).collect();
            args.extend(specs);
            AggregateCall {
                module: GROUPBY_MODULE.to_string(),
                function: GROUPBY_FUNCTION.to_string(),
                args,
            }
        };
        AggregationPlan {
            call,
            mapping: self.output_mapping(plan),
        }
    }

    fn distinct_plan(&self, plan: &QueryPlan) -> QueryResult<AggregationPlan> {
        let visible: Vec<_> = plan.visible_columns().collect();
        let column = match visible.as_slice() {
            [column] if !plan.wildcard && column.role == ColumnRole::Data && column.table.is_none() => column,
            _ => {
                return Err(QueryError::UnsupportedConstruct(
                    "DISTINCT is supported for a single column only".to_string(),
                ));
            }
        };
        Ok(AggregationPlan {
            call: AggregateCall {
                module: DISTINCT_MODULE.to_string(),
                function: DISTINCT_FUNCTION.to_string(),
                args: vec![column.name.clone()],
            },
            mapping: self.output_mapping(plan),
        })
    }

    /// Reducer keys to row keys; aliases are filled too so HAVING can name them
    fn output_mapping(&self, plan: &QueryPlan) -> OutputMapping {
        let mut entries: Vec<(String, String)> = Vec::new();
        let sources: Vec<&str> = plan.columns.iter().map(|c| c.source.as_str()).collect();
        for column in &plan.columns {
            let key = match (&column.aggregate, column.role) {
                (Some(spec), _) => spec.to_string(),
                (None, ColumnRole::Group | ColumnRole::Data) => column.name.clone(),
                (None, ColumnRole::Hidden) if column.expr.is_none() => column.name.clone(),
                _ => continue,
            };
            if !entries.iter().any(|(_, target)| target == &column.source) {
                entries.push((key.clone(), column.source.clone()));
            }
            if column.label != column.source && !sources.contains(&column.label.as_str()) {
                entries.push((key, column.label.clone()));
            }
        }
        OutputMapping::new(entries)
    }

    fn plan_order(
        &mut self,
        plan: &mut QueryPlan,
        scope: &TableScope,
        items: &[OrderByItem],
        grouping: Option<&[String]>,
    ) -> QueryResult<Vec<OrderSpec>> {
        let mut specs = Vec::with_capacity(items.len());
        for item in items {
            let id = self.arena.unwrap_parens(item.expr);
            let key = match self.arena.get(id).clone() {
                Expr::Literal(Literal::Integer(position)) => {
                    let source = usize::try_from(position)
                        .ok()
                        .and_then(|p| p.checked_sub(1))
                        .and_then(|p| plan.visible_columns().nth(p))
                        .map(|c| c.source.clone())
                        .ok_or_else(|| {
                            QueryError::InvalidOperation(format!("ORDER BY position {} is out of range", position))
                        })?;
                    OrderKey::Column(source)
                }
                Expr::Column(col) => {
                    let aliased = col
                        .table
                        .is_none()
                        .then(|| plan.visible_columns().find(|c| c.label == col.name))
                        .flatten();
                    match aliased {
                        Some(column) => OrderKey::Column(column.source.clone()),
                        None => {
                            if let Some(groups) = grouping {
                                self.register_grouped_expression(plan, scope, id, groups)?;
                            }
                            let table = scope.resolve(&col)?;
                            OrderKey::Column(scope.row_key(table, &col.name))
                        }
                    }
                }
                _ if self.has_subquery(id) => {
                    return Err(QueryError::UnsupportedConstruct(
                        "sub-queries are not allowed in ORDER BY".to_string(),
                    ));
                }
                _ => match grouping {
                    Some(groups) => {
                        self.register_grouped_expression(plan, scope, id, groups)?;
                        if self.is_aggregate_call(id) {
                            OrderKey::Column(self.arena.render(id))
                        } else {
                            OrderKey::Expr(id)
                        }
                    }
                    None => OrderKey::Expr(id),
                },
            };
            specs.push(OrderSpec { key, desc: !item.asc });
        }
        Ok(specs)
    }

    /// ORDER BY of a set operation, applied to rows already labeled by the head
    fn chain_order(&self, head: &QueryNode, items: &[OrderByItem]) -> QueryResult<Vec<OrderSpec>> {
        let labels = head.labels();
        let mut specs = Vec::with_capacity(items.len());
        for item in items {
            let id = self.arena.unwrap_parens(item.expr);
            let key = match self.arena.get(id) {
                Expr::Literal(Literal::Integer(position)) => {
                    let position = usize::try_from(*position)
                        .ok()
                        .filter(|p| *p >= 1 && (labels.is_empty() || *p <= labels.len()))
                        .ok_or_else(|| {
                            QueryError::InvalidOperation(format!("ORDER BY position {} is out of range", position))
                        })?;
                    OrderKey::Position(position)
                }
                Expr::Column(col) => OrderKey::Column(col.name.clone()),
                _ if self.has_subquery(id) => {
                    return Err(QueryError::UnsupportedConstruct(
                        "sub-queries are not allowed in ORDER BY".to_string(),
                    ));
                }
                _ => OrderKey::Expr(id),
            };
            specs.push(OrderSpec { key, desc: !item.asc });
        }
        Ok(specs)
    }

    fn row_bound(&self, id: Option<ExprId>) -> QueryResult<Option<RowBound>> {
        let Some(id) = id else {
            return Ok(None);
        };
        match self.arena.get(self.arena.unwrap_parens(id)) {
            Expr::Literal(Literal::Integer(v)) if *v >= 0 => Ok(Some(RowBound::Value(*v as u64))),
            Expr::Placeholder(index) => Ok(Some(RowBound::Placeholder(*index))),
            _ => Err(QueryError::UnsupportedConstruct(format!(
                "LIMIT and OFFSET take a non-negative integer or a parameter, got {}",
                self.arena.render(id)
            ))),
        }
    }
}

fn flatten_set_operation<'q>(body: &'q SetExpr, op: Option<SetOperator>, out: &mut Vec<(Option<SetOperator>, &'q SetExpr)>) {
    match body {
        SetExpr::SetOperation { op: inner, left, right } => {
            flatten_set_operation(left, op, out);
            out.push((Some(*inner), &**right));
        }
        select => out.push((op, select)),
    }
}

/// Highest placeholder index in a statement
fn parameter_count(arena: &ExprArena, statement: &Statement) -> usize {
    let max_of = |ids: &mut dyn Iterator<Item = ExprId>| ids.map(|id| arena.max_placeholder(id)).max().unwrap_or(0);
    match statement {
        Statement::Query(query) => arena.query_max_placeholder(query),
        Statement::Insert(insert) => max_of(&mut insert.rows.iter().flatten().copied()),
        Statement::Update(update) => max_of(
            &mut update
                .assignments
                .iter()
                .map(|(_, id)| *id)
                .chain(update.selection)
                .chain(update.limit),
        ),
        Statement::Delete(delete) => max_of(&mut delete.selection.into_iter().chain(delete.limit)),
        Statement::Truncate { .. } | Statement::CreateIndex(_) | Statement::DropIndex { .. } => 0,
    }
}
