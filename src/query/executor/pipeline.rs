// Result Pipeline Composer
//
// Builds the operator tree of a bound plan: store access, client-side
// filters and computed columns, joins, ordering, paging and projection.
// Set operations chain sibling pipelines. Sub-queries are run first and
// their results substituted into the plans that use them.

use std::sync::Arc;

use log::debug;

use crate::query::ast::ExprId;
use crate::query::executor::engine::ExecutionContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::operators::agg::HashAggregateOperator;
use crate::query::executor::operators::compute::ComputeOperator;
use crate::query::executor::operators::fetch::{AggregateFetchOperator, FetchOperator};
use crate::query::executor::operators::filter::FilterOperator;
use crate::query::executor::operators::join::NestedLoopJoin;
use crate::query::executor::operators::limit::LimitOperator;
use crate::query::executor::operators::project::ProjectionOperator;
use crate::query::executor::operators::sort::SortOperator;
use crate::query::executor::operators::union::{ConcatOperator, DistinctOperator};
use crate::query::executor::result::{QueryError, QueryResult, Row};
use crate::query::planner::binder::resolve_subqueries;
use crate::query::planner::plan::{ChainMode, ChainPlan, ColumnRole, OrderSpec, QueryNode, QueryPlan, RowBound};

/// Run the sub-queries a node depends on and substitute their results
pub fn prepare(ctx: &Arc<ExecutionContext>, node: &mut QueryNode) -> QueryResult<()> {
    match node {
        QueryNode::Plan(plan) => prepare_plan(ctx, plan),
        QueryNode::Chain(chain) => {
            prepare(ctx, &mut chain.head)?;
            for link in &mut chain.links {
                prepare(ctx, &mut link.node)?;
            }
            Ok(())
        }
    }
}

pub fn prepare_plan(ctx: &Arc<ExecutionContext>, plan: &mut QueryPlan) -> QueryResult<()> {
    if let Some(source) = plan.source.as_mut() {
        prepare(ctx, source)?;
    }
    resolve_subqueries(plan, &mut |node| {
        let mut node = node.clone();
        prepare(ctx, &mut node)?;
        let mut op = build(ctx, &node)?;
        drain(op.as_mut())
    })
}

/// Operator tree of a prepared node
pub fn build(ctx: &Arc<ExecutionContext>, node: &QueryNode) -> QueryResult<Box<dyn Operator>> {
    match node {
        QueryNode::Plan(plan) => build_plan(ctx, plan),
        QueryNode::Chain(chain) => build_chain(ctx, chain),
    }
}

fn build_plan(ctx: &Arc<ExecutionContext>, plan: &QueryPlan) -> QueryResult<Box<dyn Operator>> {
    let computed = computed_columns(ctx, plan);
    let mut op: Box<dyn Operator> = match (&plan.source, &plan.aggregation) {
        (Some(source), Some(aggregation)) => {
            // WHERE filters source rows before they are grouped
            let op = with_fallback(ctx, build(ctx, source)?, plan);
            Box::new(HashAggregateOperator::new(
                op,
                aggregation.call.clone(),
                aggregation.mapping.clone(),
            ))
        }
        (Some(source), None) => build(ctx, source)?,
        (None, Some(_)) => Box::new(AggregateFetchOperator::new(ctx.clone(), plan)?),
        (None, None) => Box::new(FetchOperator::new(ctx.clone(), plan)?),
    };

    if !computed.early.is_empty() {
        op = Box::new(ComputeOperator::new(op, ctx.clone(), computed.early).with_aliases(computed.aliases));
    }
    if plan.aggregation.is_none() {
        op = with_fallback(ctx, op, plan);
    }
    if let Some(having) = &plan.having {
        op = Box::new(FilterOperator::new(op, ctx.clone(), having.expr));
    }
    for join in &plan.joins {
        op = Box::new(NestedLoopJoin::new(op, ctx.clone(), join.clone()));
    }
    if !computed.late.is_empty() {
        op = Box::new(ComputeOperator::new(op, ctx.clone(), computed.late));
    }

    let offset = bound(plan.offset)?;
    let limit = bound(plan.limit)?;
    op = order_and_page(ctx, op, &plan.order_by, offset, limit);
    op = Box::new(ProjectionOperator::new(op, plan));

    debug!(
        "Built pipeline for {}: {} joins, sorted: {}",
        plan.set.as_deref().unwrap_or("<source>"),
        plan.joins.len(),
        !plan.order_by.is_empty()
    );
    Ok(op)
}

fn build_chain(ctx: &Arc<ExecutionContext>, chain: &ChainPlan) -> QueryResult<Box<dyn Operator>> {
    let labels: Option<Vec<String>> = (!chain.head.first_plan().wildcard)
        .then(|| chain.head.labels().into_iter().map(str::to_string).collect());

    let mut op = build(ctx, &chain.head)?;
    for link in &chain.links {
        let sibling = build(ctx, &link.node)?;
        op = Box::new(ConcatOperator::new(vec![op, sibling], labels.clone()));
        if link.mode == ChainMode::Union {
            op = Box::new(DistinctOperator::new(op));
        }
    }

    let offset = bound(chain.offset)?;
    let limit = bound(chain.limit)?;
    Ok(order_and_page(ctx, op, &chain.order_by, offset, limit))
}

fn order_and_page(
    ctx: &Arc<ExecutionContext>,
    mut op: Box<dyn Operator>,
    order_by: &[OrderSpec],
    offset: Option<u64>,
    limit: Option<u64>,
) -> Box<dyn Operator> {
    if !order_by.is_empty() {
        let top_n = limit.and_then(|limit| usize::try_from(offset.unwrap_or(0).saturating_add(limit)).ok());
        op = Box::new(SortOperator::new(op, ctx.clone(), order_by.to_vec(), top_n));
    }
    if offset.is_some() || limit.is_some() {
        op = Box::new(LimitOperator::new(op, offset.unwrap_or(0), limit));
    }
    op
}

/// Computed columns, split into those evaluated before the joins and those
/// that need values of a joined table
fn with_fallback(ctx: &Arc<ExecutionContext>, op: Box<dyn Operator>, plan: &QueryPlan) -> Box<dyn Operator> {
    match &plan.fallback {
        Some(fallback) => Box::new(FilterOperator::new(op, ctx.clone(), fallback.expr)),
        None => op,
    }
}

/// Computed columns split by when they can be evaluated
struct ComputedColumns {
    /// Main-table expressions, evaluated before the row filter and the joins
    early: Vec<(String, ExprId)>,
    /// Expressions over joined columns, evaluated after the joins
    late: Vec<(String, ExprId)>,
    /// (alias, row key) of the early columns
    aliases: Vec<(String, String)>,
}

fn computed_columns(ctx: &ExecutionContext, plan: &QueryPlan) -> ComputedColumns {
    let mut computed = ComputedColumns {
        early: Vec::new(),
        late: Vec::new(),
        aliases: Vec::new(),
    };
    for column in &plan.columns {
        let (ColumnRole::Expression, Some(expr)) = (column.role, column.expr) else {
            continue;
        };
        let joined = ctx.arena.referenced_columns(expr).iter().any(|col| {
            col.table
                .as_deref()
                .is_some_and(|table| plan.joins.iter().any(|join| join.qualifier == table))
        });
        if joined {
            computed.late.push((column.source.clone(), expr));
        } else {
            if column.label != column.source {
                computed.aliases.push((column.label.clone(), column.source.clone()));
            }
            computed.early.push((column.source.clone(), expr));
        }
    }
    computed
}

fn bound(value: Option<RowBound>) -> QueryResult<Option<u64>> {
    match value {
        None => Ok(None),
        Some(RowBound::Value(v)) => Ok(Some(v)),
        Some(RowBound::Placeholder(index)) => Err(QueryError::ParameterNotFound(index)),
    }
}

/// Run an operator to completion
pub fn drain(op: &mut dyn Operator) -> QueryResult<Vec<Row>> {
    op.init()?;
    let mut rows = Vec::new();
    while let Some(row) = op.next()? {
        rows.push(row);
    }
    op.close()?;
    Ok(rows)
}

/// Records picked by an UPDATE or DELETE selection, in store order
pub fn selected_rows(ctx: &Arc<ExecutionContext>, selection: &mut QueryPlan, limit: Option<RowBound>) -> QueryResult<Vec<Row>> {
    prepare_plan(ctx, selection)?;
    let mut op: Box<dyn Operator> = Box::new(FetchOperator::new(ctx.clone(), selection)?);
    if let Some(fallback) = &selection.fallback {
        op = Box::new(FilterOperator::new(op, ctx.clone(), fallback.expr));
    }
    if let Some(limit) = bound(limit)? {
        op = Box::new(LimitOperator::new(op, 0, Some(limit)));
    }
    drain(op.as_mut())
}
