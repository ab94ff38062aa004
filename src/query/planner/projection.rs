// Projection Resolver
//
// Classifies every selected expression by shape and registers the columns
// it needs. Expressions register their inputs as hidden columns; aggregate
// queries only accept grouping columns and aggregate calls.

use super::compiler::{CompileContext, TableScope};
use super::plan::{Column, ColumnRole, QueryPlan};
use crate::query::ast::{ColumnRef, Expr, ExprId, SelectItem};
use crate::query::executor::functions::is_aggregate;
use crate::query::executor::operators::agg::{AggregateSpec, AggregateType};
use crate::query::executor::result::{QueryError, QueryResult};

/// Shape of a selected expression
enum Shape {
    Column(ColumnRef),
    Aggregate,
    Scalar,
}

impl CompileContext<'_> {
    pub(crate) fn resolve_projection(
        &mut self,
        plan: &mut QueryPlan,
        scope: &TableScope,
        items: &[SelectItem],
        grouping: Option<&[String]>,
    ) -> QueryResult<()> {
        for item in items {
            match item {
                SelectItem::Wildcard => {
                    if grouping.is_some() {
                        return Err(QueryError::UnsupportedConstruct(
                            "* cannot be combined with aggregation".to_string(),
                        ));
                    }
                    plan.wildcard = true;
                }
                SelectItem::Expr { expr, alias } => {
                    let id = self.arena.unwrap_parens(*expr);
                    match self.shape(id)? {
                        Shape::Column(col) => self.column_item(plan, scope, &col, alias.as_deref(), grouping)?,
                        Shape::Aggregate => self.aggregate_item(plan, id, alias.as_deref(), true)?,
                        Shape::Scalar => self.expression_item(plan, scope, id, alias.as_deref(), grouping)?,
                    }
                }
            }
        }
        Ok(())
    }

    fn shape(&self, id: ExprId) -> QueryResult<Shape> {
        let unsupported = || QueryError::UnsupportedColumnExpression(self.arena.render(id));
        match self.arena.get(id) {
            Expr::Column(col) => Ok(Shape::Column(col.clone())),
            Expr::Function { name, .. } if is_aggregate(name) => Ok(Shape::Aggregate),
            _ if self.has_subquery(id) => Err(unsupported()),
            Expr::Literal(_)
            | Expr::BinaryOp { .. }
            | Expr::Unary { .. }
            | Expr::IsNull { .. }
            | Expr::Function { .. }
            | Expr::Array(_)
            | Expr::FieldAccess { .. } => Ok(Shape::Scalar),
            Expr::Placeholder(_)
            | Expr::Between { .. }
            | Expr::InList { .. }
            | Expr::InSubquery { .. }
            | Expr::Subquery(_)
            | Expr::Wildcard
            | Expr::Parenthesis(_) => Err(unsupported()),
        }
    }

    fn column_item(
        &mut self,
        plan: &mut QueryPlan,
        scope: &TableScope,
        col: &ColumnRef,
        alias: Option<&str>,
        grouping: Option<&[String]>,
    ) -> QueryResult<()> {
        let table = scope.resolve(col)?;
        let mut role = if col.is_primary_key() {
            ColumnRole::PrimaryKey
        } else if col.is_digest() {
            ColumnRole::PrimaryKeyDigest
        } else {
            ColumnRole::Data
        };
        if let Some(groups) = grouping {
            if role != ColumnRole::Data || table != 0 || !groups.contains(&col.name) {
                return Err(QueryError::UnsupportedConstruct(format!(
                    "column {} must appear in GROUP BY",
                    col
                )));
            }
            role = ColumnRole::Group;
        }
        if role == ColumnRole::PrimaryKeyDigest {
            table_plan(plan, table).needs_digest = true;
        }

        let label = match alias {
            Some(alias) => alias.to_string(),
            None if plan.labels().contains(&col.name.as_str()) => scope
                .qualifier(table)
                .map_or_else(|| col.name.clone(), |q| format!("{}.{}", q, col.name)),
            None => col.name.clone(),
        };
        let column = Column {
            catalog: Some(table_plan(plan, table).namespace.clone()),
            table: (table > 0).then(|| scope.qualifier(table).unwrap_or_default().to_string()),
            name: col.name.clone(),
            label,
            source: scope.row_key(table, &col.name),
            role,
            expr: None,
            aggregate: None,
        };
        register(plan, column, table);
        Ok(())
    }

    fn expression_item(
        &mut self,
        plan: &mut QueryPlan,
        scope: &TableScope,
        id: ExprId,
        alias: Option<&str>,
        grouping: Option<&[String]>,
    ) -> QueryResult<()> {
        match grouping {
            Some(groups) => self.register_grouped_expression(plan, scope, id, groups)?,
            None => {
                for col in self.arena.referenced_columns(id) {
                    let table = scope.resolve(&col)?;
                    if col.is_digest() {
                        table_plan(plan, table).needs_digest = true;
                    }
                    let source = scope.row_key(table, &col.name);
                    let hidden = Column {
                        catalog: Some(table_plan(plan, table).namespace.clone()),
                        table: (table > 0).then(|| scope.qualifier(table).unwrap_or_default().to_string()),
                        name: col.name.clone(),
                        label: source.clone(),
                        source,
                        role: ColumnRole::Hidden,
                        expr: None,
                        aggregate: None,
                    };
                    register(plan, hidden, table);
                }
            }
        }

        let text = self.arena.render(id);
        let column = Column {
            catalog: Some(plan.namespace.clone()),
            table: None,
            name: text.clone(),
            label: alias.map_or_else(|| text.clone(), str::to_string),
            source: text,
            role: ColumnRole::Expression,
            expr: Some(id),
            aggregate: None,
        };
        register(plan, column, 0);
        Ok(())
    }

    fn aggregate_item(&mut self, plan: &mut QueryPlan, id: ExprId, alias: Option<&str>, visible: bool) -> QueryResult<()> {
        let spec = self.aggregate_spec(id)?;
        let text = self.arena.render(id);
        let column = Column {
            catalog: Some(plan.namespace.clone()),
            table: None,
            name: text.clone(),
            label: alias.map_or_else(|| text.clone(), str::to_string),
            source: text,
            role: if visible { ColumnRole::Aggregated } else { ColumnRole::Hidden },
            expr: Some(id),
            aggregate: Some(spec),
        };
        register(plan, column, 0);
        Ok(())
    }

    fn aggregate_spec(&self, id: ExprId) -> QueryResult<AggregateSpec> {
        let Expr::Function { name, args, distinct } = self.arena.get(id) else {
            return Err(QueryError::UnsupportedColumnExpression(self.arena.render(id)));
        };
        if *distinct {
            return Err(QueryError::UnsupportedConstruct(format!(
                "{}(DISTINCT ...) is not supported",
                name
            )));
        }
        let agg_type = AggregateType::from_name(name).ok_or_else(|| QueryError::UnknownFunction(name.clone()))?;
        let args: Vec<ExprId> = args.iter().map(|a| self.arena.unwrap_parens(*a)).collect();
        let column = match args.as_slice() {
            [] => None,
            [arg] => match self.arena.get(*arg) {
                Expr::Wildcard => None,
                Expr::Column(col) => {
                    if col.is_primary_key() || col.is_digest() {
                        return Err(QueryError::UnsupportedConstruct(format!("cannot aggregate {}", col)));
                    }
                    Some(col.name.clone())
                }
                _ => {
                    return Err(QueryError::UnsupportedConstruct(format!(
                        "aggregate arguments must be plain columns, got {}",
                        self.arena.render(id)
                    )));
                }
            },
            _ => {
                return Err(QueryError::UnsupportedConstruct(format!(
                    "{} takes one argument",
                    name
                )));
            }
        };
        if column.is_none() && agg_type != AggregateType::Count {
            return Err(QueryError::UnsupportedConstruct(format!("{}(*) is not supported", name)));
        }
        Ok(AggregateSpec::new(agg_type, column))
    }

    /// Register what an expression over grouped rows needs: aggregate calls
    /// become hidden reducer outputs, plain columns must be grouping columns.
    pub(crate) fn register_grouped_expression(
        &mut self,
        plan: &mut QueryPlan,
        scope: &TableScope,
        id: ExprId,
        groups: &[String],
    ) -> QueryResult<()> {
        let node = self.arena.get(id).clone();
        match node {
            Expr::Function { ref name, .. } if is_aggregate(name) => self.aggregate_item(plan, id, None, false),
            Expr::Column(col) => {
                // Aliases of selected columns are resolvable in grouped rows
                if col.table.is_none() && plan.labels().contains(&col.name.as_str()) {
                    return Ok(());
                }
                if scope.resolve(&col)? != 0 || !groups.contains(&col.name) {
                    return Err(QueryError::UnsupportedConstruct(format!(
                        "column {} must appear in GROUP BY",
                        col
                    )));
                }
                let hidden = Column {
                    catalog: Some(plan.namespace.clone()),
                    table: None,
                    name: col.name.clone(),
                    label: col.name.clone(),
                    source: col.name.clone(),
                    role: ColumnRole::Hidden,
                    expr: None,
                    aggregate: None,
                };
                register(plan, hidden, 0);
                Ok(())
            }
            other => {
                for child in children(&other) {
                    self.register_grouped_expression(plan, scope, child, groups)?;
                }
                Ok(())
            }
        }
    }
}

/// Direct sub-expressions; sub-query bodies are not entered
fn children(expr: &Expr) -> Vec<ExprId> {
    match expr {
        Expr::BinaryOp { left, right, .. } => vec![*left, *right],
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Parenthesis(expr) => vec![*expr],
        Expr::Between { expr, low, high, .. } => vec![*expr, *low, *high],
        Expr::InList { expr, list, .. } => std::iter::once(*expr).chain(list.iter().copied()).collect(),
        Expr::InSubquery { expr, .. } => vec![*expr],
        Expr::Function { args, .. } | Expr::Array(args) => args.clone(),
        Expr::FieldAccess { expr, key } => vec![*expr, *key],
        Expr::Literal(_) | Expr::Column(_) | Expr::Placeholder(_) | Expr::Subquery(_) | Expr::Wildcard => Vec::new(),
    }
}

/// Plan that owns a table's columns: the main plan or a join's nested plan
fn table_plan(plan: &mut QueryPlan, table: usize) -> &mut QueryPlan {
    match table.checked_sub(1) {
        Some(join) if join < plan.joins.len() => &mut plan.joins[join].plan,
        _ => plan,
    }
}

/// Add a column without duplicating one already registered for the same value.
/// A visible column replaces a hidden one for the same source.
fn register(plan: &mut QueryPlan, column: Column, table: usize) {
    if column.is_visible() {
        if plan
            .columns
            .iter()
            .any(|c| c.is_visible() && c.source == column.source && c.label == column.label)
        {
            return;
        }
        if let Some(position) = plan
            .columns
            .iter()
            .position(|c| !c.is_visible() && c.source == column.source)
        {
            plan.columns.remove(position);
        }
    } else if plan.columns.iter().any(|c| c.source == column.source) {
        return;
    }

    if table > 0 {
        let nested = table_plan(plan, table);
        if !nested.columns.iter().any(|c| c.source == column.source) {
            nested.columns.push(column.clone());
        }
    }
    plan.columns.push(column);
}
