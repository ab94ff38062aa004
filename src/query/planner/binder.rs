// Parameter Binder
//
// Second phase of compilation. Works on a fresh copy of the compiled
// statement: replaces placeholders with the bound values, retypes the bins
// they are compared against, and reselects every access strategy. Sub-query
// slots are resolved separately once the store is available.

use log::debug;

use super::plan::{
    ChainPlan, CompiledStatement, Condition, KeyCondition, KeyValue, QueryNode, QueryPlan, RowBound, SubqueryContext,
};
use super::selector::select_strategy;
use crate::common::types::UserKey;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::storage::filter::{BinKind, CompareOp, InstructionValue};

/// Where a plan sits in the statement; decides what a bound float can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanRole {
    /// Main table of a query or DML selection: may fall back to row filtering
    Main,
    /// Right side of a join: must stay native
    Join,
}

/// Substitutes positional parameters into a compiled statement
pub struct ParameterBinder<'p> {
    params: &'p [DataValue],
}

impl<'p> ParameterBinder<'p> {
    pub fn new(params: &'p [DataValue]) -> Self {
        ParameterBinder { params }
    }

    pub fn bind_statement(&self, statement: &mut CompiledStatement) -> QueryResult<()> {
        match statement {
            CompiledStatement::Query(node) => self.bind_node(node),
            CompiledStatement::Update(update) => {
                self.bind_plan(&mut update.selection, PlanRole::Main)?;
                update.limit = self.bind_bound(update.limit)?;
                Ok(())
            }
            CompiledStatement::Delete(delete) => {
                self.bind_plan(&mut delete.selection, PlanRole::Main)?;
                delete.limit = self.bind_bound(delete.limit)?;
                Ok(())
            }
            // Row values and assignments are evaluated with the parameters at execution
            CompiledStatement::Insert(_)
            | CompiledStatement::Truncate { .. }
            | CompiledStatement::CreateIndex(_)
            | CompiledStatement::DropIndex { .. } => Ok(()),
        }
    }

    fn bind_node(&self, node: &mut QueryNode) -> QueryResult<()> {
        match node {
            QueryNode::Plan(plan) => self.bind_plan(plan, PlanRole::Main),
            QueryNode::Chain(chain) => self.bind_chain(chain),
        }
    }

    fn bind_chain(&self, chain: &mut ChainPlan) -> QueryResult<()> {
        self.bind_node(&mut chain.head)?;
        for link in &mut chain.links {
            self.bind_node(&mut link.node)?;
        }
        chain.offset = self.bind_bound(chain.offset)?;
        chain.limit = self.bind_bound(chain.limit)?;
        Ok(())
    }

    fn bind_plan(&self, plan: &mut QueryPlan, role: PlanRole) -> QueryResult<()> {
        if let Some(source) = plan.source.as_deref_mut() {
            self.bind_node(source)?;
        }
        for slot in &mut plan.subqueries {
            self.bind_node(&mut slot.node)?;
        }
        for join in &mut plan.joins {
            self.bind_plan(&mut join.plan, PlanRole::Join)?;
        }

        let mut float_bound = None;
        if let Some(condition) = plan.condition.as_mut() {
            let mut failure = None;
            condition.for_each_value(&mut |value, kind| {
                if failure.is_some() {
                    return;
                }
                if let InstructionValue::Placeholder(index) = *value {
                    match self.instruction_value(index, *kind) {
                        Ok(Some((bound, bound_kind))) => {
                            *value = bound;
                            *kind = bound_kind;
                        }
                        Ok(None) => float_bound = Some(index),
                        Err(err) => failure = Some(err),
                    }
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
        }

        if let Some(key) = plan.key_condition.take() {
            plan.key_condition = Some(self.bind_key_condition(key)?);
        }
        plan.offset = self.bind_bound(plan.offset)?;
        plan.limit = self.bind_bound(plan.limit)?;

        if let Some(index) = float_bound {
            switch_to_fallback(plan, role, index)?;
        }
        select_strategy(plan)
    }

    fn param(&self, index: usize) -> QueryResult<&DataValue> {
        index
            .checked_sub(1)
            .and_then(|i| self.params.get(i))
            .ok_or(QueryError::ParameterNotFound(index))
    }

    /// Bound value of a native comparison; `None` when only row filtering can compare it
    fn instruction_value(&self, index: usize, kind: BinKind) -> QueryResult<Option<(InstructionValue, BinKind)>> {
        let value = self.param(index)?;
        if kind == BinKind::Integer && !matches!(value, DataValue::Integer(_) | DataValue::Boolean(_)) {
            return Err(QueryError::TypeMismatch(format!(
                "BETWEEN can be applied to integer values only, parameter {} is {}",
                index,
                value.type_name()
            )));
        }
        to_instruction_value(value, kind)
    }

    fn key_value(&self, value: KeyValue) -> QueryResult<Option<KeyValue>> {
        match value {
            KeyValue::Placeholder(index) => {
                let bound = self.param(index)?;
                if bound.is_null() {
                    return Ok(None);
                }
                Ok(Some(KeyValue::Key(UserKey::from_value(bound)?)))
            }
            other => Ok(Some(other)),
        }
    }

    fn bind_key_condition(&self, condition: KeyCondition) -> QueryResult<KeyCondition> {
        // A null key matches no record
        let nothing = || KeyCondition::In(Vec::new());
        Ok(match condition {
            KeyCondition::Equal(value) => match self.key_value(value)? {
                Some(value) => KeyCondition::Equal(value),
                None => nothing(),
            },
            KeyCondition::NotEqual(value) => match self.key_value(value)? {
                Some(value) => KeyCondition::NotEqual(value),
                None => nothing(),
            },
            KeyCondition::Range { low, high } => match (self.key_value(low)?, self.key_value(high)?) {
                (Some(low), Some(high)) => KeyCondition::Range { low, high },
                _ => nothing(),
            },
            KeyCondition::In(values) => {
                let mut bound = Vec::with_capacity(values.len());
                for value in values {
                    if let Some(value) = self.key_value(value)? {
                        bound.push(value);
                    }
                }
                KeyCondition::In(bound)
            }
            KeyCondition::All(children) => {
                let mut bound: Option<KeyCondition> = None;
                for child in children {
                    let child = self.bind_key_condition(child)?;
                    bound = Some(match bound {
                        None => child,
                        Some(acc) => acc.and(child),
                    });
                }
                bound.unwrap_or_else(|| KeyCondition::All(Vec::new()))
            }
            other @ KeyCondition::InSubquery(_) => other,
        })
    }

    fn bind_bound(&self, bound: Option<RowBound>) -> QueryResult<Option<RowBound>> {
        match bound {
            Some(RowBound::Placeholder(index)) => match self.param(index)? {
                DataValue::Integer(v) if *v >= 0 => Ok(Some(RowBound::Value(*v as u64))),
                other => Err(QueryError::TypeMismatch(format!(
                    "LIMIT and OFFSET require a non-negative integer, parameter {} is {}",
                    index, other
                ))),
            },
            other => Ok(other),
        }
    }
}

fn to_instruction_value(value: &DataValue, kind: BinKind) -> QueryResult<Option<(InstructionValue, BinKind)>> {
    let retype = |resolved: BinKind| if kind == BinKind::Unresolved { resolved } else { kind };
    match value {
        DataValue::Integer(i) => Ok(Some((InstructionValue::Integer(*i), retype(BinKind::Integer)))),
        DataValue::Boolean(b) => Ok(Some((InstructionValue::Integer(*b as i64), retype(BinKind::Integer)))),
        DataValue::Text(s) => Ok(Some((InstructionValue::String(s.clone()), retype(BinKind::String)))),
        DataValue::Null => Ok(Some((InstructionValue::Null, kind))),
        DataValue::Float(_) => Ok(None),
        other => Err(QueryError::TypeMismatch(format!(
            "{} values cannot be compared in a predicate",
            other.type_name()
        ))),
    }
}

fn switch_to_fallback(plan: &mut QueryPlan, role: PlanRole, index: usize) -> QueryResult<()> {
    let unsupported = || {
        QueryError::UnsupportedConstruct(format!(
            "parameter {} is a float and cannot be compared natively here",
            index
        ))
    };
    if role == PlanRole::Join || (plan.aggregation.is_some() && plan.source.is_none()) {
        return Err(unsupported());
    }
    let where_clause = plan.where_clause.clone().ok_or_else(unsupported)?;
    debug!("Float parameter {} moves WHERE to row filtering: {}", index, where_clause.text);
    plan.condition = None;
    plan.key_condition = None;
    plan.fallback = Some(where_clause);
    Ok(())
}

/// Run every sub-query of `plan` through `run` and substitute the results
pub fn resolve_subqueries(
    plan: &mut QueryPlan,
    run: &mut dyn FnMut(&QueryNode) -> QueryResult<Vec<Row>>,
) -> QueryResult<()> {
    if plan.subqueries.is_empty() {
        return Ok(());
    }

    let mut results: Vec<Vec<DataValue>> = Vec::with_capacity(plan.subqueries.len());
    for slot in &plan.subqueries {
        let labels = slot.node.labels().len();
        if !slot.node.first_plan().wildcard && labels != 1 {
            return Err(QueryError::WrongColumnCount(labels));
        }
        let rows = run(&slot.node)?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != 1 {
                return Err(QueryError::WrongColumnCount(row.len()));
            }
            values.extend(row.values().into_iter().cloned());
        }
        if let SubqueryContext::Scalar(op) = &slot.context {
            if values.len() > 1 {
                return Err(QueryError::TooManyRows(op.to_string()));
            }
        }
        debug!("Sub-query resolved to {} values", values.len());
        results.push(values);
    }

    if let Some(condition) = plan.condition.take() {
        plan.condition = Some(substitute_condition(condition, &results)?);
    }
    if let Some(key) = plan.key_condition.take() {
        plan.key_condition = Some(substitute_key(key, &results)?);
    }
    select_strategy(plan)
}

fn scalar(results: &[Vec<DataValue>], slot: usize) -> QueryResult<DataValue> {
    let values = results
        .get(slot)
        .ok_or_else(|| QueryError::ExecutionError(format!("Sub-query slot {} was never run", slot)))?;
    Ok(values.first().cloned().unwrap_or(DataValue::Null))
}

fn substitute_condition(condition: Condition, results: &[Vec<DataValue>]) -> QueryResult<Condition> {
    match condition {
        Condition::Compare {
            bin,
            kind,
            op,
            value: InstructionValue::Subquery(slot),
        } => {
            let value = scalar(results, slot)?;
            let (value, kind) = to_instruction_value(&value, kind)?
                .ok_or_else(|| QueryError::TypeMismatch("Sub-query returned a float; compare it in a filter".to_string()))?;
            Ok(Condition::Compare { bin, kind, op, value })
        }
        Condition::InSubquery { bin, kind, slot } => {
            let values = results
                .get(slot)
                .ok_or_else(|| QueryError::ExecutionError(format!("Sub-query slot {} was never run", slot)))?;
            let mut alternatives = Vec::with_capacity(values.len());
            for value in values.iter().filter(|v| !v.is_null()) {
                let (value, kind) = to_instruction_value(value, kind)?.ok_or_else(|| {
                    QueryError::TypeMismatch("Sub-query returned a float; compare it in a filter".to_string())
                })?;
                alternatives.push(Condition::Compare {
                    bin: bin.clone(),
                    kind,
                    op: CompareOp::Eq,
                    value,
                });
            }
            Ok(Condition::Or(alternatives))
        }
        Condition::And(children) => Ok(Condition::And(
            children
                .into_iter()
                .map(|child| substitute_condition(child, results))
                .collect::<QueryResult<_>>()?,
        )),
        Condition::Or(children) => Ok(Condition::Or(
            children
                .into_iter()
                .map(|child| substitute_condition(child, results))
                .collect::<QueryResult<_>>()?,
        )),
        other => Ok(other),
    }
}

fn substitute_key(condition: KeyCondition, results: &[Vec<DataValue>]) -> QueryResult<KeyCondition> {
    let resolve = |value: KeyValue| -> QueryResult<Option<KeyValue>> {
        match value {
            KeyValue::Subquery(slot) => {
                let value = scalar(results, slot)?;
                if value.is_null() {
                    return Ok(None);
                }
                Ok(Some(KeyValue::Key(UserKey::from_value(&value)?)))
            }
            other => Ok(Some(other)),
        }
    };
    Ok(match condition {
        KeyCondition::InSubquery(slot) => {
            let values = results
                .get(slot)
                .ok_or_else(|| QueryError::ExecutionError(format!("Sub-query slot {} was never run", slot)))?;
            let keys = values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| UserKey::from_value(v).map(KeyValue::Key))
                .collect::<QueryResult<Vec<_>>>()?;
            KeyCondition::In(keys)
        }
        KeyCondition::Equal(value) => match resolve(value)? {
            Some(value) => KeyCondition::Equal(value),
            None => KeyCondition::In(Vec::new()),
        },
        KeyCondition::NotEqual(value) => match resolve(value)? {
            Some(value) => KeyCondition::NotEqual(value),
            None => KeyCondition::In(Vec::new()),
        },
        KeyCondition::All(children) => {
            let mut merged: Option<KeyCondition> = None;
            for child in children {
                let child = substitute_key(child, results)?;
                merged = Some(match merged {
                    None => child,
                    Some(acc) => acc.and(child),
                });
            }
            merged.unwrap_or_else(|| KeyCondition::All(Vec::new()))
        }
        other => other,
    })
}
