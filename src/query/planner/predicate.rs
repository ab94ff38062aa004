// Predicate Compiler
//
// Routes WHERE conjuncts to the table they constrain and compiles them into
// native conditions. Key comparisons become key conditions. A main-table
// WHERE that does not compile natively is evaluated row by row instead.

use log::debug;

use super::compiler::{CompileContext, TableScope};
use super::plan::{Condition, FallbackExpression, KeyCondition, KeyValue, QueryPlan, SubqueryContext, SubquerySlot};
use crate::common::types::UserKey;
use crate::query::ast::{BinaryOperator, Expr, ExprArena, ExprId, Literal, Query, UnaryOperator};
use crate::query::executor::expression_eval::ExpressionEvaluator;
use crate::query::executor::functions::is_aggregate;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::storage::filter::{BinKind, CompareOp, InstructionValue};

/// A conjunct compiled for the store
enum Native {
    Filter(Condition),
    Key(KeyCondition),
}

/// One side of a comparison
enum Operand {
    /// Bin of the table being filtered
    Bin(String),
    /// Primary key of the table being filtered
    Key,
    /// Row key of a value from an earlier table of the join
    Outer(String),
    Value(InstructionValue),
    Float,
    Subquery(Query),
    Unsupported,
}

impl CompileContext<'_> {
    /// Compile a WHERE clause into `plan` and its joins
    pub(crate) fn compile_where(&mut self, plan: &mut QueryPlan, scope: &TableScope, selection: ExprId) -> QueryResult<()> {
        let mut conjuncts = Vec::new();
        split_conjuncts(&self.arena, selection, &mut conjuncts);

        // A conjunct belongs to the last table it references
        let mut routed: Vec<Vec<ExprId>> = vec![Vec::new(); plan.joins.len() + 1];
        for id in conjuncts {
            let mut target = 0;
            for col in self.arena.referenced_columns(id) {
                target = target.max(scope.resolve(&col)?);
            }
            routed[target].push(id);
        }

        let main = std::mem::take(&mut routed[0]);
        let whole = routed.iter().all(Vec::is_empty).then_some(selection);
        self.compile_main(plan, scope, main, whole)?;

        for (index, ids) in routed.into_iter().enumerate().skip(1) {
            for id in ids {
                self.compile_join_conjunct(plan, scope, index, id)?;
            }
        }
        Ok(())
    }

    fn compile_main(
        &mut self,
        plan: &mut QueryPlan,
        scope: &TableScope,
        conjuncts: Vec<ExprId>,
        whole: Option<ExprId>,
    ) -> QueryResult<()> {
        let expr = match whole {
            Some(expr) => expr,
            None => match conjuncts.iter().copied().reduce(|a, b| self.arena.and(a, b)) {
                Some(expr) => expr,
                None => return Ok(()),
            },
        };
        let text = self.arena.render(expr);
        let has_subquery = conjuncts.iter().any(|id| self.has_subquery(*id));

        if plan.source.is_none() {
            let mut slots = Vec::new();
            let mut natives = Vec::with_capacity(conjuncts.len());
            for id in &conjuncts {
                natives.push(self.compile_conjunct(&mut slots, scope, 0, *id, true)?);
            }
            if natives.iter().all(Option::is_some) {
                plan.subqueries = slots;
                for native in natives.into_iter().flatten() {
                    match native {
                        Native::Filter(condition) => plan.add_condition(condition),
                        Native::Key(key) => plan.add_key_condition(key),
                    }
                }
                if !has_subquery {
                    plan.where_clause = Some(FallbackExpression { text, expr });
                }
                return Ok(());
            }
        }

        if has_subquery {
            return Err(QueryError::UnsupportedConstruct(format!(
                "sub-queries cannot be evaluated row by row: {}",
                text
            )));
        }
        debug!("WHERE {} is evaluated row by row", text);
        plan.fallback = Some(FallbackExpression { text, expr });
        Ok(())
    }

    fn compile_join_conjunct(&mut self, plan: &mut QueryPlan, scope: &TableScope, index: usize, id: ExprId) -> QueryResult<()> {
        let qualifier = plan.joins[index - 1].qualifier.clone();
        let unsupported = |text: String| {
            QueryError::UnsupportedConstruct(format!(
                "condition on joined table {} must compile to a store predicate: {}",
                qualifier, text
            ))
        };
        if self.has_subquery(id) {
            return Err(unsupported(self.arena.render(id)));
        }
        let mut slots = Vec::new();
        let native = self.compile_conjunct(&mut slots, scope, index, id, true)?;
        let join = &mut plan.joins[index - 1].plan;
        match native {
            Some(Native::Filter(condition)) => join.add_condition(condition),
            Some(Native::Key(key)) => join.add_key_condition(key),
            None => return Err(unsupported(self.arena.render(id))),
        }
        Ok(())
    }

    /// Compile one conjunct against table `target`. `None` means the store
    /// cannot evaluate it.
    fn compile_conjunct(
        &mut self,
        slots: &mut Vec<SubquerySlot>,
        scope: &TableScope,
        target: usize,
        id: ExprId,
        top_level: bool,
    ) -> QueryResult<Option<Native>> {
        let id = self.arena.unwrap_parens(id);
        let node = self.arena.get(id).clone();
        match node {
            Expr::BinaryOp {
                left,
                op: op @ (BinaryOperator::And | BinaryOperator::Or),
                right,
            } => {
                let left = self.compile_conjunct(slots, scope, target, left, false)?;
                let right = self.compile_conjunct(slots, scope, target, right, false)?;
                let (Some(Native::Filter(left)), Some(Native::Filter(right))) = (left, right) else {
                    return Ok(None);
                };
                Ok(Some(Native::Filter(match op {
                    BinaryOperator::And => Condition::And(vec![left, right]),
                    _ => Condition::Or(vec![left, right]),
                })))
            }
            Expr::BinaryOp { left, op, right } => {
                let Some(op) = compare_op(op) else {
                    return Ok(None);
                };
                let left = self.operand(scope, target, left)?;
                let right = self.operand(scope, target, right)?;
                self.comparison(slots, left, op, right, top_level)
            }
            Expr::Between {
                expr,
                low,
                high,
                negated: false,
            } => {
                let subject = self.operand(scope, target, expr)?;
                let low = self.between_bound(scope, target, low)?;
                let high = self.between_bound(scope, target, high)?;
                let (Some(low), Some(high)) = (low, high) else {
                    return Ok(None);
                };
                Ok(match subject {
                    Operand::Bin(bin) => Some(Native::Filter(Condition::And(vec![
                        Condition::Compare {
                            bin: bin.clone(),
                            kind: BinKind::Integer,
                            op: CompareOp::GtEq,
                            value: low,
                        },
                        Condition::Compare {
                            bin,
                            kind: BinKind::Integer,
                            op: CompareOp::LtEq,
                            value: high,
                        },
                    ]))),
                    Operand::Key if top_level => match (key_value(low), key_value(high)) {
                        (Some(low), Some(high)) => Some(Native::Key(KeyCondition::Range { low, high })),
                        _ => None,
                    },
                    _ => None,
                })
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } => {
                let subject = self.operand(scope, target, expr)?;
                let mut values = Vec::with_capacity(list.len());
                for item in list {
                    match self.operand(scope, target, item)? {
                        Operand::Value(value) => values.push(value),
                        _ => return Ok(None),
                    }
                }
                Ok(match subject {
                    Operand::Bin(bin) => Some(Native::Filter(Condition::Or(
                        values
                            .into_iter()
                            .map(|value| Condition::compare(&bin, CompareOp::Eq, value))
                            .collect(),
                    ))),
                    Operand::Key if top_level => {
                        let mut keys = Vec::with_capacity(values.len());
                        for value in values {
                            if value == InstructionValue::Null {
                                continue;
                            }
                            match key_value(value) {
                                Some(key) => keys.push(key),
                                None => return Ok(None),
                            }
                        }
                        Some(Native::Key(KeyCondition::In(keys)))
                    }
                    _ => None,
                })
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated: false,
            } => Ok(match self.operand(scope, target, expr)? {
                Operand::Bin(bin) => {
                    let slot = self.subquery_slot(slots, &subquery, SubqueryContext::Set)?;
                    Some(Native::Filter(Condition::InSubquery {
                        bin,
                        kind: BinKind::Unresolved,
                        slot,
                    }))
                }
                Operand::Key if top_level => {
                    let slot = self.subquery_slot(slots, &subquery, SubqueryContext::Set)?;
                    Some(Native::Key(KeyCondition::InSubquery(slot)))
                }
                _ => None,
            }),
            _ => Ok(None),
        }
    }

    fn comparison(
        &mut self,
        slots: &mut Vec<SubquerySlot>,
        left: Operand,
        op: CompareOp,
        right: Operand,
        top_level: bool,
    ) -> QueryResult<Option<Native>> {
        let filter = |bin: String, op: CompareOp, value: InstructionValue| {
            Some(Native::Filter(Condition::Compare {
                bin,
                kind: value.kind(),
                op,
                value,
            }))
        };
        Ok(match (left, right) {
            (Operand::Bin(bin), Operand::Value(value)) => filter(bin, op, value),
            (Operand::Value(value), Operand::Bin(bin)) => filter(bin, op.mirrored(), value),
            (Operand::Bin(bin), Operand::Outer(key)) => filter(bin, op, InstructionValue::OuterColumn(key)),
            (Operand::Outer(key), Operand::Bin(bin)) => filter(bin, op.mirrored(), InstructionValue::OuterColumn(key)),
            (Operand::Bin(bin), Operand::Subquery(query)) => {
                let slot = self.subquery_slot(slots, &query, SubqueryContext::Scalar(op))?;
                filter(bin, op, InstructionValue::Subquery(slot))
            }
            (Operand::Subquery(query), Operand::Bin(bin)) => {
                let slot = self.subquery_slot(slots, &query, SubqueryContext::Scalar(op))?;
                filter(bin, op.mirrored(), InstructionValue::Subquery(slot))
            }
            (Operand::Key, other) if top_level => self.key_comparison(slots, op, other)?,
            (other, Operand::Key) if top_level => self.key_comparison(slots, op.mirrored(), other)?,
            _ => None,
        })
    }

    /// `PK = value` and `PK != value`; other key comparisons are left to the fallback
    fn key_comparison(&mut self, slots: &mut Vec<SubquerySlot>, op: CompareOp, operand: Operand) -> QueryResult<Option<Native>> {
        if !matches!(op, CompareOp::Eq | CompareOp::NotEq) {
            return Ok(None);
        }
        let value = match operand {
            // Nothing equals NULL
            Operand::Value(InstructionValue::Null) => return Ok(Some(Native::Key(KeyCondition::In(Vec::new())))),
            Operand::Value(value) => match key_value(value) {
                Some(value) => value,
                None => return Ok(None),
            },
            Operand::Subquery(query) => KeyValue::Subquery(self.subquery_slot(slots, &query, SubqueryContext::Scalar(op))?),
            _ => return Ok(None),
        };
        Ok(Some(Native::Key(match op {
            CompareOp::Eq => KeyCondition::Equal(value),
            _ => KeyCondition::NotEqual(value),
        })))
    }

    fn operand(&self, scope: &TableScope, target: usize, id: ExprId) -> QueryResult<Operand> {
        let id = self.arena.unwrap_parens(id);
        Ok(match self.arena.get(id) {
            Expr::Column(col) => {
                let table = scope.resolve(col)?;
                if table != target {
                    Operand::Outer(scope.row_key(table, &col.name))
                } else if col.is_primary_key() {
                    Operand::Key
                } else if col.is_digest() {
                    Operand::Unsupported
                } else {
                    Operand::Bin(col.name.clone())
                }
            }
            Expr::Literal(literal) => literal_operand(literal),
            Expr::Placeholder(index) => Operand::Value(InstructionValue::Placeholder(*index)),
            Expr::Unary {
                op: UnaryOperator::Minus,
                expr,
            } => match self.arena.get(self.arena.unwrap_parens(*expr)) {
                Expr::Literal(Literal::Integer(v)) => {
                    Operand::Value(InstructionValue::Integer(v.checked_neg().ok_or(QueryError::NumericOverflow)?))
                }
                Expr::Literal(Literal::Float(_)) => Operand::Float,
                _ => Operand::Unsupported,
            },
            Expr::Subquery(query) => Operand::Subquery((**query).clone()),
            Expr::Function { name, .. } if !is_aggregate(name) && self.is_constant(id) => self.fold(id)?,
            _ => Operand::Unsupported,
        })
    }

    fn is_constant(&self, id: ExprId) -> bool {
        self.arena.referenced_columns(id).is_empty()
            && self.arena.max_placeholder(id) == 0
            && !self.has_subquery(id)
            && !self.has_aggregate(id)
    }

    /// Evaluate a constant function call once at compile time
    fn fold(&self, id: ExprId) -> QueryResult<Operand> {
        let value = self.evaluator.evaluate(&self.arena, id, &Row::new(), &[])?;
        debug!("Folded {} to {}", self.arena.render(id), value);
        Ok(match value {
            DataValue::Integer(i) => Operand::Value(InstructionValue::Integer(i)),
            DataValue::Boolean(b) => Operand::Value(InstructionValue::Integer(i64::from(b))),
            DataValue::Text(s) => Operand::Value(InstructionValue::String(s)),
            DataValue::Null => Operand::Value(InstructionValue::Null),
            DataValue::Float(_) => Operand::Float,
            _ => Operand::Unsupported,
        })
    }

    /// BETWEEN bounds must be integers, or parameters checked at bind time
    fn between_bound(&self, scope: &TableScope, target: usize, id: ExprId) -> QueryResult<Option<InstructionValue>> {
        match self.operand(scope, target, id)? {
            Operand::Value(value @ (InstructionValue::Integer(_) | InstructionValue::Placeholder(_))) => Ok(Some(value)),
            Operand::Value(_) | Operand::Float => Err(QueryError::TypeMismatch(format!(
                "BETWEEN can be applied to integer values only, got {}",
                self.arena.render(id)
            ))),
            _ => Ok(None),
        }
    }

    fn subquery_slot(&mut self, slots: &mut Vec<SubquerySlot>, query: &Query, context: SubqueryContext) -> QueryResult<usize> {
        let node = self.compile_query(query)?;
        slots.push(SubquerySlot { node, context });
        Ok(slots.len() - 1)
    }
}

fn split_conjuncts(arena: &ExprArena, id: ExprId, out: &mut Vec<ExprId>) {
    let id = arena.unwrap_parens(id);
    match arena.get(id) {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_conjuncts(arena, *left, out);
            split_conjuncts(arena, *right, out);
        }
        _ => out.push(id),
    }
}

fn compare_op(op: BinaryOperator) -> Option<CompareOp> {
    match op {
        BinaryOperator::Eq => Some(CompareOp::Eq),
        BinaryOperator::NotEq => Some(CompareOp::NotEq),
        BinaryOperator::Lt => Some(CompareOp::Lt),
        BinaryOperator::LtEq => Some(CompareOp::LtEq),
        BinaryOperator::Gt => Some(CompareOp::Gt),
        BinaryOperator::GtEq => Some(CompareOp::GtEq),
        _ => None,
    }
}

fn literal_operand(literal: &Literal) -> Operand {
    match literal {
        Literal::Integer(i) => Operand::Value(InstructionValue::Integer(*i)),
        Literal::String(s) => Operand::Value(InstructionValue::String(s.clone())),
        Literal::Boolean(b) => Operand::Value(InstructionValue::Integer(i64::from(*b))),
        Literal::Null => Operand::Value(InstructionValue::Null),
        Literal::Float(_) => Operand::Float,
    }
}

fn key_value(value: InstructionValue) -> Option<KeyValue> {
    match value {
        InstructionValue::Integer(i) => Some(KeyValue::Key(UserKey::Integer(i))),
        InstructionValue::String(s) => Some(KeyValue::Key(UserKey::Text(s))),
        InstructionValue::Placeholder(index) => Some(KeyValue::Placeholder(index)),
        _ => None,
    }
}
