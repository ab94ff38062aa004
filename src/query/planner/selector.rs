// Plan Selector
//
// Commits exactly one access strategy per plan. Key strategies win over
// index scans, index scans over full scans; aggregations always use the
// store's reducer hook.

use log::debug;

use super::plan::{AccessStrategy, Condition, KeyCondition, KeyValue, QueryPlan};
use crate::common::types::UserKey;
use crate::query::ast::IndexType;
use crate::query::executor::result::{DataValue, QueryResult};
use crate::storage::filter::{CompareOp, InstructionValue, PredicateInstruction, conjunction};
use crate::storage::{IndexDefinition, IndexFilter};

/// (Re)select the strategy of a plan from its current conditions.
/// Plans reading a sub-query source have no store access and get none.
pub fn select_strategy(plan: &mut QueryPlan) -> QueryResult<()> {
    plan.strategy.clear();
    if plan.source.is_some() {
        return Ok(());
    }

    let mut residual_condition = plan.condition.clone();

    if let Some(aggregation) = &plan.aggregation {
        let filter = extract_index_filter(&mut residual_condition, &plan.indexes);
        let mut programs = vec![residual(&residual_condition)];
        if let Some(key) = &plan.key_condition {
            programs.push(key.to_instructions()?);
        }
        let strategy = AccessStrategy::Aggregation {
            filter,
            residual: conjunction(programs),
            call: aggregation.call.clone(),
        };
        return commit(plan, strategy);
    }

    let strategy = match &plan.key_condition {
        Some(KeyCondition::Equal(KeyValue::Key(key))) => AccessStrategy::PointLookup {
            key: key.clone(),
            residual: residual(&residual_condition),
        },
        Some(KeyCondition::In(values)) if values.iter().all(|v| matches!(v, KeyValue::Key(_))) => {
            let mut keys: Vec<UserKey> = Vec::with_capacity(values.len());
            for value in values {
                if let KeyValue::Key(key) = value {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
            AccessStrategy::BatchLookup {
                keys,
                residual: residual(&residual_condition),
            }
        }
        Some(other) => AccessStrategy::FullScan {
            residual: residual(&residual_condition),
            key_predicate: Some(other.to_instructions()?),
        },
        None => match extract_index_filter(&mut residual_condition, &plan.indexes) {
            Some(filter) => AccessStrategy::IndexFilteredScan {
                filter,
                residual: residual(&residual_condition),
            },
            None => AccessStrategy::FullScan {
                residual: residual(&residual_condition),
                key_predicate: None,
            },
        },
    };
    commit(plan, strategy)
}

fn commit(plan: &mut QueryPlan, strategy: AccessStrategy) -> QueryResult<()> {
    debug!(
        "Selected {} for {}.{}",
        strategy,
        plan.namespace,
        plan.set.as_deref().unwrap_or("<source>")
    );
    plan.strategy.assign(strategy)
}

fn residual(condition: &Option<Condition>) -> Vec<PredicateInstruction> {
    condition.as_ref().map(Condition::to_instructions).unwrap_or_default()
}

/// Pull the first conjunct an index can serve out of `condition`
fn extract_index_filter(condition: &mut Option<Condition>, indexes: &[IndexDefinition]) -> Option<IndexFilter> {
    if indexes.is_empty() {
        return None;
    }
    let current = condition.as_mut()?;

    if let Some(filter) = index_filter_for(current, indexes) {
        *condition = None;
        return Some(filter);
    }

    let Condition::And(children) = current else {
        return None;
    };
    let position = children
        .iter()
        .position(|child| index_filter_for(child, indexes).is_some())?;
    let filter = index_filter_for(&children[position], indexes);
    children.remove(position);
    if children.len() == 1 {
        *condition = children.pop();
    }
    filter
}

fn index_filter_for(condition: &Condition, indexes: &[IndexDefinition]) -> Option<IndexFilter> {
    match condition {
        Condition::Compare {
            bin,
            op: CompareOp::Eq,
            value,
            ..
        } => {
            let value = match value {
                InstructionValue::Integer(i) => DataValue::Integer(*i),
                InstructionValue::String(s) => DataValue::Text(s.clone()),
                _ => return None,
            };
            indexes
                .iter()
                .any(|index| &index.bin == bin && index.supports(&value))
                .then(|| IndexFilter::Equal {
                    bin: bin.clone(),
                    value,
                })
        }
        // BETWEEN compiles to exactly this pair
        Condition::And(children) => match children.as_slice() {
            [
                Condition::Compare {
                    bin: low_bin,
                    op: CompareOp::GtEq,
                    value: InstructionValue::Integer(low),
                    ..
                },
                Condition::Compare {
                    bin: high_bin,
                    op: CompareOp::LtEq,
                    value: InstructionValue::Integer(high),
                    ..
                },
            ] if low_bin == high_bin => indexes
                .iter()
                .any(|index| &index.bin == low_bin && index.index_type == IndexType::Numeric)
                .then(|| IndexFilter::Range {
                    bin: low_bin.clone(),
                    low: *low,
                    high: *high,
                }),
            _ => None,
        },
        _ => None,
    }
}
