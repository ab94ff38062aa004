// Query Plan
//
// The compiled form of a statement: projection, native predicate graph,
// fallback expression, joins, ordering, paging, chained siblings and the
// single access strategy committed for the store.

use std::fmt;

use crate::common::types::UserKey;
use crate::query::ast::ExprId;
use crate::query::executor::operators::agg::{AggregateSpec, OutputMapping};
use crate::query::executor::result::{QueryError, QueryResult};
use crate::storage::filter::{BinKind, CompareOp, InstructionValue, PredicateInstruction};
use crate::storage::{AggregateCall, IndexDefinition, IndexFilter};

/// What a projected column is and how its value is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Bin read from the record
    Data,
    /// The record's user key
    PrimaryKey,
    /// Digest of the record key
    PrimaryKeyDigest,
    /// Computed on the client from other columns
    Expression,
    /// Produced by an aggregation reducer
    Aggregated,
    /// Grouping column of an aggregation
    Group,
    /// Needed by an expression but not returned
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Namespace the column's table lives in
    pub catalog: Option<String>,
    /// Qualifier of a joined table, `None` for the main table
    pub table: Option<String>,
    /// Bin name, or the rendered text of a computed column
    pub name: String,
    /// Output label
    pub label: String,
    /// Key of the value inside pipeline rows
    pub source: String,
    pub role: ColumnRole,
    pub expr: Option<ExprId>,
    pub aggregate: Option<AggregateSpec>,
}

impl Column {
    pub fn is_visible(&self) -> bool {
        self.role != ColumnRole::Hidden
    }
}

/// Comparison tree the store can evaluate natively
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        bin: String,
        kind: BinKind,
        op: CompareOp,
        value: InstructionValue,
    },
    /// `bin IN (sub-query)`, expanded to equalities once the sub-query ran
    InSubquery { bin: String, kind: BinKind, slot: usize },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn compare(bin: &str, op: CompareOp, value: InstructionValue) -> Self {
        Condition::Compare {
            bin: bin.to_string(),
            kind: value.kind(),
            op,
            value,
        }
    }

    /// Flatten into a postfix program
    pub fn to_instructions(&self) -> Vec<PredicateInstruction> {
        let mut out = Vec::new();
        self.emit(&mut out);
        out
    }

    fn emit(&self, out: &mut Vec<PredicateInstruction>) {
        match self {
            Condition::Compare { bin, kind, op, value } => {
                out.push(PredicateInstruction::Bin {
                    name: bin.clone(),
                    kind: *kind,
                });
                out.push(PredicateInstruction::Value(value.clone()));
                out.push(PredicateInstruction::Compare(*op));
            }
            Condition::InSubquery { bin, kind, slot } => {
                out.push(PredicateInstruction::Bin {
                    name: bin.clone(),
                    kind: *kind,
                });
                out.push(PredicateInstruction::Value(InstructionValue::Subquery(*slot)));
                out.push(PredicateInstruction::Compare(CompareOp::Eq));
            }
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.emit(out);
                }
                out.push(match self {
                    Condition::And(_) => PredicateInstruction::And(children.len()),
                    _ => PredicateInstruction::Or(children.len()),
                });
            }
        }
    }

    /// Visit every leaf value, mutably
    pub fn for_each_value(&mut self, visit: &mut dyn FnMut(&mut InstructionValue, &mut BinKind)) {
        match self {
            Condition::Compare { kind, value, .. } => visit(value, kind),
            Condition::InSubquery { .. } => {}
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.for_each_value(visit);
                }
            }
        }
    }
}

/// Key value of a primary-key condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Key(UserKey),
    Placeholder(usize),
    Subquery(usize),
}

impl KeyValue {
    fn to_instruction_value(&self) -> QueryResult<InstructionValue> {
        match self {
            KeyValue::Key(UserKey::Integer(i)) => Ok(InstructionValue::Integer(*i)),
            KeyValue::Key(UserKey::Text(s)) => Ok(InstructionValue::String(s.clone())),
            KeyValue::Key(UserKey::Blob(_)) => Err(QueryError::TypeMismatch(
                "Blob keys can only be used for key lookups".to_string(),
            )),
            KeyValue::Placeholder(i) => Ok(InstructionValue::Placeholder(*i)),
            KeyValue::Subquery(slot) => Ok(InstructionValue::Subquery(*slot)),
        }
    }
}

/// Condition on the record key, routed to strategy selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCondition {
    Equal(KeyValue),
    In(Vec<KeyValue>),
    InSubquery(usize),
    NotEqual(KeyValue),
    Range { low: KeyValue, high: KeyValue },
    /// Every condition must hold
    All(Vec<KeyCondition>),
}

impl KeyCondition {
    /// Keys of a condition that names literal keys only
    fn literal_keys(&self) -> Option<&[KeyValue]> {
        let keys = match self {
            KeyCondition::Equal(value) => std::slice::from_ref(value),
            KeyCondition::In(values) => values.as_slice(),
            _ => return None,
        };
        keys.iter().all(|k| matches!(k, KeyValue::Key(_))).then_some(keys)
    }

    /// Conjunction of two key conditions. Literal key sets are intersected,
    /// anything else is kept for a key predicate.
    pub fn and(self, other: KeyCondition) -> KeyCondition {
        let empty = |c: &KeyCondition| matches!(c, KeyCondition::In(values) if values.is_empty());
        if empty(&self) {
            return self;
        }
        if empty(&other) {
            return other;
        }
        if let (Some(left), Some(right)) = (self.literal_keys(), other.literal_keys()) {
            let mut keys: Vec<KeyValue> = Vec::new();
            for key in left {
                if right.contains(key) && !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
            return match keys.len() {
                1 => KeyCondition::Equal(keys.remove(0)),
                _ => KeyCondition::In(keys),
            };
        }
        let mut all = match self {
            KeyCondition::All(children) => children,
            single => vec![single],
        };
        match other {
            KeyCondition::All(children) => all.extend(children),
            single => all.push(single),
        }
        KeyCondition::All(all)
    }

    /// Key predicate evaluated during a scan
    pub fn to_instructions(&self) -> QueryResult<Vec<PredicateInstruction>> {
        let compare = |value: &KeyValue, op: CompareOp| -> QueryResult<Vec<PredicateInstruction>> {
            let value = value.to_instruction_value()?;
            Ok(vec![
                PredicateInstruction::Key { kind: value.kind() },
                PredicateInstruction::Value(value),
                PredicateInstruction::Compare(op),
            ])
        };
        match self {
            KeyCondition::Equal(value) => compare(value, CompareOp::Eq),
            KeyCondition::NotEqual(value) => compare(value, CompareOp::NotEq),
            KeyCondition::InSubquery(slot) => compare(&KeyValue::Subquery(*slot), CompareOp::Eq),
            KeyCondition::In(values) => {
                let mut out = Vec::new();
                for value in values {
                    out.extend(compare(value, CompareOp::Eq)?);
                }
                out.push(PredicateInstruction::Or(values.len()));
                Ok(out)
            }
            KeyCondition::Range { low, high } => {
                let mut out = compare(low, CompareOp::GtEq)?;
                out.extend(compare(high, CompareOp::LtEq)?);
                out.push(PredicateInstruction::And(2));
                Ok(out)
            }
            KeyCondition::All(children) => {
                let mut out = Vec::new();
                for child in children {
                    out.extend(child.to_instructions()?);
                }
                out.push(PredicateInstruction::And(children.len()));
                Ok(out)
            }
        }
    }
}

/// WHERE (or HAVING) evaluated row by row on the client
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackExpression {
    /// Verbatim SQL text
    pub text: String,
    pub expr: ExprId,
}

/// The one way a plan reads the store
#[derive(Debug, Clone, PartialEq)]
pub enum AccessStrategy {
    PointLookup {
        key: UserKey,
        residual: Vec<PredicateInstruction>,
    },
    BatchLookup {
        keys: Vec<UserKey>,
        residual: Vec<PredicateInstruction>,
    },
    IndexFilteredScan {
        filter: IndexFilter,
        residual: Vec<PredicateInstruction>,
    },
    FullScan {
        residual: Vec<PredicateInstruction>,
        key_predicate: Option<Vec<PredicateInstruction>>,
    },
    Aggregation {
        filter: Option<IndexFilter>,
        residual: Vec<PredicateInstruction>,
        call: AggregateCall,
    },
}

impl AccessStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            AccessStrategy::PointLookup { .. } => "PointLookup",
            AccessStrategy::BatchLookup { .. } => "BatchLookup",
            AccessStrategy::IndexFilteredScan { .. } => "IndexFilteredScan",
            AccessStrategy::FullScan { .. } => "FullScan",
            AccessStrategy::Aggregation { .. } => "Aggregation",
        }
    }
}

impl fmt::Display for AccessStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessStrategy::PointLookup { key, .. } => write!(f, "PointLookup({})", key),
            AccessStrategy::BatchLookup { keys, .. } => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                write!(f, "BatchLookup({})", keys.join(", "))
            }
            AccessStrategy::IndexFilteredScan { filter, .. } => write!(f, "IndexFilteredScan({})", filter),
            AccessStrategy::FullScan { key_predicate, .. } => match key_predicate {
                Some(_) => write!(f, "FullScan(with key predicate)"),
                None => write!(f, "FullScan"),
            },
            AccessStrategy::Aggregation { call, .. } => write!(f, "Aggregation({})", call),
        }
    }
}

/// Holder for the committed access strategy; refuses a second assignment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategySlot(Option<AccessStrategy>);

impl StrategySlot {
    pub fn assign(&mut self, strategy: AccessStrategy) -> QueryResult<()> {
        if let Some(existing) = &self.0 {
            return Err(QueryError::DuplicatePlanStrategy(format!(
                "{} already committed, cannot add {}",
                existing.name(),
                strategy.name()
            )));
        }
        self.0 = Some(strategy);
        Ok(())
    }

    pub fn get(&self) -> Option<&AccessStrategy> {
        self.0.as_ref()
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    /// Outer rows without a match are kept with null inner columns
    LeftSkipIfMissing,
}

/// Right side of a join, run once per outer row
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub join_type: JoinType,
    /// Prefix of the joined table's values in pipeline rows
    pub qualifier: String,
    pub plan: QueryPlan,
    /// Row key of the outer value
    pub outer_key: String,
    /// Bin of the joined table equal to the outer value
    pub inner_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderKey {
    /// Row key
    Column(String),
    Expr(ExprId),
    /// 1-based position among the visible columns
    Position(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub key: OrderKey,
    pub desc: bool,
}

/// OFFSET or LIMIT, possibly still a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowBound {
    Value(u64),
    Placeholder(usize),
}

/// Reducer call together with the way its output maps to columns
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    pub call: AggregateCall,
    pub mapping: OutputMapping,
}

/// Where a sub-query result is used
#[derive(Debug, Clone, PartialEq)]
pub enum SubqueryContext {
    /// Right side of a comparison; at most one row allowed
    Scalar(CompareOp),
    /// Right side of IN
    Set,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubquerySlot {
    pub node: QueryNode,
    pub context: SubqueryContext,
}

/// Compiled query for one table (or one sub-query source)
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub namespace: String,
    /// Set to read, `None` when the data comes from `source`
    pub set: Option<String>,
    pub alias: Option<String>,
    pub columns: Vec<Column>,
    /// `SELECT *`: columns are discovered from the records
    pub wildcard: bool,
    pub condition: Option<Condition>,
    pub key_condition: Option<KeyCondition>,
    pub fallback: Option<FallbackExpression>,
    /// Main-table WHERE, kept to fall back when a bound value cannot be compiled
    pub where_clause: Option<FallbackExpression>,
    pub having: Option<FallbackExpression>,
    pub aggregation: Option<AggregationPlan>,
    pub distinct: bool,
    pub joins: Vec<JoinSpec>,
    pub order_by: Vec<OrderSpec>,
    pub offset: Option<RowBound>,
    pub limit: Option<RowBound>,
    pub source: Option<Box<QueryNode>>,
    pub subqueries: Vec<SubquerySlot>,
    pub indexes: Vec<IndexDefinition>,
    pub needs_digest: bool,
    pub strategy: StrategySlot,
}

impl QueryPlan {
    pub fn new(namespace: &str, set: Option<String>, alias: Option<String>) -> Self {
        QueryPlan {
            namespace: namespace.to_string(),
            set,
            alias,
            columns: Vec::new(),
            wildcard: false,
            condition: None,
            key_condition: None,
            fallback: None,
            where_clause: None,
            having: None,
            aggregation: None,
            distinct: false,
            joins: Vec::new(),
            order_by: Vec::new(),
            offset: None,
            limit: None,
            source: None,
            subqueries: Vec::new(),
            indexes: Vec::new(),
            needs_digest: false,
            strategy: StrategySlot::default(),
        }
    }

    /// Name the main table is referred to by
    pub fn qualifier(&self) -> Option<&str> {
        self.alias.as_deref().or(self.set.as_deref())
    }

    pub fn strategy(&self) -> Option<&AccessStrategy> {
        self.strategy.get()
    }

    /// AND a primary-key condition into the plan's key condition
    pub fn add_key_condition(&mut self, condition: KeyCondition) {
        self.key_condition = Some(match self.key_condition.take() {
            None => condition,
            Some(existing) => existing.and(condition),
        });
    }

    /// AND a native condition into the plan's predicate graph
    pub fn add_condition(&mut self, condition: Condition) {
        self.condition = Some(match self.condition.take() {
            None => condition,
            Some(existing) => Condition::And(vec![existing, condition]),
        });
    }

    /// Labels of the returned columns, in order
    pub fn labels(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_visible())
            .map(|c| c.label.as_str())
            .collect()
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_visible())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    UnionAll,
    /// Concatenate, then drop rows already seen
    Union,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub node: QueryNode,
    pub mode: ChainMode,
}

/// Sibling plans merged by a set operation
#[derive(Debug, Clone, PartialEq)]
pub struct ChainPlan {
    pub head: QueryNode,
    pub links: Vec<ChainLink>,
    pub order_by: Vec<OrderSpec>,
    pub offset: Option<RowBound>,
    pub limit: Option<RowBound>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Plan(Box<QueryPlan>),
    Chain(Box<ChainPlan>),
}

impl QueryNode {
    /// Main plan, or the head plan of a chain
    pub fn first_plan(&self) -> &QueryPlan {
        match self {
            QueryNode::Plan(plan) => plan,
            QueryNode::Chain(chain) => chain.head.first_plan(),
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.first_plan().labels()
    }
}

/// Compiled INSERT
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub namespace: String,
    pub set: String,
    pub columns: Vec<String>,
    /// Position of the primary-key column in `columns`
    pub key_index: usize,
    pub rows: Vec<Vec<ExprId>>,
    /// Skip rows whose key already exists instead of failing
    pub ignore: bool,
}

/// Compiled UPDATE; `selection` picks the records to change
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub selection: QueryPlan,
    pub assignments: Vec<(String, ExprId)>,
    pub limit: Option<RowBound>,
}

/// Compiled DELETE; `selection` picks the records to remove
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    pub selection: QueryPlan,
    pub limit: Option<RowBound>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledStatement {
    Query(QueryNode),
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
    Truncate { namespace: String, set: String },
    CreateIndex(IndexDefinition),
    DropIndex { namespace: String, name: String },
}

impl CompiledStatement {
    /// Plan reading the store: the query's main plan or the DML selection
    pub fn query_plan(&self) -> Option<&QueryPlan> {
        match self {
            CompiledStatement::Query(QueryNode::Plan(plan)) => Some(plan),
            CompiledStatement::Update(update) => Some(&update.selection),
            CompiledStatement::Delete(delete) => Some(&delete.selection),
            _ => None,
        }
    }
}
