// Hash-based Aggregation
//
// Group reducer keyed by a hash table of group values, and the client-side
// operator that runs it over an input stream.

use std::cmp::Ordering;
use std::collections::VecDeque;

use linked_hash_map::LinkedHashMap;
use log::debug;

use super::{
    AggregateSpec, AggregateType, DISTINCT_MODULE, GROUP_ARG_PREFIX, GROUPBY_MODULE, STATS_MODULE,
};
use crate::common::types::Bins;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::storage::AggregateCall;

/// Aggregate value calculation helper struct
#[derive(Debug, Clone)]
pub struct AggregateValue {
    /// Type of aggregation
    agg_type: AggregateType,
    /// Count of non-null inputs
    count: i64,
    /// Sum value for SUM/AVG
    sum: Option<DataValue>,
    /// Min value for MIN
    min: Option<DataValue>,
    /// Max value for MAX
    max: Option<DataValue>,
}

impl AggregateValue {
    pub fn new(agg_type: AggregateType) -> Self {
        AggregateValue {
            agg_type,
            count: 0,
            sum: None,
            min: None,
            max: None,
        }
    }

    /// Update the aggregate with a new value. NULL and missing values are skipped.
    pub fn update(&mut self, value: Option<&DataValue>) {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return;
        };
        self.count += 1;

        match self.agg_type {
            AggregateType::Count => {}
            AggregateType::Sum | AggregateType::Avg => self.update_sum(value),
            AggregateType::Min => {
                if self
                    .min
                    .as_ref()
                    .is_none_or(|current| current.partial_cmp(value) == Some(Ordering::Greater))
                {
                    self.min = Some(value.clone());
                }
            }
            AggregateType::Max => {
                if self
                    .max
                    .as_ref()
                    .is_none_or(|current| current.partial_cmp(value) == Some(Ordering::Less))
                {
                    self.max = Some(value.clone());
                }
            }
        }
    }

    fn update_sum(&mut self, value: &DataValue) {
        match (value, &mut self.sum) {
            (DataValue::Integer(i), None) => self.sum = Some(DataValue::Integer(*i)),
            (DataValue::Integer(i), Some(DataValue::Integer(sum))) => *sum = sum.saturating_add(*i),
            (DataValue::Integer(i), Some(DataValue::Float(sum))) => *sum += *i as f64,
            (DataValue::Float(f), None) => self.sum = Some(DataValue::Float(*f)),
            (DataValue::Float(f), Some(DataValue::Integer(sum))) => {
                self.sum = Some(DataValue::Float(*sum as f64 + *f));
            }
            (DataValue::Float(f), Some(DataValue::Float(sum))) => *sum += *f,
            _ => {}
        }
    }

    /// Get the final aggregate value
    pub fn result(&self) -> DataValue {
        match self.agg_type {
            AggregateType::Count => DataValue::Integer(self.count),
            AggregateType::Sum => self.sum.clone().unwrap_or(DataValue::Null),
            AggregateType::Avg => match (&self.sum, self.count) {
                (_, 0) => DataValue::Null,
                (Some(DataValue::Integer(sum)), n) => DataValue::Float(*sum as f64 / n as f64),
                (Some(DataValue::Float(sum)), n) => DataValue::Float(*sum / n as f64),
                _ => DataValue::Null,
            },
            AggregateType::Min => self.min.clone().unwrap_or(DataValue::Null),
            AggregateType::Max => self.max.clone().unwrap_or(DataValue::Null),
        }
    }
}

/// Reducer behind the `stats`, `groupby` and `distinct` modules
#[derive(Debug)]
pub struct GroupReducer {
    group_columns: Vec<String>,
    aggregates: Vec<AggregateSpec>,
    /// Emit one row even without input
    global: bool,
    groups: LinkedHashMap<Vec<DataValue>, Vec<AggregateValue>>,
}

impl GroupReducer {
    pub fn new(group_columns: Vec<String>, aggregates: Vec<AggregateSpec>) -> Self {
        let global = group_columns.is_empty();
        GroupReducer {
            group_columns,
            aggregates,
            global,
            groups: LinkedHashMap::new(),
        }
    }

    /// Build the reducer named by an aggregation call
    pub fn from_call(call: &AggregateCall) -> QueryResult<Self> {
        match call.module.as_str() {
            STATS_MODULE => {
                let aggregates = call
                    .args
                    .iter()
                    .map(|arg| AggregateSpec::parse(arg))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(GroupReducer::new(Vec::new(), aggregates))
            }
            GROUPBY_MODULE => {
                let mut groups = Vec::new();
                let mut aggregates = Vec::new();
                for arg in &call.args {
                    match arg.strip_prefix(GROUP_ARG_PREFIX) {
                        Some(column) => groups.push(column.to_string()),
                        None => aggregates.push(AggregateSpec::parse(arg)?),
                    }
                }
                if groups.is_empty() {
                    return Err(QueryError::InvalidOperation(
                        "groupby reducer requires at least one grouping column".to_string(),
                    ));
                }
                Ok(GroupReducer::new(groups, aggregates))
            }
            DISTINCT_MODULE => match call.args.as_slice() {
                [column] => Ok(GroupReducer::new(vec![column.clone()], Vec::new())),
                _ => Err(QueryError::UnsupportedConstruct(
                    "DISTINCT is supported for a single column only".to_string(),
                )),
            },
            other => Err(QueryError::StorageError(format!("Unknown aggregation module '{}'", other))),
        }
    }

    /// Feed one input; `lookup` resolves a column to its value
    pub fn feed<'a>(&mut self, lookup: impl Fn(&str) -> Option<&'a DataValue>) {
        let key: Vec<DataValue> = self
            .group_columns
            .iter()
            .map(|col| lookup(col).cloned().unwrap_or(DataValue::Null))
            .collect();

        if !self.groups.contains_key(&key) {
            let values = self.aggregates.iter().map(|spec| AggregateValue::new(spec.agg_type)).collect();
            self.groups.insert(key.clone(), values);
        }
        if let Some(values) = self.groups.get_mut(&key) {
            for (spec, value) in self.aggregates.iter().zip(values.iter_mut()) {
                match &spec.column {
                    None => value.update(Some(&DataValue::Integer(1))),
                    Some(col) => value.update(lookup(col)),
                }
            }
        }
    }

    /// Reducer output: one entry per group, keyed by group column and aggregate spec
    pub fn finish(mut self) -> Vec<Bins> {
        if self.global && self.groups.is_empty() {
            let values = self.aggregates.iter().map(|spec| AggregateValue::new(spec.agg_type)).collect();
            self.groups.insert(Vec::new(), values);
        }

        let mut out = Vec::with_capacity(self.groups.len());
        for (key, values) in self.groups {
            let mut bins = Bins::new();
            for (col, value) in self.group_columns.iter().zip(key) {
                bins.insert(col.clone(), value);
            }
            for (spec, value) in self.aggregates.iter().zip(values) {
                bins.insert(spec.to_string(), value.result());
            }
            out.push(bins);
        }
        out
    }
}

/// Maps reducer output entries to row labels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputMapping {
    entries: Vec<(String, String)>,
}

impl OutputMapping {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        OutputMapping { entries }
    }

    pub fn to_row(&self, bins: &Bins) -> Row {
        let mut row = Row::new();
        for (key, label) in &self.entries {
            let value = bins.get(key).cloned().unwrap_or(DataValue::Null);
            row.set(label.clone(), value);
        }
        row
    }
}

/// Client-side aggregation over an input stream
pub struct HashAggregateOperator {
    input: Box<dyn Operator>,
    call: AggregateCall,
    mapping: OutputMapping,
    results: VecDeque<Row>,
    initialized: bool,
}

impl HashAggregateOperator {
    pub fn new(input: Box<dyn Operator>, call: AggregateCall, mapping: OutputMapping) -> Self {
        HashAggregateOperator {
            input,
            call,
            mapping,
            results: VecDeque::new(),
            initialized: false,
        }
    }
}

impl Operator for HashAggregateOperator {
    fn init(&mut self) -> QueryResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.input.init()?;

        let mut reducer = GroupReducer::from_call(&self.call)?;
        let mut consumed = 0usize;
        while let Some(row) = self.input.next()? {
            reducer.feed(|col| row.get(col));
            consumed += 1;
        }
        self.results = reducer.finish().iter().map(|bins| self.mapping.to_row(bins)).collect();
        debug!(
            "Client-side {} reduced {} rows into {} groups",
            self.call,
            consumed,
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
        self.input.close()
    }
}
