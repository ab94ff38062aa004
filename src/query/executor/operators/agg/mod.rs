// Aggregation Module
//
// Reducers shared by the store-side aggregation modules and client-side
// aggregation over sub-query sources, plus the operators that turn reducer
// output into rows.

mod hash;

pub use hash::{AggregateValue, GroupReducer, HashAggregateOperator, OutputMapping};

use std::fmt;

use crate::query::executor::result::{QueryError, QueryResult};

/// Reducer module computing aggregates over the whole set
pub const STATS_MODULE: &str = "stats";
pub const STATS_FUNCTION: &str = "single_bin_stats";
/// Reducer module computing aggregates per group
pub const GROUPBY_MODULE: &str = "groupby";
pub const GROUPBY_FUNCTION: &str = "groupby";
/// Reducer module listing distinct values of one bin
pub const DISTINCT_MODULE: &str = "distinct";
pub const DISTINCT_FUNCTION: &str = "distinct";

/// Prefix of a grouping argument in a `groupby` call
pub const GROUP_ARG_PREFIX: &str = "groupby:";

// Types of supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateType::Count),
            "sum" => Some(AggregateType::Sum),
            "avg" => Some(AggregateType::Avg),
            "min" => Some(AggregateType::Min),
            "max" => Some(AggregateType::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateType::Count => "count",
            AggregateType::Sum => "sum",
            AggregateType::Avg => "avg",
            AggregateType::Min => "min",
            AggregateType::Max => "max",
        }
    }
}

/// One aggregate of a reducer call, written `fn:column` or `count:*`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateSpec {
    pub agg_type: AggregateType,
    /// `None` stands for `*`
    pub column: Option<String>,
}

impl AggregateSpec {
    pub fn new(agg_type: AggregateType, column: Option<String>) -> Self {
        AggregateSpec { agg_type, column }
    }

    pub fn parse(arg: &str) -> QueryResult<Self> {
        let (name, column) = arg
            .split_once(':')
            .ok_or_else(|| QueryError::InvalidOperation(format!("Malformed aggregate argument '{}'", arg)))?;
        let agg_type = AggregateType::from_name(name)
            .ok_or_else(|| QueryError::UnknownFunction(name.to_string()))?;
        let column = match column {
            "*" => None,
            col => Some(col.to_string()),
        };
        if column.is_none() && agg_type != AggregateType::Count {
            return Err(QueryError::UnsupportedConstruct(format!("{}(*)", agg_type.name())));
        }
        Ok(AggregateSpec { agg_type, column })
    }
}

impl fmt::Display for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.agg_type.name(), self.column.as_deref().unwrap_or("*"))
    }
}
