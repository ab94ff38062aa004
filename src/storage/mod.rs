// Storage Module
//
// The key/value store seen by the query engine. The engine only relies on
// the primitive access paths declared by `KeyValueStore`.

pub mod filter;
pub mod memory;

use std::fmt;

use crate::common::types::{Bins, Record, RecordKey};
use crate::query::ast::IndexType;
use crate::query::executor::result::{DataValue, QueryResult};
use self::filter::PredicateInstruction;

/// Secondary-index filter restricting a scan
#[derive(Debug, Clone, PartialEq)]
pub enum IndexFilter {
    Equal { bin: String, value: DataValue },
    Range { bin: String, low: i64, high: i64 },
}

impl IndexFilter {
    pub fn bin(&self) -> &str {
        match self {
            IndexFilter::Equal { bin, .. } | IndexFilter::Range { bin, .. } => bin,
        }
    }

    pub fn accepts(&self, record: &Record) -> bool {
        match self {
            IndexFilter::Equal { bin, value } => record.bin(bin) == Some(value),
            IndexFilter::Range { bin, low, high } => match record.bin(bin) {
                Some(DataValue::Integer(v)) => v >= low && v <= high,
                _ => false,
            },
        }
    }
}

impl fmt::Display for IndexFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexFilter::Equal { bin, value } => write!(f, "{} = {}", bin, value),
            IndexFilter::Range { bin, low, high } => write!(f, "{} BETWEEN {} AND {}", bin, low, high),
        }
    }
}

/// Secondary index registered in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub namespace: String,
    pub set: String,
    pub bin: String,
    pub name: String,
    pub index_type: IndexType,
}

impl IndexDefinition {
    /// Whether the index can serve an equality on `value`
    pub fn supports(&self, value: &DataValue) -> bool {
        matches!(
            (self.index_type, value),
            (IndexType::Numeric, DataValue::Integer(_)) | (IndexType::String, DataValue::Text(_))
        )
    }
}

/// Snapshot of the indexes known when a statement is compiled
#[derive(Debug, Clone, Default)]
pub struct IndexCatalog {
    indexes: Vec<IndexDefinition>,
}

impl IndexCatalog {
    pub fn new(indexes: Vec<IndexDefinition>) -> Self {
        IndexCatalog { indexes }
    }

    /// Read the current index list of a namespace from the store
    pub fn from_store(store: &dyn KeyValueStore, namespace: &str) -> QueryResult<Self> {
        Ok(IndexCatalog {
            indexes: store.indexes(namespace)?,
        })
    }

    /// Indexes defined on one set
    pub fn for_set(&self, namespace: &str, set: &str) -> Vec<IndexDefinition> {
        self.indexes
            .iter()
            .filter(|index| index.namespace == namespace && index.set == set)
            .cloned()
            .collect()
    }
}

/// Scan parameters
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    pub namespace: &'a str,
    pub set: &'a str,
    pub filter: Option<&'a IndexFilter>,
    pub instructions: &'a [PredicateInstruction],
}

/// Server-side aggregation call: a reducer module, its entry point and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateCall {
    pub module: String,
    pub function: String,
    pub args: Vec<String>,
}

impl fmt::Display for AggregateCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.module, self.function, self.args.join(", "))
    }
}

/// Write behaviour for `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail when the record exists
    CreateOnly,
    /// Create or merge bins into the existing record
    Upsert,
}

/// Primitive operations of a schema-less key/value store
pub trait KeyValueStore: Send + Sync {
    /// Point lookup by key
    fn get(&self, key: &RecordKey) -> QueryResult<Option<Record>>;

    /// Batch lookup; the result is positionally aligned with `keys`
    fn get_many(&self, keys: &[RecordKey]) -> QueryResult<Vec<Option<Record>>>;

    /// Scan a set, feeding every matching record to `visitor` until it returns false
    fn scan(&self, request: &ScanRequest<'_>, visitor: &mut dyn FnMut(Record) -> QueryResult<bool>) -> QueryResult<()>;

    /// Run a reducer over the records a scan would visit
    fn aggregate(&self, request: &ScanRequest<'_>, call: &AggregateCall) -> QueryResult<Vec<Bins>>;

    /// Write bins; returns false when `CreateOnly` finds an existing record
    fn put(&self, key: &RecordKey, bins: Bins, mode: WriteMode) -> QueryResult<bool>;

    /// Delete a record; returns whether it existed
    fn delete(&self, key: &RecordKey) -> QueryResult<bool>;

    /// Remove every record of a set; returns false when the set is unknown
    fn truncate(&self, namespace: &str, set: &str) -> QueryResult<bool>;

    fn create_index(&self, index: IndexDefinition) -> QueryResult<()>;

    fn drop_index(&self, namespace: &str, name: &str) -> QueryResult<()>;

    fn indexes(&self, namespace: &str) -> QueryResult<Vec<IndexDefinition>>;
}
