// Query Operators Module
//
// This module defines the operators used for query execution in the
// iterator-based execution model.

pub mod agg;
pub mod compute;
pub mod fetch;
pub mod filter;
pub mod join;
pub mod limit;
pub mod project;
pub mod sort;
pub mod union;

use crate::query::executor::result::{QueryResult, Row};

/// The Operator trait defines the interface for all query execution operators
/// in the iterator-based execution model. Each operator processes rows and
/// passes them to the next operator in the pipeline.
pub trait Operator: Send + Sync {
    /// Initialize the operator before execution
    fn init(&mut self) -> QueryResult<()>;

    /// Get the next row of data from this operator
    fn next(&mut self) -> QueryResult<Option<Row>>;

    /// Close the operator and release any resources
    fn close(&mut self) -> QueryResult<()>;
}
