// Query Executor Module
//
// This module is responsible for executing compiled plans and producing results.
// It implements the iterator-based execution model for query processing.

pub mod engine;
pub mod expression_eval;
pub mod functions;
pub mod operators;
pub mod pipeline;
pub mod result;

// Export key types
pub use self::engine::{BoundPlan, ExecutablePlan, ExecutionContext, ExecutionResult, RowStream};
pub use self::operators::Operator;
pub use self::result::{DataValue, QueryError, QueryResult, Row};
