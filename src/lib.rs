// BayunKV
//
// Relational query compiler and row pipeline in front of a schema-less
// key/value store.

pub mod common;
pub mod query;
pub mod storage;

// Re-export key items for convenient access
pub use common::config::EngineConfig;
pub use query::ast::{ExprArena, ParsedStatement, Statement};
pub use query::executor::engine::{BoundPlan, ExecutablePlan, ExecutionResult, RowStream};
pub use query::executor::result::{DataValue, QueryError, QueryResult, Row};
pub use query::planner::Compiler;
pub use storage::memory::MemoryStore;
pub use storage::{IndexCatalog, KeyValueStore};
