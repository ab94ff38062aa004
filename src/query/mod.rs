// BayunKV Query Processing Module
//
// This module contains the statement tree, the compiler that turns it into
// store access plans, and the row pipeline that executes them.

pub mod ast;
pub mod executor;
pub mod planner;

// Export key public interfaces
pub use executor::engine::{ExecutablePlan, ExecutionResult};
pub use executor::result::QueryResult;
pub use planner::Compiler;
