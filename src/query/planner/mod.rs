// Query Planner Module
//
// This module compiles parsed statements into query plans: projection and
// predicate compilation, access strategy selection and parameter binding.

pub mod binder;
pub mod compiler;
pub mod plan;
pub mod predicate;
pub mod projection;
pub mod selector;

// Export key types
pub use self::binder::ParameterBinder;
pub use self::compiler::Compiler;
pub use self::plan::{AccessStrategy, CompiledStatement, QueryNode, QueryPlan};
