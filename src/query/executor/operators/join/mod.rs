// Join Operators Module
//
// This module defines the join operators for query execution in the
// iterator-based execution model.

mod nested_loop;

pub use self::nested_loop::NestedLoopJoin;
