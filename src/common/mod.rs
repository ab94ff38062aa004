// Common Module
//
// Types shared by the planner, the executor and the store layer.

pub mod config;
pub mod types;
