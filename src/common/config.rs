// Engine Configuration
//
// Settings handed to the compiler and copied into every plan it produces.

use serde::{Deserialize, Serialize};

/// Configuration for query compilation and execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Namespace used when a statement names a bare set
    pub default_namespace: String,
    /// Maximum number of keys sent in one batch lookup
    pub batch_size: usize,
    /// Upper bound on rows a client-side sort may buffer, unbounded when `None`
    pub max_sort_rows: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_namespace: "test".to_string(),
            batch_size: 5000,
            max_sort_rows: None,
        }
    }
}

impl EngineConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        EngineConfig {
            default_namespace: namespace.into(),
            ..Default::default()
        }
    }
}
