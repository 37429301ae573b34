use serde::{Deserialize, Serialize};

/// Mempool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Upper bound on transactions returned by one query
    pub max_transactions_per_query: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions_per_query: 5000,
        }
    }
}
