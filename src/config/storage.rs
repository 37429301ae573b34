use serde::{Deserialize, Serialize};

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database path
    pub path: String,

    /// Keep everything in memory instead of opening the database
    pub volatile: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/emberchain/db".to_string(),
            volatile: false,
        }
    }
}
