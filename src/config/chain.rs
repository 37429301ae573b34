use serde::{Deserialize, Serialize};

/// Satoshis per coin
pub const SATOSHIS_PER_COIN: u64 = 100_000_000;

/// Protocol policy of the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Target time between blocks in seconds
    pub block_time: u32,

    /// Coinbase reward in satoshis
    pub block_reward: u64,

    /// Maximum serialized block size in bytes
    pub max_block_size: usize,

    /// Easiest allowed target, in compact form
    pub max_target_compact: u32,

    /// Retarget interval in blocks
    pub difficulty_adjustment_blocks: u32,

    /// How far in seconds a block timestamp may lie in the future
    pub timestamp_drift_max: u32,

    /// Whether a trusted checkpoint may replace full validation from genesis
    pub allow_checkpoint: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_time: 60,
            block_reward: 50 * SATOSHIS_PER_COIN,
            max_block_size: 1_000_000,
            max_target_compact: 0x1f00ffff, // 16 leading zero bits
            difficulty_adjustment_blocks: 10,
            timestamp_drift_max: 15 * 60,
            allow_checkpoint: false,
        }
    }
}

impl ChainConfig {
    /// Create a new chain configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target block time
    pub fn with_block_time(mut self, seconds: u32) -> Self {
        self.block_time = seconds;
        self
    }

    /// Set the block reward
    pub fn with_block_reward(mut self, satoshis: u64) -> Self {
        self.block_reward = satoshis;
        self
    }

    /// Set the maximum block size
    pub fn with_max_block_size(mut self, bytes: usize) -> Self {
        self.max_block_size = bytes;
        self
    }

    /// Set the easiest allowed target
    pub fn with_max_target_compact(mut self, compact: u32) -> Self {
        self.max_target_compact = compact;
        self
    }

    /// Set the retarget interval
    pub fn with_difficulty_adjustment_blocks(mut self, blocks: u32) -> Self {
        self.difficulty_adjustment_blocks = blocks;
        self
    }

    /// Set the allowed timestamp drift
    pub fn with_timestamp_drift_max(mut self, seconds: u32) -> Self {
        self.timestamp_drift_max = seconds;
        self
    }

    /// Allow or forbid checkpoint adoption
    pub fn with_allow_checkpoint(mut self, allow: bool) -> Self {
        self.allow_checkpoint = allow;
        self
    }
}
