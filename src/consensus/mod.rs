//! Consensus rules and the fork-choice state machine

pub mod blockchain;
pub mod checkpoint;
pub mod difficulty;
pub mod genesis;
pub mod mining;
pub mod target;
pub mod validation;

pub use blockchain::{is_harder_chain, Blockchain, ChainError, MainPathExport, PushResult};
pub use checkpoint::{Checkpoint, CheckpointError};
pub use genesis::{genesis_block, genesis_chain, GENESIS_MINER};
pub use validation::BlockRejection;
