//! Trusted checkpoints
//!
//! A checkpoint lets a node start from a recent block instead of replaying the
//! chain from genesis. It carries the block, the total work of the chain it
//! ends and every node of the accounts tree at that block, root first.
//! Checkpoints are exchanged as JSON files with hex-encoded binary fields.

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::codec::{BinaryCodec, CodecError};
use crate::core::block::Block;
use crate::crypto::hash::Hash;
use crate::storage::chain_store::Chain;
use crate::storage::trie::AccountsTreeNode;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Invalid checkpoint format: {0}")]
    InvalidFormat(String),
}

impl From<CodecError> for CheckpointError {
    fn from(err: CodecError) -> Self {
        CheckpointError::InvalidFormat(err.to_string())
    }
}

impl From<hex::FromHexError> for CheckpointError {
    fn from(err: hex::FromHexError) -> Self {
        CheckpointError::InvalidFormat(err.to_string())
    }
}

/// Trusted starting state
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub block: Block,
    pub total_work: f64,

    /// Accounts tree at `block`, root first
    pub nodes: Vec<AccountsTreeNode>,
}

/// On-disk form of a checkpoint
#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    block: String,
    total_work: f64,
    nodes: Vec<String>,
}

impl Checkpoint {
    pub fn new(block: Block, total_work: f64, nodes: Vec<AccountsTreeNode>) -> Self {
        Self {
            block,
            total_work,
            nodes,
        }
    }

    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn height(&self) -> u32 {
        self.block.height()
    }

    /// Chain entry ending at the checkpoint block
    pub fn chain(&self) -> Chain {
        Chain::new(self.block.clone(), self.total_work, self.block.height())
    }

    /// Whether the node set is non-empty and rooted at the block's accounts hash
    pub fn is_rooted(&self) -> bool {
        self.nodes
            .first()
            .map_or(false, |root| root.hash() == *self.block.accounts_hash())
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        let file = CheckpointFile {
            block: hex::encode(self.block.to_bytes()),
            total_work: self.total_work,
            nodes: self.nodes.iter().map(|node| hex::encode(node.to_bytes())).collect(),
        };
        serde_json::to_string_pretty(&file).map_err(|e| CheckpointError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let file: CheckpointFile =
            serde_json::from_str(json).map_err(|e| CheckpointError::DeserializationError(e.to_string()))?;

        let block = Block::from_bytes(&hex::decode(&file.block)?)?;
        let nodes = file
            .nodes
            .iter()
            .map(|node| Ok(AccountsTreeNode::from_bytes(&hex::decode(node)?)?))
            .collect::<Result<Vec<_>, CheckpointError>>()?;

        Ok(Self::new(block, file.total_work, nodes))
    }

    /// Load a checkpoint from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let json = fs::read_to_string(path.as_ref())?;
        let checkpoint = Self::from_json(&json)?;
        info!(
            "Loaded checkpoint {} at height {} with {} tree nodes",
            checkpoint.hash(),
            checkpoint.height(),
            checkpoint.nodes.len()
        );
        Ok(checkpoint)
    }

    /// Save the checkpoint as a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        fs::write(path.as_ref(), self.to_json()?)?;
        info!("Saved checkpoint {} to {}", self.hash(), path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::chain::ChainConfig;
    use crate::consensus::genesis::genesis_block;
    use crate::storage::accounts::Accounts;
    use tempfile::tempdir;

    fn genesis_checkpoint() -> Checkpoint {
        let config = ChainConfig::default();
        let block = genesis_block(&config).unwrap();
        let mut accounts = Accounts::volatile(config.block_reward).unwrap();
        accounts.commit_block(&block).unwrap();
        Checkpoint::new(block, 1.0, accounts.export().unwrap())
    }

    #[test]
    fn test_checkpoint_is_rooted() {
        let checkpoint = genesis_checkpoint();
        assert!(checkpoint.is_rooted());

        let mut empty = checkpoint.clone();
        empty.nodes.clear();
        assert!(!empty.is_rooted());

        let mut shifted = checkpoint;
        shifted.nodes.reverse();
        assert!(!shifted.is_rooted());
    }

    #[test]
    fn test_checkpoint_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let checkpoint = genesis_checkpoint();
        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.chain().height, checkpoint.height());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            Checkpoint::from_json("{}"),
            Err(CheckpointError::DeserializationError(_))
        ));
        assert!(matches!(
            Checkpoint::from_json(r#"{"block":"zz","total_work":1.0,"nodes":[]}"#),
            Err(CheckpointError::InvalidFormat(_))
        ));
    }
}
