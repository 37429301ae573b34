//! Block checks that do not touch the ledger.
//!
//! Intrinsic checks look at a block in isolation. Extension checks compare it
//! against the chain it claims to extend.

use rayon::prelude::*;
use std::collections::HashSet;

use crate::codec::BinaryCodec;
use crate::config::chain::ChainConfig;
use crate::consensus::target::{compact_to_target, is_proof_of_work, is_valid_target};
use crate::core::block::Block;
use crate::crypto::hash::Hash;
use crate::crypto::keys::Address;
use crate::storage::chain_store::Chain;

/// Reason a block was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockRejection {
    #[error("block size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("more than one transaction from sender {0}")]
    DuplicateSender(Address),

    #[error("transaction {0} sends to its own sender")]
    SenderIsRecipient(Hash),

    #[error("timestamp {timestamp} too far in the future (max {max})")]
    TimestampTooFarAhead { timestamp: u32, max: u64 },

    #[error("target {0:#010x} out of range")]
    InvalidTarget(u32),

    #[error("proof of work does not meet target")]
    InvalidProofOfWork,

    #[error("body hash mismatch")]
    BodyHashMismatch,

    #[error("invalid signature on transaction {0}")]
    InvalidSignature(Hash),

    #[error("height {actual} does not follow {expected}")]
    HeightMismatch { expected: u32, actual: u32 },

    #[error("target {actual:#010x} differs from expected {expected:#010x}")]
    TargetMismatch { expected: u32, actual: u32 },

    #[error("timestamp {actual} precedes predecessor timestamp {previous}")]
    TimestampBeforePredecessor { previous: u32, actual: u32 },
}

/// Check everything about `block` that needs no predecessor.
///
/// `now` is the current time in seconds since the Unix epoch.
pub fn verify_block(block: &Block, config: &ChainConfig, now: u64) -> Result<(), BlockRejection> {
    let size = block.encoded_size();
    if size > config.max_block_size {
        return Err(BlockRejection::TooLarge {
            size,
            max: config.max_block_size,
        });
    }

    let mut senders = HashSet::with_capacity(block.transactions().len());
    for tx in block.transactions() {
        let sender = tx.sender();
        if !senders.insert(tx.sender_pubkey) {
            return Err(BlockRejection::DuplicateSender(sender));
        }
        if tx.recipient == sender {
            return Err(BlockRejection::SenderIsRecipient(tx.hash()));
        }
    }

    let max_timestamp = now + config.timestamp_drift_max as u64;
    if block.timestamp() as u64 > max_timestamp {
        return Err(BlockRejection::TimestampTooFarAhead {
            timestamp: block.timestamp(),
            max: max_timestamp,
        });
    }

    verify_proof_of_work(block, config)?;

    if block.header.body_hash != block.body.hash() {
        return Err(BlockRejection::BodyHashMismatch);
    }

    // Signatures dominate the cost, check them in parallel
    let invalid = block
        .transactions()
        .par_iter()
        .find_any(|tx| !tx.verify_signature());
    if let Some(tx) = invalid {
        return Err(BlockRejection::InvalidSignature(tx.hash()));
    }

    Ok(())
}

/// Check that the header's hard hash meets its declared target
pub fn verify_proof_of_work(block: &Block, config: &ChainConfig) -> Result<(), BlockRejection> {
    let target = compact_to_target(block.n_bits());
    let max_target = compact_to_target(config.max_target_compact);
    if !is_valid_target(&target, &max_target) {
        return Err(BlockRejection::InvalidTarget(block.n_bits()));
    }

    if !is_proof_of_work(&block.header.pow_hash(), &target) {
        return Err(BlockRejection::InvalidProofOfWork);
    }
    Ok(())
}

/// Check that `block` may follow `prev`, whose successor must carry
/// `next_compact_target`.
pub fn verify_extension(prev: &Chain, block: &Block, next_compact_target: u32) -> Result<(), BlockRejection> {
    if prev.height.checked_add(1) != Some(block.height()) {
        return Err(BlockRejection::HeightMismatch {
            expected: prev.height.saturating_add(1),
            actual: block.height(),
        });
    }

    if block.n_bits() != next_compact_target {
        return Err(BlockRejection::TargetMismatch {
            expected: next_compact_target,
            actual: block.n_bits(),
        });
    }

    if prev.head.timestamp() > block.timestamp() {
        return Err(BlockRejection::TimestampBeforePredecessor {
            previous: prev.head.timestamp(),
            actual: block.timestamp(),
        });
    }

    Ok(())
}
