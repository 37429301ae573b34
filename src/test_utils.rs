//! Helpers shared by unit tests

use crate::config::chain::ChainConfig;
use crate::consensus::blockchain::Blockchain;
use crate::consensus::target::{compact_to_target, is_proof_of_work};
use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::crypto::keys::{Address, KeyPair};

/// Easiest encodable target; about every other nonce meets it
pub const EASY_TARGET: u32 = 0x207fffff;

/// Chain policy cheap enough to mine in tests
pub fn easy_config() -> ChainConfig {
    ChainConfig::default()
        .with_max_target_compact(EASY_TARGET)
        .with_block_reward(1000)
}

/// Search nonces until the block meets its own target
pub fn mine(mut block: Block) -> Block {
    let target = compact_to_target(block.n_bits());
    while !is_proof_of_work(&block.header.pow_hash(), &target) {
        block.header.nonce += 1;
    }
    block
}

/// Mined successor of the blockchain head
pub fn next_block(blockchain: &Blockchain, miner: Address, transactions: Vec<Transaction>, timestamp: u32) -> Block {
    let template = blockchain
        .create_block_template(miner, transactions, Some(timestamp))
        .unwrap();
    mine(template)
}

pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed([seed; 32]).unwrap()
}
