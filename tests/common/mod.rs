#![allow(dead_code)]

use emberchain::config::chain::ChainConfig;
use emberchain::consensus::target::{compact_to_target, is_proof_of_work};
use emberchain::consensus::Blockchain;
use emberchain::core::{Block, Transaction};
use emberchain::crypto::{Address, KeyPair};

/// Easiest encodable target; about every other nonce meets it
pub const EASY_TARGET: u32 = 0x207fffff;

pub fn easy_config() -> ChainConfig {
    ChainConfig::default()
        .with_max_target_compact(EASY_TARGET)
        .with_block_reward(1000)
}

pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed([seed; 32]).unwrap()
}

pub fn mine(mut block: Block) -> Block {
    let target = compact_to_target(block.n_bits());
    while !is_proof_of_work(&block.header.pow_hash(), &target) {
        block.header.nonce += 1;
    }
    block
}

/// Mined successor of the head of `blockchain`
pub fn next_block(blockchain: &Blockchain, miner: Address, transactions: Vec<Transaction>, timestamp: u32) -> Block {
    mine(
        blockchain
            .create_block_template(miner, transactions, Some(timestamp))
            .unwrap(),
    )
}

/// Mine a block on `blockchain` and push it, returning the block
pub fn extend(blockchain: &mut Blockchain, miner: Address, transactions: Vec<Transaction>, timestamp: u32) -> Block {
    let block = next_block(blockchain, miner, transactions, timestamp);
    assert_eq!(
        blockchain.push_block(block.clone()).unwrap(),
        emberchain::consensus::PushResult::Ok
    );
    block
}
