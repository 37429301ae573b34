use log::debug;

use crate::config::chain::ChainConfig;
use crate::consensus::target::{compact_to_target, target_to_difficulty};
use crate::core::block::{Block, BlockBody, BlockHeader};
use crate::crypto::hash::Hash;
use crate::crypto::keys::Address;
use crate::storage::accounts::{Accounts, AccountsError};
use crate::storage::chain_store::Chain;

/// Address credited with the genesis reward
pub const GENESIS_MINER: Address = Address::new([
    0x91, 0xe9, 0x24, 0x0f, 0x41, 0x52, 0x23, 0x98, 0x2e, 0xdc, 0x34, 0x55, 0x32, 0x63, 0x07, 0x10, 0xe9, 0x4a,
    0x7f, 0x52,
]);

/// Height of the genesis block
pub const GENESIS_HEIGHT: u32 = 1;

pub const GENESIS_TIMESTAMP: u32 = 0;

pub const GENESIS_NONCE: u64 = 38760;

/// Build the genesis block for `config`.
///
/// The genesis block carries no transactions, its target is the easiest one
/// allowed and its accounts hash is the ledger holding only the miner reward.
/// Its proof of work is never checked.
pub fn genesis_block(config: &ChainConfig) -> Result<Block, AccountsError> {
    let body = BlockBody::new(GENESIS_MINER, Vec::new());

    let mut accounts = Accounts::volatile(config.block_reward)?;
    accounts.commit_block_body(&body)?;

    let header = BlockHeader::new(
        Hash::zero(),
        body.hash(),
        accounts.hash()?,
        config.max_target_compact,
        GENESIS_HEIGHT,
        GENESIS_TIMESTAMP,
        GENESIS_NONCE,
    );

    let block = Block::new(header, body);
    debug!("Genesis block {} with accounts hash {}", block.hash(), block.header.accounts_hash);
    Ok(block)
}

/// Chain entry ending at the genesis block
pub fn genesis_chain(config: &ChainConfig) -> Result<Chain, AccountsError> {
    let block = genesis_block(config)?;
    let max_target = compact_to_target(config.max_target_compact);
    let work = target_to_difficulty(&compact_to_target(block.n_bits()), &max_target);
    Ok(Chain::new(block, work, GENESIS_HEIGHT))
}
