use chrono::Utc;
use log::debug;

use crate::consensus::blockchain::{Blockchain, ChainError};
use crate::core::block::{Block, BlockBody, BlockHeader};
use crate::core::transaction::Transaction;
use crate::crypto::keys::Address;

impl Blockchain {
    /// Candidate block on top of the current head, with nonce zero.
    ///
    /// The accounts hash is computed on a temporary ledger, so committed
    /// state is never touched. The timestamp defaults to now and never
    /// precedes the head. Transactions that do not apply to the ledger make
    /// this fail with a ledger error.
    pub fn create_block_template(
        &self,
        miner: Address,
        transactions: Vec<Transaction>,
        timestamp: Option<u32>,
    ) -> Result<Block, ChainError> {
        let body = BlockBody::new(miner, transactions);

        let mut accounts = self.create_temporary_accounts()?;
        accounts.commit_block_body(&body)?;

        let timestamp = timestamp
            .unwrap_or_else(|| Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32)
            .max(self.head().timestamp());

        let header = BlockHeader::new(
            self.head_hash(),
            body.hash(),
            accounts.hash()?,
            self.get_next_compact_target(None)?,
            self.height() + 1,
            timestamp,
            0,
        );

        debug!(
            "Block template at height {} with {} transactions",
            header.height,
            body.transactions.len()
        );
        Ok(Block::new(header, body))
    }
}
