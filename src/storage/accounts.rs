use log::{debug, warn};
use std::sync::Arc;

use crate::core::account::{Account, Balance, BalanceError};
use crate::core::block::{Block, BlockBody};
use crate::core::transaction::Transaction;
use crate::crypto::hash::Hash;
use crate::crypto::keys::Address;
use crate::storage::kv_store::KVStore;
use crate::storage::trie::{AccountsTree, AccountsTreeNode, TreeError, TreeTransaction};

/// Error type for ledger updates
#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    /// A balance or nonce left its valid range
    #[error("Invalid balance update for {address}: {source}")]
    Balance { address: Address, source: BalanceError },

    /// The resulting tree root differs from the expected accounts hash
    #[error("Accounts hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
}

/// Direction in which a block body is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Commit,
    Revert,
}

impl Direction {
    fn sign(self) -> i128 {
        match self {
            Direction::Commit => 1,
            Direction::Revert => -1,
        }
    }
}

/// Block-level view of the ledger.
///
/// Every block is applied inside a single tree transaction, so a failed
/// update leaves the ledger unchanged.
pub struct Accounts {
    tree: AccountsTree,
    block_reward: u64,
}

impl Accounts {
    pub fn new(tree: AccountsTree, block_reward: u64) -> Self {
        Self { tree, block_reward }
    }

    /// Ledger persisted in a key-value store
    pub fn persistent(kv: Arc<dyn KVStore>, block_reward: u64) -> Result<Self, AccountsError> {
        Ok(Self::new(AccountsTree::persistent(kv)?, block_reward))
    }

    /// Ledger held in memory
    pub fn volatile(block_reward: u64) -> Result<Self, AccountsError> {
        Ok(Self::new(AccountsTree::volatile()?, block_reward))
    }

    /// Speculative ledger over the committed one. Nothing applied to it is
    /// ever written back.
    pub fn temporary(&self) -> Result<Self, AccountsError> {
        Ok(Self::new(self.tree.temporary()?, self.block_reward))
    }

    pub fn block_reward(&self) -> u64 {
        self.block_reward
    }

    /// Apply a block. The resulting root must equal the block's accounts hash.
    pub fn commit_block(&mut self, block: &Block) -> Result<(), AccountsError> {
        let mut tx = self.tree.transaction()?;
        Self::execute(&mut tx, &block.body, Direction::Commit, self.block_reward)?;

        let actual = tx.root()?;
        if actual != block.header.accounts_hash {
            warn!(
                "Accounts hash mismatch committing block {}: expected {}, got {}",
                block.height(),
                block.header.accounts_hash,
                actual
            );
            return Err(AccountsError::HashMismatch {
                expected: block.header.accounts_hash,
                actual,
            });
        }

        tx.commit()?;
        Ok(())
    }

    /// Apply a block body without checking the resulting root
    pub fn commit_block_body(&mut self, body: &BlockBody) -> Result<(), AccountsError> {
        let mut tx = self.tree.transaction()?;
        Self::execute(&mut tx, body, Direction::Commit, self.block_reward)?;
        tx.commit()?;
        Ok(())
    }

    /// Undo a block. The resulting root must equal `expected_root`, the
    /// accounts hash of the block's predecessor.
    pub fn revert_block(&mut self, block: &Block, expected_root: &Hash) -> Result<(), AccountsError> {
        let mut tx = self.tree.transaction()?;
        Self::execute(&mut tx, &block.body, Direction::Revert, self.block_reward)?;

        let actual = tx.root()?;
        if actual != *expected_root {
            return Err(AccountsError::HashMismatch {
                expected: *expected_root,
                actual,
            });
        }

        tx.commit()?;
        Ok(())
    }

    /// Undo a block body without checking the resulting root
    pub fn revert_block_body(&mut self, body: &BlockBody) -> Result<(), AccountsError> {
        let mut tx = self.tree.transaction()?;
        Self::execute(&mut tx, body, Direction::Revert, self.block_reward)?;
        tx.commit()?;
        Ok(())
    }

    /// Balance of `address`, zero if the address is not in the ledger
    pub fn get_balance(&self, address: &Address) -> Result<Balance, AccountsError> {
        Ok(self
            .tree
            .get(address)?
            .map(|account| account.balance)
            .unwrap_or(Balance::INITIAL))
    }

    /// Current accounts hash
    pub fn hash(&self) -> Result<Hash, AccountsError> {
        Ok(self.tree.root()?)
    }

    pub fn verify(&self) -> Result<bool, AccountsError> {
        Ok(self.tree.verify()?)
    }

    /// Replace the ledger contents with a verified node set in one transaction.
    /// Returns false and changes nothing if the nodes do not form a valid tree.
    pub fn populate(&mut self, nodes: &[AccountsTreeNode]) -> Result<bool, AccountsError> {
        let mut tx = self.tree.transaction()?;
        tx.populate(nodes)?;
        if !tx.verify()? {
            warn!("Rejecting {} tree nodes that fail verification", nodes.len());
            return Ok(false);
        }

        tx.commit()?;
        debug!("Populated ledger with {} nodes", nodes.len());
        Ok(true)
    }

    /// Reset to the empty ledger
    pub fn clear(&mut self) -> Result<(), AccountsError> {
        let mut tx = self.tree.transaction()?;
        tx.clear()?;
        tx.commit()?;
        Ok(())
    }

    /// All tree nodes, root first
    pub fn export(&self) -> Result<Vec<AccountsTreeNode>, AccountsError> {
        Ok(self.tree.export()?)
    }

    fn execute(
        tx: &mut TreeTransaction<'_>,
        body: &BlockBody,
        direction: Direction,
        block_reward: u64,
    ) -> Result<(), AccountsError> {
        match direction {
            Direction::Commit => {
                for transaction in &body.transactions {
                    Self::update_sender(tx, transaction, direction)?;
                    Self::update_recipient(tx, transaction, direction)?;
                }
                Self::reward_miner(tx, body, direction, block_reward)
            }
            // Mirror image of commit, so intermediate balances never go negative
            Direction::Revert => {
                Self::reward_miner(tx, body, direction, block_reward)?;
                for transaction in body.transactions.iter().rev() {
                    Self::update_recipient(tx, transaction, direction)?;
                    Self::update_sender(tx, transaction, direction)?;
                }
                Ok(())
            }
        }
    }

    fn reward_miner(
        tx: &mut TreeTransaction<'_>,
        body: &BlockBody,
        direction: Direction,
        block_reward: u64,
    ) -> Result<(), AccountsError> {
        let fees: i128 = body.transactions.iter().map(|t| t.fee as i128).sum();
        Self::update_balance(tx, &body.miner, fees + block_reward as i128, direction)
    }

    fn update_sender(tx: &mut TreeTransaction<'_>, transaction: &Transaction, direction: Direction) -> Result<(), AccountsError> {
        let cost = transaction.value as i128 + transaction.fee as i128;
        Self::update_balance(tx, &transaction.sender(), -cost, direction)
    }

    fn update_recipient(tx: &mut TreeTransaction<'_>, transaction: &Transaction, direction: Direction) -> Result<(), AccountsError> {
        Self::update_balance(tx, &transaction.recipient, transaction.value as i128, direction)
    }

    /// Add `value` (negated when reverting) to the balance of `address`.
    /// Debits also step the nonce: forward on commit, back on revert.
    fn update_balance(
        tx: &mut TreeTransaction<'_>,
        address: &Address,
        value: i128,
        direction: Direction,
    ) -> Result<(), AccountsError> {
        let balance = tx
            .get(address)?
            .map(|account| account.balance)
            .unwrap_or(Balance::INITIAL);

        let nonce_delta = if value < 0 { direction.sign() as i64 } else { 0 };
        let updated = balance
            .apply(direction.sign() * value, nonce_delta)
            .map_err(|source| AccountsError::Balance {
                address: *address,
                source,
            })?;

        tx.put(address, Account::new(updated))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::BlockHeader;
    use crate::crypto::keys::KeyPair;
    use crate::storage::trie::EMPTY_TREE_HASH;

    const REWARD: u64 = 5_000_000_000;

    fn body_with(miner: Address, transactions: Vec<Transaction>) -> BlockBody {
        BlockBody::new(miner, transactions)
    }

    fn block_with_root(body: BlockBody, accounts_hash: Hash) -> Block {
        let header = BlockHeader::new(Hash::zero(), body.hash(), accounts_hash, 0x207fffff, 2, 0, 0);
        Block::new(header, body)
    }

    /// Root the ledger would have after applying `body`
    fn expected_root(accounts: &Accounts, body: &BlockBody) -> Hash {
        let mut temp = accounts.temporary().unwrap();
        temp.commit_block_body(body).unwrap();
        temp.hash().unwrap()
    }

    #[test]
    fn test_miner_reward() {
        let mut accounts = Accounts::volatile(REWARD).unwrap();
        let miner = Address::new([1; 20]);

        accounts.commit_block_body(&body_with(miner, vec![])).unwrap();
        assert_eq!(accounts.get_balance(&miner).unwrap(), Balance::new(REWARD, 0));
    }

    #[test]
    fn test_commit_and_revert_block() {
        let mut accounts = Accounts::volatile(REWARD).unwrap();
        let sender = KeyPair::generate().unwrap();
        let recipient = Address::new([2; 20]);
        let miner = Address::new([3; 20]);

        // Fund the sender
        accounts.commit_block_body(&body_with(sender.address(), vec![])).unwrap();
        let funded_root = accounts.hash().unwrap();

        let tx = Transaction::signed(&sender, recipient, 1_000, 10, 0).unwrap();
        let body = body_with(miner, vec![tx]);
        let block = block_with_root(body.clone(), expected_root(&accounts, &body));

        accounts.commit_block(&block).unwrap();
        assert_eq!(accounts.hash().unwrap(), block.header.accounts_hash);
        assert_eq!(
            accounts.get_balance(&sender.address()).unwrap(),
            Balance::new(REWARD - 1_010, 1)
        );
        assert_eq!(accounts.get_balance(&recipient).unwrap(), Balance::new(1_000, 0));
        assert_eq!(accounts.get_balance(&miner).unwrap(), Balance::new(REWARD + 10, 0));

        accounts.revert_block(&block, &funded_root).unwrap();
        assert_eq!(accounts.hash().unwrap(), funded_root);
        assert_eq!(accounts.get_balance(&sender.address()).unwrap(), Balance::new(REWARD, 0));
        assert_eq!(accounts.get_balance(&recipient).unwrap(), Balance::INITIAL);
        assert_eq!(accounts.get_balance(&miner).unwrap(), Balance::INITIAL);
    }

    #[test]
    fn test_commit_rejects_wrong_accounts_hash() {
        let mut accounts = Accounts::volatile(REWARD).unwrap();
        let block = block_with_root(body_with(Address::new([4; 20]), vec![]), Hash::light(b"wrong"));

        let result = accounts.commit_block(&block);
        assert!(matches!(result, Err(AccountsError::HashMismatch { .. })));
        assert_eq!(accounts.hash().unwrap(), *EMPTY_TREE_HASH);
    }

    #[test]
    fn test_insufficient_balance_applies_nothing() {
        let mut accounts = Accounts::volatile(REWARD).unwrap();
        let sender = KeyPair::generate().unwrap();
        let miner = Address::new([5; 20]);

        let tx = Transaction::signed(&sender, Address::new([6; 20]), 1, 0, 0).unwrap();
        let result = accounts.commit_block_body(&body_with(miner, vec![tx]));

        assert!(matches!(
            result,
            Err(AccountsError::Balance { source: BalanceError::ValueUnderflow, .. })
        ));
        assert_eq!(accounts.get_balance(&miner).unwrap(), Balance::INITIAL);
        assert_eq!(accounts.hash().unwrap(), *EMPTY_TREE_HASH);
    }

    #[test]
    fn test_revert_spending_received_funds() {
        // The recipient spends funds received earlier in the same block
        let mut accounts = Accounts::volatile(REWARD).unwrap();
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let miner = Address::new([7; 20]);

        accounts.commit_block_body(&body_with(alice.address(), vec![])).unwrap();
        let before = accounts.hash().unwrap();

        let pay_bob = Transaction::signed(&alice, bob.address(), 500, 0, 0).unwrap();
        let bob_pays = Transaction::signed(&bob, miner, 500, 0, 0).unwrap();
        let body = body_with(miner, vec![pay_bob, bob_pays]);

        accounts.commit_block_body(&body).unwrap();
        assert_eq!(accounts.get_balance(&bob.address()).unwrap(), Balance::new(0, 1));

        accounts.revert_block_body(&body).unwrap();
        assert_eq!(accounts.hash().unwrap(), before);
    }

    #[test]
    fn test_populate_rejects_invalid_nodes() {
        let mut source = Accounts::volatile(REWARD).unwrap();
        source.commit_block_body(&body_with(Address::new([8; 20]), vec![])).unwrap();
        let nodes = source.export().unwrap();

        let mut target = Accounts::volatile(REWARD).unwrap();
        // Root without its terminal child
        assert!(!target.populate(&nodes[..1]).unwrap());
        assert_eq!(target.hash().unwrap(), *EMPTY_TREE_HASH);

        assert!(target.populate(&nodes).unwrap());
        assert_eq!(target.hash().unwrap(), source.hash().unwrap());

        target.clear().unwrap();
        assert_eq!(target.hash().unwrap(), *EMPTY_TREE_HASH);
    }
}
