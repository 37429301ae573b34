use chrono::Utc;
use log::{debug, error, info, trace, warn};
use num_bigint::BigUint;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::chain::ChainConfig;
use crate::config::Config;
use crate::consensus::checkpoint::Checkpoint;
use crate::consensus::difficulty::{is_retarget_height, next_compact_target};
use crate::consensus::genesis::genesis_chain;
use crate::consensus::target::{compact_to_target, target_to_difficulty};
use crate::consensus::validation::{verify_block, verify_extension};
use crate::core::block::Block;
use crate::crypto::hash::Hash;
use crate::storage::accounts::{Accounts, AccountsError};
use crate::storage::chain_store::{Chain, ChainStore, ChainStoreError};
use crate::storage::kv_store::{KVStore, KVStoreError, MemoryStore, RocksDBStore};
use crate::storage::trie::{AccountsTreeNode, EMPTY_TREE_HASH};

/// Outcome of pushing a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// The block was accepted, either onto the main chain or a fork
    Ok,

    /// The block was already known and changes nothing
    KnownBlock,

    /// The predecessor of the block is unknown
    OrphanBlock,

    /// The block breaks a protocol rule
    InvalidBlock,
}

/// Error type for chain operations
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Chain store error: {0}")]
    Store(#[from] ChainStoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Ledger error: {0}")]
    Accounts(#[from] AccountsError),

    /// Chain and ledger disagree. The blockchain stops accepting blocks.
    #[error("Consistency failure: {0}")]
    Consistency(String),

    #[error("Blockchain halted after a consistency failure")]
    Halted,

    #[error("Unknown block {0}")]
    UnknownBlock(Hash),
}

/// Blocks of the main chain up to some height
#[derive(Debug, Clone, Default)]
pub struct MainPathExport {
    /// Block hashes from the origin upwards
    pub path: Vec<Hash>,
    pub blocks: HashMap<Hash, Block>,
}

/// Whether chain `a` with head hash `a_hash` wins over chain `b`.
///
/// More total work wins, then the later head timestamp, then the smaller
/// head hash.
pub fn is_harder_chain(a: &Chain, a_hash: &Hash, b: &Chain, b_hash: &Hash) -> bool {
    match a.total_work.partial_cmp(&b.total_work) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Equal) => match a.head.timestamp().cmp(&b.head.timestamp()) {
            Ordering::Greater => true,
            Ordering::Equal => a_hash < b_hash,
            Ordering::Less => false,
        },
        _ => false,
    }
}

/// Result of rehearsing a rebranch on a scratch ledger
enum Rehearsal {
    /// Every fork block applies cleanly
    Clean,

    /// The fork block at this index does not apply
    Rejected(usize),
}

/// Fork-choice state machine over chain entries and the ledger.
///
/// Tracks the main chain together with the path of hashes from the origin
/// (genesis or an adopted checkpoint) to its head. Every other accepted block
/// is kept as a chain entry of its own. Mutations take `&mut self`, so callers
/// that share a blockchain go through a single queue.
pub struct Blockchain {
    config: ChainConfig,
    store: ChainStore,
    accounts: Accounts,
    max_target: BigUint,

    main_chain: Chain,
    head_hash: Hash,
    main_path: Vec<Hash>,

    genesis_hash: Hash,
    checkpoint_hash: Option<Hash>,
    checkpoint_loaded: bool,

    halted: bool,
}

impl Blockchain {
    /// Open a blockchain over existing stores.
    ///
    /// Starts from genesis if the store holds no main chain. With
    /// `allow_checkpoint` set, a checkpoint ahead of the stored main chain is
    /// adopted instead. An empty ledger is bootstrapped by committing the head
    /// block; a ledger that disagrees with the head is a consistency failure.
    pub fn new(
        config: ChainConfig,
        store: ChainStore,
        accounts: Accounts,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<Self, ChainError> {
        let genesis = genesis_chain(&config)?;
        let genesis_hash = genesis.hash();

        let main_chain = match store.get_main_chain()? {
            Some(chain) => chain,
            None => {
                info!("Initializing chain with genesis block {}", genesis_hash);
                store.put(&genesis)?;
                store.set_main_chain(&genesis_hash)?;
                genesis
            }
        };

        let checkpoint = checkpoint.filter(|_| config.allow_checkpoint);
        let max_target = compact_to_target(config.max_target_compact);
        let head_hash = main_chain.hash();

        let mut blockchain = Self {
            config,
            store,
            accounts,
            max_target,
            main_chain,
            head_hash,
            main_path: Vec::new(),
            genesis_hash,
            checkpoint_hash: checkpoint.map(Checkpoint::hash),
            checkpoint_loaded: false,
            halted: false,
        };

        if let Some(checkpoint) = checkpoint {
            if blockchain.main_chain.height < checkpoint.height() && blockchain.load_checkpoint(checkpoint)? {
                let chain = checkpoint.chain();
                blockchain.store.put(&chain)?;
                blockchain.store.set_main_chain(&checkpoint.hash())?;
                blockchain.head_hash = checkpoint.hash();
                blockchain.main_chain = chain;
            }
        }

        blockchain.main_path = blockchain.fetch_path(&blockchain.main_chain.head)?;
        if blockchain.checkpoint_hash.is_some() && blockchain.main_path.first() == blockchain.checkpoint_hash.as_ref() {
            blockchain.checkpoint_loaded = true;
        }

        let accounts_hash = blockchain.accounts.hash()?;
        if accounts_hash == *EMPTY_TREE_HASH {
            debug!("Bootstrapping empty ledger with block {}", blockchain.head_hash);
            blockchain.accounts.commit_block(&blockchain.main_chain.head)?;
        } else if accounts_hash != *blockchain.main_chain.head.accounts_hash() {
            error!(
                "Ledger root {} does not match head accounts hash {}",
                accounts_hash,
                blockchain.main_chain.head.accounts_hash()
            );
            return Err(ChainError::Consistency(format!(
                "ledger root {} does not match head {}",
                accounts_hash, blockchain.head_hash
            )));
        }

        info!(
            "Blockchain ready at height {} with head {} (total work {})",
            blockchain.main_chain.height, blockchain.head_hash, blockchain.main_chain.total_work
        );
        Ok(blockchain)
    }

    /// Blockchain held entirely in memory
    pub fn volatile(config: ChainConfig) -> Result<Self, ChainError> {
        Self::with_store(config, Arc::new(MemoryStore::new()), None)
    }

    /// Blockchain whose entries and ledger share one key-value store
    pub fn with_store(
        config: ChainConfig,
        kv: Arc<dyn KVStore>,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<Self, ChainError> {
        let accounts = Accounts::persistent(kv.clone(), config.block_reward)?;
        Self::new(config, ChainStore::new(kv), accounts, checkpoint)
    }

    /// Open the blockchain described by a node configuration
    pub fn open(config: &Config, checkpoint: Option<&Checkpoint>) -> Result<Self, ChainError> {
        let kv: Arc<dyn KVStore> = if config.storage.volatile {
            Arc::new(MemoryStore::new())
        } else {
            info!("Opening chain database at {}", config.storage.path);
            Arc::new(RocksDBStore::new(Path::new(&config.storage.path))?)
        };
        Self::with_store(config.chain.clone(), kv, checkpoint)
    }

    /// Replace the ledger with the checkpoint's accounts tree.
    ///
    /// The nodes are first loaded into a scratch ledger and verified. Returns
    /// false and leaves the ledger untouched if they are unusable.
    fn load_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<bool, ChainError> {
        if checkpoint.nodes.is_empty() {
            debug!("Loading checkpoint failed, no tree nodes");
            return Ok(false);
        }
        if !checkpoint.is_rooted() {
            debug!("Loading checkpoint failed, accounts hash mismatch");
            return Ok(false);
        }

        let mut scratch = Accounts::volatile(self.config.block_reward)?;
        if !scratch.populate(&checkpoint.nodes)? {
            debug!("Loading checkpoint failed, tree could not be populated");
            return Ok(false);
        }

        self.accounts.clear()?;
        if !self.accounts.populate(&checkpoint.nodes)? {
            return Err(ChainError::Consistency(format!(
                "checkpoint {} verified but could not be populated",
                checkpoint.hash()
            )));
        }

        info!(
            "Adopted checkpoint {} at height {}",
            checkpoint.hash(),
            checkpoint.height()
        );
        self.checkpoint_loaded = true;
        Ok(true)
    }

    /// Hashes from the origin up to `head`
    fn fetch_path(&self, head: &Block) -> Result<Vec<Hash>, ChainError> {
        let mut hash = head.hash();
        let mut block = head.clone();
        let mut path = vec![hash];

        while !self.is_origin(&hash) {
            let prev_hash = *block.prev_hash();
            let prev = self.store.get(&prev_hash)?.ok_or_else(|| {
                ChainError::Consistency(format!("missing predecessor {} of {}", prev_hash, hash))
            })?;
            path.push(prev_hash);
            hash = prev_hash;
            block = prev.head;
        }

        path.reverse();
        Ok(path)
    }

    fn is_origin(&self, hash: &Hash) -> bool {
        *hash == self.genesis_hash || self.checkpoint_hash.as_ref() == Some(hash)
    }

    /// Push a block received from the network or a miner
    pub fn push_block(&mut self, block: Block) -> Result<PushResult, ChainError> {
        if self.halted {
            return Err(ChainError::Halted);
        }

        let result = self.try_push_block(block);
        if let Err(ChainError::Consistency(reason)) = &result {
            error!("Halting blockchain: {}", reason);
            self.halted = true;
        }
        result
    }

    fn try_push_block(&mut self, block: Block) -> Result<PushResult, ChainError> {
        let hash = block.hash();

        let known = self.store.get(&hash)?;
        if let Some(known) = &known {
            if !self.is_harder(known, &hash) {
                trace!("Ignoring known block {}", hash);
                return Ok(PushResult::KnownBlock);
            }
        }

        let prev = match self.store.get(block.prev_hash())? {
            Some(prev) => prev,
            None => {
                debug!("Discarding block {}, predecessor {} unknown", hash, block.prev_hash());
                return Ok(PushResult::OrphanBlock);
            }
        };

        if let Err(reason) = verify_block(&block, &self.config, now()) {
            warn!("Rejecting block {}: {}", hash, reason);
            return Ok(PushResult::InvalidBlock);
        }

        let next_target = self.get_next_compact_target(Some(&prev))?;
        if let Err(reason) = verify_extension(&prev, &block, next_target) {
            warn!("Rejecting block {}: {}", hash, reason);
            return Ok(PushResult::InvalidBlock);
        }

        let newly_stored = known.is_none();
        let new_chain = match known {
            Some(known) => known,
            None => {
                let total_work = prev.total_work + self.block_difficulty(&block);
                let chain = Chain::new(block, total_work, prev.height + 1);
                self.store.put(&chain)?;
                chain
            }
        };

        if *new_chain.head.prev_hash() == self.head_hash {
            if !self.extend(new_chain, hash)? {
                if newly_stored {
                    self.store.remove(&hash)?;
                }
                return Ok(PushResult::InvalidBlock);
            }
            return Ok(PushResult::Ok);
        }

        if self.is_harder(&new_chain, &hash) {
            return self.rebranch(new_chain, hash);
        }

        debug!(
            "Creating/extending fork with block {}, height={}, totalWork={}",
            hash, new_chain.height, new_chain.total_work
        );
        Ok(PushResult::Ok)
    }

    fn is_harder(&self, chain: &Chain, hash: &Hash) -> bool {
        is_harder_chain(chain, hash, &self.main_chain, &self.head_hash)
    }

    /// Difficulty of a block relative to the easiest allowed target
    pub fn block_difficulty(&self, block: &Block) -> f64 {
        target_to_difficulty(&compact_to_target(block.n_bits()), &self.max_target)
    }

    /// Commit the head of `chain` and make it the main chain. Returns false if
    /// the block does not apply to the ledger.
    fn extend(&mut self, chain: Chain, hash: Hash) -> Result<bool, ChainError> {
        match self.accounts.commit_block(&chain.head) {
            Ok(()) => {}
            Err(err @ AccountsError::Tree(_)) => return Err(err.into()),
            Err(err) => {
                warn!("Rejecting block {}: {}", hash, err);
                return Ok(false);
            }
        }

        self.store.set_main_chain(&hash)?;
        self.main_chain = chain;
        self.main_path.push(hash);
        self.head_hash = hash;

        info!(
            "Now at block #{} {} (total work {})",
            self.main_chain.height, hash, self.main_chain.total_work
        );
        Ok(true)
    }

    /// Undo the head block of the main chain
    fn revert(&mut self) -> Result<(), ChainError> {
        if self.main_path.len() <= 1 {
            return Err(ChainError::Consistency(format!(
                "cannot revert past origin {}",
                self.head_hash
            )));
        }

        let prev_hash = *self.main_chain.head.prev_hash();
        let prev = self.store.get(&prev_hash)?.ok_or_else(|| {
            ChainError::Consistency(format!("missing predecessor {} while reverting", prev_hash))
        })?;

        self.accounts
            .revert_block(&self.main_chain.head, prev.head.accounts_hash())
            .map_err(|err| ChainError::Consistency(format!("failed to revert {}: {}", self.head_hash, err)))?;

        self.store.set_main_chain(&prev_hash)?;
        self.main_chain = prev;
        self.main_path.pop();
        self.head_hash = prev_hash;

        debug!("Reverted to block #{} {}", self.main_chain.height, prev_hash);
        Ok(())
    }

    /// Switch the main chain to the fork ending in `new_chain`.
    ///
    /// The switch is rehearsed on a scratch ledger first. A fork block that
    /// does not apply there is removed together with the fork blocks built on
    /// it, and the head stays put.
    fn rebranch(&mut self, new_chain: Chain, hash: Hash) -> Result<PushResult, ChainError> {
        info!(
            "Rebranching to fork {}, height={}, totalWork={}",
            hash, new_chain.height, new_chain.total_work
        );

        // Walk the fork back to the main path, newest block first
        let mut fork = vec![(hash, new_chain)];
        let ancestor_index = loop {
            let prev_hash = match fork.last() {
                Some((_, chain)) => *chain.head.prev_hash(),
                None => return Err(ChainError::UnknownBlock(hash)),
            };
            if let Some(index) = self.main_path.iter().rposition(|h| *h == prev_hash) {
                break index;
            }
            match self.store.get(&prev_hash)? {
                Some(prev) => fork.push((prev_hash, prev)),
                None => {
                    warn!("Fork {} branches off before the origin, rejecting", hash);
                    self.store.remove(&hash)?;
                    return Ok(PushResult::InvalidBlock);
                }
            }
        };
        fork.reverse();

        let ancestor = self.main_path[ancestor_index];
        debug!(
            "Found common ancestor {} {} blocks up",
            ancestor,
            fork.len()
        );

        if let Rehearsal::Rejected(index) = self.rehearse_rebranch(ancestor_index, &fork)? {
            for (bad_hash, _) in &fork[index..] {
                self.store.remove(bad_hash)?;
            }
            return Ok(PushResult::InvalidBlock);
        }

        while self.head_hash != ancestor {
            self.revert()?;
        }

        for (fork_hash, chain) in fork {
            if !self.extend(chain, fork_hash)? {
                return Err(ChainError::Consistency(format!(
                    "rehearsed fork block {} failed to apply",
                    fork_hash
                )));
            }
        }

        Ok(PushResult::Ok)
    }

    /// Replay a rebranch on a temporary ledger without touching committed state
    fn rehearse_rebranch(&self, ancestor_index: usize, fork: &[(Hash, Chain)]) -> Result<Rehearsal, ChainError> {
        let mut scratch = self.accounts.temporary()?;

        let mut current = self.main_chain.clone();
        for _ in (ancestor_index + 1)..self.main_path.len() {
            let prev_hash = *current.head.prev_hash();
            let prev = self.store.get(&prev_hash)?.ok_or_else(|| {
                ChainError::Consistency(format!("missing predecessor {} while rehearsing", prev_hash))
            })?;
            scratch
                .revert_block(&current.head, prev.head.accounts_hash())
                .map_err(|err| {
                    ChainError::Consistency(format!("failed to revert {}: {}", current.hash(), err))
                })?;
            current = prev;
        }

        for (index, (fork_hash, chain)) in fork.iter().enumerate() {
            match scratch.commit_block(&chain.head) {
                Ok(()) => {}
                Err(err @ AccountsError::Tree(_)) => return Err(err.into()),
                Err(err) => {
                    warn!("Rejecting fork at block {}: {}", fork_hash, err);
                    return Ok(Rehearsal::Rejected(index));
                }
            }
        }

        Ok(Rehearsal::Clean)
    }

    /// Compact target the successor of `chain` must carry, the main chain
    /// by default.
    ///
    /// The target only changes when the chain height is a multiple of the
    /// adjustment interval. The window then reaches back that many blocks,
    /// or to the origin if the chain is shorter.
    pub fn get_next_compact_target(&self, chain: Option<&Chain>) -> Result<u32, ChainError> {
        let chain = chain.unwrap_or(&self.main_chain);
        if !is_retarget_height(&self.config, chain.height) {
            return Ok(chain.head.n_bits());
        }

        let mut start = chain.head.clone();
        for _ in 0..self.config.difficulty_adjustment_blocks {
            if self.is_origin(&start.hash()) {
                break;
            }
            match self.store.get(start.prev_hash())? {
                Some(prev) => start = prev.head,
                None => break,
            }
        }

        Ok(next_compact_target(&self.config, &chain.head, &start))
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>, ChainError> {
        Ok(self.store.get(hash)?.map(|chain| chain.head))
    }

    pub fn get_chain(&self, hash: &Hash) -> Result<Option<Chain>, ChainError> {
        Ok(self.store.get(hash)?)
    }

    pub fn head(&self) -> &Block {
        &self.main_chain.head
    }

    pub fn head_hash(&self) -> Hash {
        self.head_hash
    }

    pub fn height(&self) -> u32 {
        self.main_chain.height
    }

    pub fn total_work(&self) -> f64 {
        self.main_chain.total_work
    }

    pub fn main_chain(&self) -> &Chain {
        &self.main_chain
    }

    /// Hashes of the main chain from the origin to the head
    pub fn path(&self) -> &[Hash] {
        &self.main_path
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn accounts_hash(&self) -> Result<Hash, ChainError> {
        Ok(self.accounts.hash()?)
    }

    /// Speculative ledger over the committed one
    pub fn create_temporary_accounts(&self) -> Result<Accounts, ChainError> {
        Ok(self.accounts.temporary()?)
    }

    pub fn checkpoint_loaded(&self) -> bool {
        self.checkpoint_loaded
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Main chain blocks up to `height`, the head by default
    pub fn export_main_path(&self, height: Option<u32>) -> Result<MainPathExport, ChainError> {
        let height = height.unwrap_or_else(|| self.height());
        let mut export = MainPathExport::default();

        for hash in &self.main_path {
            let block = self.get_block(hash)?.ok_or(ChainError::UnknownBlock(*hash))?;
            if block.height() > height {
                break;
            }
            export.path.push(*hash);
            export.blocks.insert(*hash, block);
        }

        Ok(export)
    }

    /// Accounts tree as of the main chain block at `height`, root first.
    ///
    /// Blocks above `height` are reverted on a temporary ledger, whose root
    /// must then match that block and verify.
    pub fn export_accounts(&self, height: Option<u32>) -> Result<Vec<AccountsTreeNode>, ChainError> {
        let height = height.unwrap_or_else(|| self.height());
        let mut accounts = self.accounts.temporary()?;

        let mut current = self.main_chain.head.clone();
        while current.height() > height {
            let prev_hash = *current.prev_hash();
            let prev = self
                .get_block(&prev_hash)?
                .ok_or(ChainError::UnknownBlock(prev_hash))?;
            accounts.revert_block(&current, prev.accounts_hash())?;
            current = prev;
        }

        if accounts.hash()? != *current.accounts_hash() {
            return Err(ChainError::Consistency(format!(
                "accounts hash mismatch exporting block {}",
                current.hash()
            )));
        }
        if !accounts.verify()? {
            return Err(ChainError::Consistency("accounts tree verification failed".to_string()));
        }

        Ok(accounts.export()?)
    }
}

/// Current time in seconds since the Unix epoch
fn now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
