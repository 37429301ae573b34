//! Queued façade over the blockchain and the mempool
//!
//! Network and mining layers talk to the chain through `ChainService`. Every
//! block and transaction goes through one FIFO queue, so pushes never
//! interleave. Head summaries are published on a watch channel and can be
//! read while pushes are pending.

pub mod events;
pub mod queue;

use log::{error, info};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::config::mempool::MempoolConfig;
use crate::config::Config;
use crate::consensus::blockchain::{Blockchain, ChainError, PushResult};
use crate::consensus::checkpoint::Checkpoint;
use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::crypto::hash::Hash;
use crate::crypto::keys::Address;
use crate::mempool::{Mempool, MempoolError};

pub use events::{ChainEvent, HeadSummary, MempoolEvent, EVENT_CHANNEL_CAPACITY};
pub use queue::{QueueError, WorkQueue};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Mempool error: {0}")]
    Mempool(#[from] MempoolError),
}

/// State owned by the queue thread
struct NodeState {
    blockchain: Blockchain,
    mempool: Arc<Mempool>,
    chain_events: broadcast::Sender<ChainEvent>,
    head: watch::Sender<HeadSummary>,
}

impl NodeState {
    fn summary(&self) -> HeadSummary {
        HeadSummary {
            head_hash: self.blockchain.head_hash(),
            height: self.blockchain.height(),
            total_work: self.blockchain.total_work(),
        }
    }

    fn push_block(&mut self, block: Block) -> Result<PushResult, ChainError> {
        let previous_head = self.blockchain.head_hash();
        let result = self.blockchain.push_block(block);

        if self.blockchain.head_hash() != previous_head {
            let _ = self.head.send(self.summary());
            let _ = self
                .chain_events
                .send(ChainEvent::HeadChanged(self.blockchain.head().clone()));

            if let Err(err) = self.mempool.evict(self.blockchain.accounts()) {
                error!("Failed to revalidate mempool after head change: {}", err);
            }
        }

        let _ = self.chain_events.send(ChainEvent::Ready);
        result
    }
}

pub struct ChainService {
    queue: WorkQueue<NodeState>,
    mempool: Arc<Mempool>,
    chain_events: broadcast::Sender<ChainEvent>,
    head: watch::Receiver<HeadSummary>,
}

impl ChainService {
    /// Move `blockchain` onto the service queue
    pub fn new(blockchain: Blockchain, mempool_config: MempoolConfig) -> Result<Self, ServiceError> {
        let mempool = Arc::new(Mempool::with_config(mempool_config));
        let (chain_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let initial = HeadSummary {
            head_hash: blockchain.head_hash(),
            height: blockchain.height(),
            total_work: blockchain.total_work(),
        };
        let (head_sender, head) = watch::channel(initial);

        let state = NodeState {
            blockchain,
            mempool: mempool.clone(),
            chain_events: chain_events.clone(),
            head: head_sender,
        };
        let queue = WorkQueue::new("emberchain-chain", state)?;

        info!("Chain service started at height {}", initial.height);
        Ok(Self {
            queue,
            mempool,
            chain_events,
            head,
        })
    }

    /// Open the blockchain described by `config` and start the service
    pub fn open(config: &Config, checkpoint: Option<&Checkpoint>) -> Result<Self, ServiceError> {
        let blockchain = Blockchain::open(config, checkpoint)?;
        Self::new(blockchain, config.mempool.clone())
    }

    /// Queue a block. A head change triggers `HeadChanged`, mempool
    /// revalidation and `TransactionsReady`; every push ends with `Ready`.
    pub async fn push_block(&self, block: Block) -> Result<PushResult, ServiceError> {
        Ok(self.queue.run(move |state| state.push_block(block)).await??)
    }

    /// Queue a transaction for admission against the current ledger
    pub async fn push_transaction(&self, tx: Transaction) -> Result<(), ServiceError> {
        Ok(self
            .queue
            .run(move |state| state.mempool.push_transaction(tx, state.blockchain.accounts()))
            .await??)
    }

    pub async fn get_block(&self, hash: Hash) -> Result<Option<Block>, ServiceError> {
        Ok(self.queue.run(move |state| state.blockchain.get_block(&hash)).await??)
    }

    /// Hashes of the main chain from the origin to the head
    pub async fn path(&self) -> Result<Vec<Hash>, ServiceError> {
        Ok(self.queue.run(|state| state.blockchain.path().to_vec()).await?)
    }

    pub async fn get_next_compact_target(&self) -> Result<u32, ServiceError> {
        Ok(self
            .queue
            .run(|state| state.blockchain.get_next_compact_target(None))
            .await??)
    }

    pub async fn accounts_hash(&self) -> Result<Hash, ServiceError> {
        Ok(self.queue.run(|state| state.blockchain.accounts_hash()).await??)
    }

    /// Block template over the current head, filled from the mempool in
    /// admission order
    pub async fn create_block_template(
        &self,
        miner: Address,
        max_transactions: Option<usize>,
    ) -> Result<Block, ServiceError> {
        Ok(self
            .queue
            .run(move |state| {
                let transactions = state.mempool.get_transactions(max_transactions);
                state.blockchain.create_block_template(miner, transactions, None)
            })
            .await??)
    }

    /// Latest head summary, without waiting on the queue
    pub fn head(&self) -> HeadSummary {
        *self.head.borrow()
    }

    pub fn head_hash(&self) -> Hash {
        self.head().head_hash
    }

    pub fn height(&self) -> u32 {
        self.head().height
    }

    pub fn total_work(&self) -> f64 {
        self.head().total_work
    }

    /// Watch head summaries as they change
    pub fn watch_head(&self) -> watch::Receiver<HeadSummary> {
        self.head.clone()
    }

    pub fn subscribe_chain(&self) -> broadcast::Receiver<ChainEvent> {
        self.chain_events.subscribe()
    }

    pub fn subscribe_mempool(&self) -> broadcast::Receiver<MempoolEvent> {
        self.mempool.subscribe()
    }

    /// Whether the mempool holds the transaction `hash`
    pub fn has_pending_transaction(&self, hash: &Hash) -> bool {
        self.mempool.contains(hash)
    }

    pub fn get_pending_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.mempool.get_transaction(hash)
    }

    /// Number of transactions waiting in the mempool
    pub fn pending_transactions(&self) -> usize {
        self.mempool.len()
    }

    /// Whether a queued push is still running
    pub fn is_busy(&self) -> bool {
        self.queue.is_busy()
    }
}
