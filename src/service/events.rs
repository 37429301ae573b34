use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::crypto::hash::Hash;

/// Capacity of the notification channels. Slow subscribers lag and skip
/// ahead rather than block the chain.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications about the main chain
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// The main chain has a new head
    HeadChanged(Block),

    /// A queued push has finished and the chain is idle again
    Ready,
}

/// Notifications about pending transactions
#[derive(Debug, Clone, PartialEq)]
pub enum MempoolEvent {
    /// A transaction was admitted to the pool
    TransactionAdded(Transaction),

    /// The pool was revalidated against a new head; mining candidates can be
    /// rebuilt
    TransactionsReady,
}

/// Main chain summary readable without waiting on the queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadSummary {
    pub head_hash: Hash,
    pub height: u32,
    pub total_work: f64,
}
