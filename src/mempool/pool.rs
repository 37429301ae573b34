use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::config::mempool::MempoolConfig;
use crate::core::account::Balance;
use crate::core::transaction::Transaction;
use crate::crypto::hash::Hash;
use crate::crypto::keys::{Address, PublicKey};
use crate::service::events::{MempoolEvent, EVENT_CHANNEL_CAPACITY};
use crate::storage::accounts::{Accounts, AccountsError};

/// Reasons a transaction is refused
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// Transaction already exists in the mempool
    #[error("Transaction {0} already known")]
    KnownTransaction(Hash),

    #[error("Transaction {0} has an invalid signature")]
    InvalidSignature(Hash),

    #[error("Transaction {0} transfers no value")]
    ZeroValue(Hash),

    #[error("Transaction {0} sends to its own sender")]
    SenderIsRecipient(Hash),

    #[error("Insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: u64, required: u128 },

    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: u32, actual: u32 },

    /// Sender already has a transaction waiting
    #[error("Sender {0} already has a pending transaction")]
    DuplicateSender(Address),

    #[error("Ledger error: {0}")]
    Ledger(#[from] AccountsError),
}

/// Transaction waiting for inclusion
#[derive(Debug, Clone)]
struct PoolEntry {
    transaction: Transaction,

    /// Admission sequence number
    sequence: u64,
}

/// Pool of transactions that are valid against the current ledger.
///
/// Holds at most one transaction per sender public key. Every admitted
/// transaction has a valid signature and its sender can pay for it at the
/// time of admission; `evict` re-checks balance and nonce after head changes.
pub struct Mempool {
    /// Pending transactions by hash
    transactions: DashMap<Hash, PoolEntry>,

    /// Pending transaction hash by sender
    by_sender: DashMap<PublicKey, Hash>,

    next_sequence: AtomicU64,

    events: broadcast::Sender<MempoolEvent>,

    config: MempoolConfig,
}

impl Mempool {
    /// Create a new mempool with default configuration
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    /// Create a new mempool with the given configuration
    pub fn with_config(config: MempoolConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transactions: DashMap::new(),
            by_sender: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            events,
            config,
        }
    }

    /// Receive `TransactionAdded` and `TransactionsReady` notifications
    pub fn subscribe(&self) -> broadcast::Receiver<MempoolEvent> {
        self.events.subscribe()
    }

    /// Admit a transaction if `accounts` says its sender can pay for it
    pub fn push_transaction(&self, tx: Transaction, accounts: &Accounts) -> Result<(), MempoolError> {
        let hash = tx.hash();
        if self.transactions.contains_key(&hash) {
            trace!("Ignoring known transaction {}", hash);
            return Err(MempoolError::KnownTransaction(hash));
        }

        if !tx.verify_signature() {
            warn!("Rejected transaction {} - invalid signature", hash);
            return Err(MempoolError::InvalidSignature(hash));
        }

        if tx.value == 0 {
            warn!("Rejected transaction {} - zero value", hash);
            return Err(MempoolError::ZeroValue(hash));
        }

        if tx.recipient == tx.sender() {
            warn!("Rejected transaction {} - sender and recipient coincide", hash);
            return Err(MempoolError::SenderIsRecipient(hash));
        }

        let balance = accounts.get_balance(&tx.sender())?;
        if let Err(err) = Self::check_balance(&tx, &balance) {
            warn!("Rejected transaction {} - {}", hash, err);
            return Err(err);
        }

        // Claim the sender slot before the transaction becomes visible
        match self.by_sender.entry(tx.sender_pubkey) {
            Entry::Occupied(_) => {
                warn!("Rejected transaction {} - sender already has a pending transaction", hash);
                return Err(MempoolError::DuplicateSender(tx.sender()));
            }
            Entry::Vacant(slot) => {
                slot.insert(hash);
            }
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.transactions.insert(
            hash,
            PoolEntry {
                transaction: tx.clone(),
                sequence,
            },
        );

        debug!("Accepted transaction {} from {}", hash, tx.sender());
        // No subscribers is not an error
        let _ = self.events.send(MempoolEvent::TransactionAdded(tx));
        Ok(())
    }

    fn check_balance(tx: &Transaction, balance: &Balance) -> Result<(), MempoolError> {
        if (balance.value as u128) < tx.total_cost() {
            return Err(MempoolError::InsufficientBalance {
                balance: balance.value,
                required: tx.total_cost(),
            });
        }

        if balance.nonce != tx.nonce {
            return Err(MempoolError::InvalidNonce {
                expected: balance.nonce,
                actual: tx.nonce,
            });
        }

        Ok(())
    }

    /// Drop transactions that the ledger no longer pays for, then announce
    /// `TransactionsReady`. Returns the hashes of the evicted transactions.
    ///
    /// Signatures were checked on admission and are not re-verified.
    pub fn evict(&self, accounts: &Accounts) -> Result<Vec<Hash>, MempoolError> {
        let pending: Vec<(Hash, Transaction)> = self
            .transactions
            .iter()
            .map(|entry| (*entry.key(), entry.value().transaction.clone()))
            .collect();

        let mut evicted = Vec::new();
        for (hash, tx) in pending {
            let balance = accounts.get_balance(&tx.sender())?;
            if let Err(err) = Self::check_balance(&tx, &balance) {
                debug!("Evicting transaction {} - {}", hash, err);
                self.remove(&hash);
                evicted.push(hash);
            }
        }

        if !evicted.is_empty() {
            info!(
                "Evicted {} transactions, {} remain pending",
                evicted.len(),
                self.transactions.len()
            );
        }

        let _ = self.events.send(MempoolEvent::TransactionsReady);
        Ok(evicted)
    }

    /// Remove a transaction, returning it if it was pending
    pub fn remove(&self, hash: &Hash) -> Option<Transaction> {
        let (_, entry) = self.transactions.remove(hash)?;
        self.by_sender
            .remove_if(&entry.transaction.sender_pubkey, |_, pending| pending == hash);
        Some(entry.transaction)
    }

    pub fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.transactions
            .get(hash)
            .map(|entry| entry.transaction.clone())
    }

    /// Pending transactions in admission order, at most `max` of them and
    /// never more than the configured query limit
    pub fn get_transactions(&self, max: Option<usize>) -> Vec<Transaction> {
        let limit = max
            .unwrap_or(self.config.max_transactions_per_query)
            .min(self.config.max_transactions_per_query);

        let mut entries: Vec<PoolEntry> = self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.sequence);

        entries
            .into_iter()
            .take(limit)
            .map(|entry| entry.transaction)
            .collect()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}
