//! Persistence: key-value stores, the accounts tree and chain entries

pub mod accounts;
pub mod chain_store;
pub mod kv_store;
pub mod trie;

pub use accounts::{Accounts, AccountsError};
pub use chain_store::{Chain, ChainStore, ChainStoreError};
pub use kv_store::{KVStore, KVStoreError, MemoryStore, RocksDBStore};
pub use trie::{AccountsTree, AccountsTreeNode, TreeError, EMPTY_TREE_HASH};
