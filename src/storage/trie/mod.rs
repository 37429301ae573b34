//! Merkle radix tree of account balances
//!
//! Nodes are content addressed: a branch references its children by the hash
//! of their serialization, and the hash of the root node is the accounts hash
//! committed in block headers.

pub mod node;
pub mod store;
pub mod tree;

pub use node::{AccountsTreeNode, EMPTY_TREE_HASH};
pub use store::{KvTreeStore, NodeChange, OverlayTreeStore, TreeChanges, TreeError, TreeStore, VolatileTreeStore};
pub use tree::{AccountsTree, TreeTransaction};
