use log::{trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::node::AccountsTreeNode;
use crate::codec::{BinaryCodec, CodecError};
use crate::crypto::hash::Hash;
use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation, WriteBatchOperationExt};

/// Key prefix of serialized tree nodes
const NODE_KEY_PREFIX: &str = "accounts:";

/// Key prefix of node reference counts
const REFS_KEY_PREFIX: &str = "accounts:refs:";

/// Key holding the current root node key
const ROOT_KEY: &[u8] = b"accounts:root";

/// Error type for accounts tree operations
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Backing store failure
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),

    /// A stored node could not be decoded
    #[error("Corrupt tree node {0}: {1}")]
    Corrupt(Hash, CodecError),

    /// A child reference points at a node that is not stored
    #[error("Missing tree node {0}")]
    MissingNode(Hash),

    /// The store holds no root key
    #[error("Tree has no root")]
    MissingRoot,

    #[error("Tree store lock poisoned")]
    LockPoisoned,
}

/// Pending change to one stored node
#[derive(Debug, Clone)]
pub struct NodeChange {
    pub node: AccountsTreeNode,

    /// Net number of references added (negative when released)
    pub delta: i64,
}

/// Buffered changes of a tree transaction
#[derive(Debug, Default, Clone)]
pub struct TreeChanges {
    pub nodes: HashMap<Hash, NodeChange>,
    pub root: Option<Hash>,
}

impl TreeChanges {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.root.is_none()
    }

    fn add(&mut self, key: Hash, node: &AccountsTreeNode, delta: i64) {
        self.nodes
            .entry(key)
            .or_insert_with(|| NodeChange {
                node: node.clone(),
                delta: 0,
            })
            .delta += delta;
    }
}

/// Reference count after applying `delta` to `current`, clamped at zero
fn adjusted(current: u32, delta: i64) -> u32 {
    let count = current as i64 + delta;
    if count < 0 {
        warn!("Tree node released more often than it was stored");
    }
    count.clamp(0, u32::MAX as i64) as u32
}

/// Content-addressed, reference-counted node storage behind an accounts tree.
///
/// Identical nodes in different subtrees share one key. Every `put` adds a
/// reference and every `remove` releases one; a node is dropped only when its
/// last reference is released.
pub trait TreeStore: Send + Sync {
    /// Get a node by its key
    fn get(&self, key: &Hash) -> Result<Option<AccountsTreeNode>, TreeError>;

    /// Number of references held on the node stored under `key`
    fn ref_count(&self, key: &Hash) -> Result<u32, TreeError>;

    /// Add a reference to `node`, storing it if needed, and return its key
    fn put(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError>;

    /// Release a reference to `node` and return its key
    fn remove(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError>;

    /// Key of the current root node
    fn root_key(&self) -> Result<Option<Hash>, TreeError>;

    fn set_root_key(&self, key: Hash) -> Result<(), TreeError>;

    /// Apply a set of changes atomically
    fn apply(&self, changes: TreeChanges) -> Result<(), TreeError>;
}

/// Tree store persisted in a key-value store
pub struct KvTreeStore {
    store: Arc<dyn KVStore>,
}

impl KvTreeStore {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self { store }
    }

    fn node_key(key: &Hash) -> Vec<u8> {
        format!("{}{}", NODE_KEY_PREFIX, key.to_hex()).into_bytes()
    }

    fn refs_key(key: &Hash) -> Vec<u8> {
        format!("{}{}", REFS_KEY_PREFIX, key.to_hex()).into_bytes()
    }

    /// Queue the writes that leave `node` with `count` references
    fn stage(batch: &mut Vec<WriteBatchOperation>, key: &Hash, node: &AccountsTreeNode, count: u32) {
        if count == 0 {
            batch.delete(Self::node_key(key));
            batch.delete(Self::refs_key(key));
        } else {
            batch.put(Self::node_key(key), node.to_bytes());
            batch.put(Self::refs_key(key), count.to_be_bytes().to_vec());
        }
    }

    fn update(&self, node: &AccountsTreeNode, delta: i64) -> Result<Hash, TreeError> {
        let key = node.hash();
        let count = adjusted(self.ref_count(&key)?, delta);

        let mut batch = Vec::with_capacity(2);
        Self::stage(&mut batch, &key, node, count);
        self.store.write_batch(batch)?;
        Ok(key)
    }
}

impl TreeStore for KvTreeStore {
    fn get(&self, key: &Hash) -> Result<Option<AccountsTreeNode>, TreeError> {
        match self.store.get(&Self::node_key(key))? {
            Some(bytes) => AccountsTreeNode::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| TreeError::Corrupt(*key, e)),
            None => Ok(None),
        }
    }

    fn ref_count(&self, key: &Hash) -> Result<u32, TreeError> {
        match self.store.get(&Self::refs_key(key))? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| TreeError::Corrupt(*key, CodecError::Malformed("reference count")))?;
                Ok(u32::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn put(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError> {
        self.update(node, 1)
    }

    fn remove(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError> {
        self.update(node, -1)
    }

    fn root_key(&self) -> Result<Option<Hash>, TreeError> {
        match self.store.get(ROOT_KEY)? {
            Some(bytes) => Hash::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| TreeError::Corrupt(Hash::zero(), e)),
            None => Ok(None),
        }
    }

    fn set_root_key(&self, key: Hash) -> Result<(), TreeError> {
        self.store.put(ROOT_KEY, key.as_bytes())?;
        Ok(())
    }

    fn apply(&self, changes: TreeChanges) -> Result<(), TreeError> {
        let mut batch = Vec::<WriteBatchOperation>::with_capacity(2 * changes.nodes.len() + 1);
        for (key, change) in changes.nodes {
            if change.delta == 0 {
                continue;
            }
            let count = adjusted(self.ref_count(&key)?, change.delta);
            Self::stage(&mut batch, &key, &change.node, count);
        }
        if let Some(root) = changes.root {
            batch.put(ROOT_KEY.to_vec(), root.as_bytes().to_vec());
        }

        trace!("Writing {} tree operations", batch.len());
        self.store.write_batch(batch)?;
        Ok(())
    }
}

struct StoredNode {
    node: AccountsTreeNode,
    refs: u32,
}

#[derive(Default)]
struct VolatileState {
    nodes: HashMap<Hash, StoredNode>,
    root: Option<Hash>,
}

impl VolatileState {
    fn update(&mut self, key: Hash, node: &AccountsTreeNode, delta: i64) {
        let current = self.nodes.get(&key).map_or(0, |stored| stored.refs);
        match adjusted(current, delta) {
            0 => {
                self.nodes.remove(&key);
            }
            refs => {
                self.nodes.insert(
                    key,
                    StoredNode {
                        node: node.clone(),
                        refs,
                    },
                );
            }
        }
    }
}

/// In-memory tree store
#[derive(Default)]
pub struct VolatileTreeStore {
    state: RwLock<VolatileState>,
}

impl VolatileTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored nodes
    pub fn len(&self) -> usize {
        self.state.read().map(|state| state.nodes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TreeStore for VolatileTreeStore {
    fn get(&self, key: &Hash) -> Result<Option<AccountsTreeNode>, TreeError> {
        let state = self.state.read().map_err(|_| TreeError::LockPoisoned)?;
        Ok(state.nodes.get(key).map(|stored| stored.node.clone()))
    }

    fn ref_count(&self, key: &Hash) -> Result<u32, TreeError> {
        let state = self.state.read().map_err(|_| TreeError::LockPoisoned)?;
        Ok(state.nodes.get(key).map_or(0, |stored| stored.refs))
    }

    fn put(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError> {
        let key = node.hash();
        let mut state = self.state.write().map_err(|_| TreeError::LockPoisoned)?;
        state.update(key, node, 1);
        Ok(key)
    }

    fn remove(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError> {
        let key = node.hash();
        let mut state = self.state.write().map_err(|_| TreeError::LockPoisoned)?;
        state.update(key, node, -1);
        Ok(key)
    }

    fn root_key(&self) -> Result<Option<Hash>, TreeError> {
        let state = self.state.read().map_err(|_| TreeError::LockPoisoned)?;
        Ok(state.root)
    }

    fn set_root_key(&self, key: Hash) -> Result<(), TreeError> {
        let mut state = self.state.write().map_err(|_| TreeError::LockPoisoned)?;
        state.root = Some(key);
        Ok(())
    }

    fn apply(&self, changes: TreeChanges) -> Result<(), TreeError> {
        let mut state = self.state.write().map_err(|_| TreeError::LockPoisoned)?;
        for (key, change) in changes.nodes {
            state.update(key, &change.node, change.delta);
        }
        if let Some(root) = changes.root {
            state.root = Some(root);
        }
        Ok(())
    }
}

/// Copy-on-write layer over another tree store.
///
/// Reference changes are buffered as deltas over the backend's counts. Reads
/// fall through to the backend for keys the overlay has not touched. Nothing
/// reaches the backend until [`OverlayTreeStore::commit`].
pub struct OverlayTreeStore {
    backend: Arc<dyn TreeStore>,
    changes: RwLock<TreeChanges>,
}

impl OverlayTreeStore {
    pub fn new(backend: Arc<dyn TreeStore>) -> Self {
        Self {
            backend,
            changes: RwLock::new(TreeChanges::default()),
        }
    }

    /// Hand all buffered changes to the backend in one atomic step
    pub fn commit(&self) -> Result<(), TreeError> {
        let changes = {
            let mut changes = self.changes.write().map_err(|_| TreeError::LockPoisoned)?;
            std::mem::take(&mut *changes)
        };
        if changes.is_empty() {
            return Ok(());
        }
        self.backend.apply(changes)
    }

    fn update(&self, node: &AccountsTreeNode, delta: i64) -> Result<Hash, TreeError> {
        let key = node.hash();
        let mut changes = self.changes.write().map_err(|_| TreeError::LockPoisoned)?;
        changes.add(key, node, delta);
        Ok(key)
    }
}

impl TreeStore for OverlayTreeStore {
    fn get(&self, key: &Hash) -> Result<Option<AccountsTreeNode>, TreeError> {
        let buffered = {
            let changes = self.changes.read().map_err(|_| TreeError::LockPoisoned)?;
            changes.nodes.get(key).cloned()
        };
        match buffered {
            Some(change) => {
                let refs = adjusted(self.backend.ref_count(key)?, change.delta);
                Ok((refs > 0).then_some(change.node))
            }
            None => self.backend.get(key),
        }
    }

    fn ref_count(&self, key: &Hash) -> Result<u32, TreeError> {
        let delta = {
            let changes = self.changes.read().map_err(|_| TreeError::LockPoisoned)?;
            changes.nodes.get(key).map_or(0, |change| change.delta)
        };
        Ok(adjusted(self.backend.ref_count(key)?, delta))
    }

    fn put(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError> {
        self.update(node, 1)
    }

    fn remove(&self, node: &AccountsTreeNode) -> Result<Hash, TreeError> {
        self.update(node, -1)
    }

    fn root_key(&self) -> Result<Option<Hash>, TreeError> {
        {
            let changes = self.changes.read().map_err(|_| TreeError::LockPoisoned)?;
            if let Some(root) = changes.root {
                return Ok(Some(root));
            }
        }
        self.backend.root_key()
    }

    fn set_root_key(&self, key: Hash) -> Result<(), TreeError> {
        let mut changes = self.changes.write().map_err(|_| TreeError::LockPoisoned)?;
        changes.root = Some(key);
        Ok(())
    }

    // A nested overlay commits into this one
    fn apply(&self, incoming: TreeChanges) -> Result<(), TreeError> {
        let mut changes = self.changes.write().map_err(|_| TreeError::LockPoisoned)?;
        for (key, change) in incoming.nodes {
            changes.add(key, &change.node, change.delta);
        }
        if incoming.root.is_some() {
            changes.root = incoming.root;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::{Account, Balance};
    use crate::storage::kv_store::MemoryStore;

    fn terminal(prefix: &str, value: u64) -> AccountsTreeNode {
        AccountsTreeNode::terminal(prefix, Account::new(Balance::new(value, 0)))
    }

    #[test]
    fn test_kv_tree_store() {
        let kv = Arc::new(MemoryStore::new());
        let store = KvTreeStore::new(kv.clone());

        let node = terminal("abc", 10);
        let key = store.put(&node).unwrap();
        assert_eq!(key, node.hash());
        assert_eq!(store.get(&key).unwrap(), Some(node.clone()));
        assert!(kv.exists(format!("accounts:{}", key.to_hex()).as_bytes()).unwrap());

        store.set_root_key(key).unwrap();
        assert_eq!(store.root_key().unwrap(), Some(key));

        store.remove(&node).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_kv_tree_store_reports_corruption() {
        let kv = Arc::new(MemoryStore::new());
        let store = KvTreeStore::new(kv.clone());

        let key = Hash::light(b"garbage");
        kv.put(format!("accounts:{}", key.to_hex()).as_bytes(), &[0x07]).unwrap();
        assert!(matches!(store.get(&key), Err(TreeError::Corrupt(k, _)) if k == key));
    }

    /// Store `node` twice and release it twice, checking it survives the first release
    fn assert_shared_node_lifetime(store: &dyn TreeStore) {
        let node = terminal("1111", 5);
        let key = store.put(&node).unwrap();
        assert_eq!(store.put(&node).unwrap(), key);
        assert_eq!(store.ref_count(&key).unwrap(), 2);

        store.remove(&node).unwrap();
        assert_eq!(store.ref_count(&key).unwrap(), 1);
        assert_eq!(store.get(&key).unwrap(), Some(node.clone()));

        store.remove(&node).unwrap();
        assert_eq!(store.ref_count(&key).unwrap(), 0);
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_shared_node_survives_single_release() {
        assert_shared_node_lifetime(&VolatileTreeStore::new());

        let kv = Arc::new(MemoryStore::new());
        assert_shared_node_lifetime(&KvTreeStore::new(kv.clone()));
        assert!(kv.is_empty());

        let backend = Arc::new(VolatileTreeStore::new());
        assert_shared_node_lifetime(&OverlayTreeStore::new(backend.clone()));
        assert!(backend.is_empty());
    }

    #[test]
    fn test_overlay_release_keeps_shared_backend_node() {
        let backend = Arc::new(KvTreeStore::new(Arc::new(MemoryStore::new())));
        let shared = terminal("2222", 5);
        let key = backend.put(&shared).unwrap();
        backend.put(&shared).unwrap();

        let overlay = OverlayTreeStore::new(backend.clone());
        overlay.remove(&shared).unwrap();
        assert_eq!(overlay.get(&key).unwrap(), Some(shared.clone()));
        overlay.commit().unwrap();

        assert_eq!(backend.ref_count(&key).unwrap(), 1);
        assert_eq!(backend.get(&key).unwrap(), Some(shared.clone()));

        let overlay = OverlayTreeStore::new(backend.clone());
        overlay.remove(&shared).unwrap();
        assert_eq!(overlay.get(&key).unwrap(), None);
        overlay.commit().unwrap();
        assert_eq!(backend.get(&key).unwrap(), None);
    }

    #[test]
    fn test_overlay_isolation_and_commit() {
        let backend = Arc::new(VolatileTreeStore::new());
        let existing = terminal("01", 1);
        let existing_key = backend.put(&existing).unwrap();
        backend.set_root_key(existing_key).unwrap();

        let overlay = OverlayTreeStore::new(backend.clone());
        let added = terminal("02", 2);
        let added_key = overlay.put(&added).unwrap();
        overlay.remove(&existing).unwrap();
        overlay.set_root_key(added_key).unwrap();

        // Visible through the overlay only
        assert_eq!(overlay.get(&added_key).unwrap(), Some(added.clone()));
        assert_eq!(overlay.get(&existing_key).unwrap(), None);
        assert_eq!(backend.get(&added_key).unwrap(), None);
        assert_eq!(backend.get(&existing_key).unwrap(), Some(existing));
        assert_eq!(backend.root_key().unwrap(), Some(existing_key));

        overlay.commit().unwrap();
        assert_eq!(backend.get(&added_key).unwrap(), Some(added));
        assert_eq!(backend.get(&existing_key).unwrap(), None);
        assert_eq!(backend.root_key().unwrap(), Some(added_key));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_nested_overlay_commits_into_parent() {
        let backend = Arc::new(VolatileTreeStore::new());
        let outer = Arc::new(OverlayTreeStore::new(backend.clone()));
        let inner = OverlayTreeStore::new(outer.clone());

        let node = terminal("0a", 3);
        let key = inner.put(&node).unwrap();
        inner.commit().unwrap();

        assert_eq!(outer.get(&key).unwrap(), Some(node));
        assert_eq!(backend.get(&key).unwrap(), None);
    }
}
