use log::{debug, error};
use std::marker::PhantomData;
use std::sync::Arc;

use super::node::{common_prefix_len, AccountsTreeNode};
use super::store::{KvTreeStore, OverlayTreeStore, TreeError, TreeStore, VolatileTreeStore};
use crate::core::account::Account;
use crate::crypto::hash::Hash;
use crate::crypto::keys::Address;
use crate::storage::kv_store::KVStore;

/// Merkle radix tree mapping addresses to accounts.
///
/// Keys are the 40 hex nibbles of an address. The hash of the root node commits
/// to the whole ledger. Mutating methods take `&mut self`, so a tree instance
/// applies at most one change at a time.
pub struct AccountsTree {
    store: Arc<dyn TreeStore>,
}

impl AccountsTree {
    /// Open a tree over `store`, creating the empty root if none exists
    pub fn new(store: Arc<dyn TreeStore>) -> Result<Self, TreeError> {
        if store.root_key()?.is_none() {
            let root_key = store.put(&AccountsTreeNode::empty_root())?;
            store.set_root_key(root_key)?;
        }
        Ok(Self { store })
    }

    /// Tree persisted in a key-value store
    pub fn persistent(kv: Arc<dyn KVStore>) -> Result<Self, TreeError> {
        Self::new(Arc::new(KvTreeStore::new(kv)))
    }

    /// Tree held in memory
    pub fn volatile() -> Result<Self, TreeError> {
        Self::new(Arc::new(VolatileTreeStore::new()))
    }

    /// Speculative tree layered over this one. Its changes are never written
    /// back.
    pub fn temporary(&self) -> Result<Self, TreeError> {
        Self::new(Arc::new(OverlayTreeStore::new(self.store.clone())))
    }

    /// Start an isolated transaction over this tree. The tree stays
    /// borrowed until the transaction is committed or dropped.
    pub fn transaction(&mut self) -> Result<TreeTransaction<'_>, TreeError> {
        let overlay = Arc::new(OverlayTreeStore::new(self.store.clone()));
        let tree = Self::new(overlay.clone())?;
        Ok(TreeTransaction {
            tree,
            overlay,
            _base: PhantomData,
        })
    }

    /// Current root hash
    pub fn root(&self) -> Result<Hash, TreeError> {
        self.store.root_key()?.ok_or(TreeError::MissingRoot)
    }

    fn root_node(&self) -> Result<AccountsTreeNode, TreeError> {
        let root_key = self.root()?;
        self.fetch(&root_key)
    }

    fn fetch(&self, key: &Hash) -> Result<AccountsTreeNode, TreeError> {
        self.store.get(key)?.ok_or(TreeError::MissingNode(*key))
    }

    /// Look up the account stored for `address`
    pub fn get(&self, address: &Address) -> Result<Option<Account>, TreeError> {
        let mut node = self.root_node()?;
        let path = address.to_hex();
        let mut remaining: &str = &path;

        loop {
            // The address is not in this subtree unless the whole node prefix matches
            let common = common_prefix_len(node.prefix(), remaining);
            if common != node.prefix().len() {
                return Ok(None);
            }
            remaining = &remaining[common..];

            if remaining.is_empty() {
                return Ok(node.account().copied());
            }

            match node.child(remaining) {
                Some(child_key) => node = self.fetch(&child_key)?,
                None => return Ok(None),
            }
        }
    }

    /// Store `account` under `address`. Storing the initial account removes
    /// the address.
    pub fn put(&mut self, address: &Address, account: Account) -> Result<(), TreeError> {
        if account.is_initial() && self.get(address)?.is_none() {
            return Ok(());
        }

        let root = self.root_node()?;
        self.insert(root, address.to_hex(), account)?;
        Ok(())
    }

    fn insert(&self, root: AccountsTreeNode, path: String, account: Account) -> Result<Hash, TreeError> {
        let mut node = root;
        let mut remaining = path;
        let mut root_path: Vec<AccountsTreeNode> = Vec::new();

        loop {
            let common = common_prefix_len(node.prefix(), &remaining);
            let common_prefix = remaining[..common].to_string();
            remaining = remaining[common..].to_string();

            // Node prefix diverges from the address: split it under a new branch
            if common != node.prefix().len() {
                self.store.remove(&node)?;
                let moved = node.with_prefix(&node.prefix()[common..]);
                let moved_key = self.store.put(&moved)?;

                let new_child = AccountsTreeNode::terminal(remaining, account);
                let new_child_key = self.store.put(&new_child)?;

                let parent = AccountsTreeNode::empty_root()
                    .with_prefix(common_prefix)
                    .with_child(moved.prefix(), moved_key)
                    .with_child(new_child.prefix(), new_child_key);
                let parent_key = self.store.put(&parent)?;

                return self.update_keys(parent.prefix(), parent_key, root_path);
            }

            // Full match: replace the account in place
            if remaining.is_empty() {
                self.store.remove(&node)?;

                if account.is_initial() {
                    return self.prune(node.prefix(), root_path);
                }

                let updated = node.with_account(account);
                let updated_key = self.store.put(&updated)?;
                return self.update_keys(updated.prefix(), updated_key, root_path);
            }

            if let Some(child_key) = node.child(&remaining) {
                let child = self.fetch(&child_key)?;
                root_path.push(node);
                node = child;
                continue;
            }

            // No child for the next nibble: attach a new terminal
            let new_child = AccountsTreeNode::terminal(remaining, account);
            let new_child_key = self.store.put(&new_child)?;

            self.store.remove(&node)?;
            let updated = node.with_child(new_child.prefix(), new_child_key);
            let updated_key = self.store.put(&updated)?;
            return self.update_keys(updated.prefix(), updated_key, root_path);
        }
    }

    /// Remove the child at `prefix` from the deepest node of `root_path` and
    /// collapse branches left with a single child. The root is never merged.
    fn prune(&self, prefix: &str, mut root_path: Vec<AccountsTreeNode>) -> Result<Hash, TreeError> {
        let root_key = self.root()?;
        let mut prefix = prefix.to_string();

        while let Some(node) = root_path.pop() {
            let node_key = self.store.remove(&node)?;
            let node = node.without_child(&prefix);

            if node.has_single_child() && node_key != root_key {
                let child_key = node.first_child().ok_or(TreeError::MissingNode(node_key))?;
                let child = self.fetch(&child_key)?;
                self.store.remove(&child)?;

                let merged = child.with_prefix(format!("{}{}", node.prefix(), child.prefix()));
                let merged_key = self.store.put(&merged)?;
                return self.update_keys(merged.prefix(), merged_key, root_path);
            }

            if node.has_children() || node_key == root_key {
                let updated_key = self.store.put(&node)?;
                return self.update_keys(node.prefix(), updated_key, root_path);
            }

            // Branch is empty now, keep walking up
            prefix = node.prefix().to_string();
        }

        // The root is always on the path, so it is handled above
        Err(TreeError::MissingRoot)
    }

    /// Rewrite every ancestor on `root_path` to reference the new child key
    fn update_keys(
        &self,
        prefix: &str,
        key: Hash,
        mut root_path: Vec<AccountsTreeNode>,
    ) -> Result<Hash, TreeError> {
        let mut prefix = prefix.to_string();
        let mut key = key;

        while let Some(node) = root_path.pop() {
            self.store.remove(&node)?;
            let updated = node.with_child(&prefix, key);
            key = self.store.put(&updated)?;
            prefix = updated.prefix().to_string();
        }

        self.store.set_root_key(key)?;
        Ok(key)
    }

    /// Replace the tree with a complete node set. The first node becomes the
    /// root. Shared nodes are listed once per parent, as `export` returns them.
    pub fn populate(&mut self, nodes: &[AccountsTreeNode]) -> Result<(), TreeError> {
        let root = nodes.first().ok_or(TreeError::MissingRoot)?;
        let root_key = root.hash();

        self.release(self.root()?)?;
        for node in nodes {
            self.store.put(node)?;
        }

        self.store.set_root_key(root_key)
    }

    /// Check that every node is reachable, well placed and correctly typed
    pub fn verify(&self) -> Result<bool, TreeError> {
        let root = self.root_node()?;
        if !root.is_branch() {
            error!("Root node is not a branch");
            return Ok(false);
        }
        self.verify_node(&root)
    }

    fn verify_node(&self, node: &AccountsTreeNode) -> Result<bool, TreeError> {
        for (index, child_key) in node.children() {
            let child = match self.store.get(&child_key)? {
                Some(child) => child,
                None => {
                    error!("No subnode for hash {}", child_key);
                    return Ok(false);
                }
            };

            let nibble = child.prefix().chars().next().and_then(|c| c.to_digit(16));
            if nibble != Some(index as u32) {
                error!(
                    "First nibble of child node {} does not match its position {} in the parent",
                    child_key, index
                );
                return Ok(false);
            }

            if !self.verify_node(&child)? {
                error!("Verification of child {} failed", index);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Remove every node reachable from the root and reset to the empty tree
    pub fn clear(&mut self) -> Result<(), TreeError> {
        let removed = self.release(self.root()?)?;

        let empty_key = self.store.put(&AccountsTreeNode::empty_root())?;
        self.store.set_root_key(empty_key)?;
        debug!("Cleared {} tree nodes", removed);
        Ok(())
    }

    /// Drop one reference for every node occurrence below `key`.
    /// A shared child is reached once per parent, matching how it was stored.
    fn release(&self, key: Hash) -> Result<usize, TreeError> {
        let mut pending = vec![key];
        let mut released = 0usize;

        while let Some(key) = pending.pop() {
            if let Some(node) = self.store.get(&key)? {
                self.store.remove(&node)?;
                released += 1;
                pending.extend(node.children().into_iter().map(|(_, child)| child));
            }
        }
        Ok(released)
    }

    /// All nodes in depth-first order, root first
    pub fn export(&self) -> Result<Vec<AccountsTreeNode>, TreeError> {
        let mut nodes = Vec::new();
        self.export_node(self.root()?, &mut nodes)?;
        Ok(nodes)
    }

    fn export_node(&self, key: Hash, nodes: &mut Vec<AccountsTreeNode>) -> Result<(), TreeError> {
        let node = self.fetch(&key)?;
        let children = node.children();
        nodes.push(node);
        for (_, child_key) in children {
            self.export_node(child_key, nodes)?;
        }
        Ok(())
    }
}

/// Isolated, all-or-nothing change set over an [`AccountsTree`].
///
/// Dropping the transaction without calling [`TreeTransaction::commit`]
/// leaves the underlying tree untouched.
pub struct TreeTransaction<'a> {
    tree: AccountsTree,
    overlay: Arc<OverlayTreeStore>,
    _base: PhantomData<&'a mut AccountsTree>,
}

impl TreeTransaction<'_> {
    pub fn get(&self, address: &Address) -> Result<Option<Account>, TreeError> {
        self.tree.get(address)
    }

    pub fn put(&mut self, address: &Address, account: Account) -> Result<(), TreeError> {
        self.tree.put(address, account)
    }

    pub fn populate(&mut self, nodes: &[AccountsTreeNode]) -> Result<(), TreeError> {
        self.tree.populate(nodes)
    }

    pub fn clear(&mut self) -> Result<(), TreeError> {
        self.tree.clear()
    }

    pub fn verify(&self) -> Result<bool, TreeError> {
        self.tree.verify()
    }

    /// Root hash including the buffered changes
    pub fn root(&self) -> Result<Hash, TreeError> {
        self.tree.root()
    }

    /// Apply all buffered changes to the underlying tree atomically
    pub fn commit(self) -> Result<(), TreeError> {
        self.overlay.commit()
    }
}
