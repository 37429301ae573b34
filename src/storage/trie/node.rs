use once_cell::sync::Lazy;

use crate::codec::{write_var_string, BinaryCodec, CodecError, SerialReader};
use crate::core::account::Account;
use crate::crypto::hash::{Hash, HASH_SIZE};

/// Type tag of a branch node
pub const NODE_TYPE_BRANCH: u8 = 0x00;

/// Type tag of a terminal node
pub const NODE_TYPE_TERMINAL: u8 = 0xff;

/// Number of children of a branch, one per hex nibble
pub const BRANCH_WIDTH: usize = 16;

/// Length of an address key in nibbles
pub const KEY_NIBBLES: usize = 40;

/// Root hash of a tree that holds no accounts
pub static EMPTY_TREE_HASH: Lazy<Hash> = Lazy::new(|| AccountsTreeNode::empty_root().hash());

/// Node of the accounts tree.
///
/// Children are referenced by the hash of their serialization, so a node never
/// owns its subtree. Nodes are never changed once stored; every structural
/// change builds new nodes with the `with_*` helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountsTreeNode {
    /// Inner node with up to 16 children indexed by the next nibble
    Branch {
        prefix: String,
        children: [Option<Hash>; BRANCH_WIDTH],
    },

    /// Leaf holding the account stored under the full path
    Terminal { prefix: String, account: Account },
}

/// Slot of the child whose prefix starts with the first nibble of `prefix`
pub fn child_index(prefix: &str) -> Option<usize> {
    prefix
        .chars()
        .next()
        .and_then(|c| c.to_digit(16))
        .map(|digit| digit as usize)
}

/// Length in bytes of the longest common prefix of two hex strings
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

impl AccountsTreeNode {
    pub fn branch(prefix: impl Into<String>, children: [Option<Hash>; BRANCH_WIDTH]) -> Self {
        AccountsTreeNode::Branch {
            prefix: prefix.into(),
            children,
        }
    }

    pub fn terminal(prefix: impl Into<String>, account: Account) -> Self {
        AccountsTreeNode::Terminal {
            prefix: prefix.into(),
            account,
        }
    }

    /// The childless root branch of an empty tree
    pub fn empty_root() -> Self {
        Self::branch("", [None; BRANCH_WIDTH])
    }

    pub fn prefix(&self) -> &str {
        match self {
            AccountsTreeNode::Branch { prefix, .. } => prefix,
            AccountsTreeNode::Terminal { prefix, .. } => prefix,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, AccountsTreeNode::Branch { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountsTreeNode::Terminal { .. })
    }

    pub fn account(&self) -> Option<&Account> {
        match self {
            AccountsTreeNode::Terminal { account, .. } => Some(account),
            AccountsTreeNode::Branch { .. } => None,
        }
    }

    /// Child referenced by the first nibble of `prefix`
    pub fn child(&self, prefix: &str) -> Option<Hash> {
        match self {
            AccountsTreeNode::Branch { children, .. } => {
                child_index(prefix).and_then(|index| children[index])
            }
            AccountsTreeNode::Terminal { .. } => None,
        }
    }

    /// Present children in nibble order
    pub fn children(&self) -> Vec<(usize, Hash)> {
        match self {
            AccountsTreeNode::Branch { children, .. } => children
                .iter()
                .enumerate()
                .filter_map(|(index, child)| child.map(|hash| (index, hash)))
                .collect(),
            AccountsTreeNode::Terminal { .. } => Vec::new(),
        }
    }

    pub fn child_count(&self) -> usize {
        match self {
            AccountsTreeNode::Branch { children, .. } => children.iter().flatten().count(),
            AccountsTreeNode::Terminal { .. } => 0,
        }
    }

    pub fn has_children(&self) -> bool {
        self.child_count() > 0
    }

    pub fn has_single_child(&self) -> bool {
        self.child_count() == 1
    }

    pub fn first_child(&self) -> Option<Hash> {
        self.children().first().map(|(_, hash)| *hash)
    }

    /// Copy of this node with `prefix` replaced
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        match self {
            AccountsTreeNode::Branch { children, .. } => Self::branch(prefix, *children),
            AccountsTreeNode::Terminal { account, .. } => Self::terminal(prefix, *account),
        }
    }

    /// Copy of this branch with the slot for `prefix` pointing at `child`.
    /// A terminal is returned unchanged.
    pub fn with_child(&self, prefix: &str, child: Hash) -> Self {
        self.with_slot(prefix, Some(child))
    }

    /// Copy of this branch with the slot for `prefix` cleared
    pub fn without_child(&self, prefix: &str) -> Self {
        self.with_slot(prefix, None)
    }

    fn with_slot(&self, prefix: &str, value: Option<Hash>) -> Self {
        let mut node = self.clone();
        if let AccountsTreeNode::Branch { children, .. } = &mut node {
            if let Some(index) = child_index(prefix) {
                children[index] = value;
            }
        }
        node
    }

    /// Terminal with this node's prefix holding `account`
    pub fn with_account(&self, account: Account) -> Self {
        Self::terminal(self.prefix(), account)
    }

    /// Content address of the node
    pub fn hash(&self) -> Hash {
        Hash::light(&self.to_bytes())
    }
}

impl BinaryCodec for AccountsTreeNode {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            AccountsTreeNode::Branch { prefix, children } => {
                out.push(NODE_TYPE_BRANCH);
                write_var_string(out, prefix);
                out.push(self.child_count() as u8);
                for (index, child) in children.iter().enumerate() {
                    if let Some(hash) = child {
                        out.push(index as u8);
                        hash.encode(out);
                    }
                }
            }
            AccountsTreeNode::Terminal { prefix, account } => {
                out.push(NODE_TYPE_TERMINAL);
                write_var_string(out, prefix);
                account.encode(out);
            }
        }
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let node_type = reader.read_u8()?;
        let prefix = reader.read_var_string()?;
        if prefix.len() > KEY_NIBBLES || !prefix.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(CodecError::Malformed("tree node prefix"));
        }

        match node_type {
            NODE_TYPE_TERMINAL => {
                let account = Account::decode(reader)?;
                Ok(Self::terminal(prefix, account))
            }
            NODE_TYPE_BRANCH => {
                let count = reader.read_u8()? as usize;
                if count > BRANCH_WIDTH {
                    return Err(CodecError::Malformed("tree node child count"));
                }

                let mut children = [None; BRANCH_WIDTH];
                for _ in 0..count {
                    let index = reader.read_u8()? as usize;
                    let hash = Hash::decode(reader)?;
                    if index >= BRANCH_WIDTH || children[index].is_some() {
                        return Err(CodecError::Malformed("tree node child index"));
                    }
                    children[index] = Some(hash);
                }
                Ok(Self::branch(prefix, children))
            }
            other => Err(CodecError::InvalidType("tree node", other)),
        }
    }

    fn encoded_size(&self) -> usize {
        let payload = match self {
            AccountsTreeNode::Branch { .. } => 1 + self.child_count() * (1 + HASH_SIZE),
            AccountsTreeNode::Terminal { account, .. } => account.encoded_size(),
        };
        1 + 1 + self.prefix().len() + payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::Balance;

    #[test]
    fn test_empty_tree_hash() {
        // Branch tag, empty prefix, zero children
        assert_eq!(AccountsTreeNode::empty_root().to_bytes(), vec![0x00, 0x00, 0x00]);
        assert_eq!(
            EMPTY_TREE_HASH.to_hex(),
            "709e80c88487a2411e1ee4dfb9f22a861492d20c4765150c0c794abd70f8147c"
        );
    }

    #[test]
    fn test_terminal_layout() {
        let node = AccountsTreeNode::terminal("ab", Account::new(Balance::new(5, 1)));
        let bytes = node.to_bytes();
        assert_eq!(&bytes[..4], &[0xff, 2, b'a', b'b']);
        assert_eq!(bytes.len(), node.encoded_size());
        assert_eq!(AccountsTreeNode::from_bytes(&bytes).unwrap(), node);
    }

    #[test]
    fn test_branch_children() {
        let a = Hash::light(b"a");
        let f = Hash::light(b"f");
        let node = AccountsTreeNode::branch("1", [None; BRANCH_WIDTH])
            .with_child("a0", a)
            .with_child("f9", f);

        assert_eq!(node.child("a"), Some(a));
        assert_eq!(node.child("fff"), Some(f));
        assert_eq!(node.child("0"), None);
        assert_eq!(node.children(), vec![(10, a), (15, f)]);

        let pruned = node.without_child("a");
        assert!(pruned.has_single_child());
        assert_eq!(pruned.first_child(), Some(f));

        // The original is untouched
        assert_eq!(node.child_count(), 2);

        let bytes = node.to_bytes();
        assert_eq!(bytes.len(), 1 + 2 + 1 + 2 * 33);
        assert_eq!(AccountsTreeNode::from_bytes(&bytes).unwrap(), node);
    }

    #[test]
    fn test_decode_rejects_malformed_nodes() {
        assert_eq!(
            AccountsTreeNode::from_bytes(&[0x01, 0x00]),
            Err(CodecError::InvalidType("tree node", 0x01))
        );
        assert_eq!(
            AccountsTreeNode::from_bytes(&[0x00, 0x01, b'G', 0x00]),
            Err(CodecError::Malformed("tree node prefix"))
        );

        let mut bytes = vec![0x00, 0x00, 0x01, 16];
        bytes.extend_from_slice(&[0u8; 32]);
        assert_eq!(
            AccountsTreeNode::from_bytes(&bytes),
            Err(CodecError::Malformed("tree node child index"))
        );
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len("abcd", "abef"), 2);
        assert_eq!(common_prefix_len("", "abef"), 0);
        assert_eq!(common_prefix_len("ab", "ab"), 2);
    }
}
