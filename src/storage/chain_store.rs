use std::sync::Arc;

use crate::codec::{BinaryCodec, CodecError, SerialReader};
use crate::core::block::Block;
use crate::crypto::hash::Hash;
use crate::storage::kv_store::{KVStore, KVStoreError, MemoryStore};

/// Key prefix of chain entries
const CHAIN_KEY_PREFIX: &str = "blocks:";

/// Key holding the hash of the main chain head
const MAIN_KEY: &[u8] = b"blocks:main";

/// Error type for chain entry storage
#[derive(Debug, thiserror::Error)]
pub enum ChainStoreError {
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),

    /// A stored entry could not be decoded
    #[error("Corrupt chain entry {0}: {1}")]
    Corrupt(Hash, CodecError),

    /// The main chain key points at a missing entry
    #[error("Main chain entry {0} missing")]
    MissingMain(Hash),
}

/// A block together with the cumulative work and height of the chain it ends
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub head: Block,
    pub total_work: f64,
    pub height: u32,
}

impl Chain {
    pub fn new(head: Block, total_work: f64, height: u32) -> Self {
        Self {
            head,
            total_work,
            height,
        }
    }

    pub fn hash(&self) -> Hash {
        self.head.hash()
    }
}

impl BinaryCodec for Chain {
    fn encode(&self, out: &mut Vec<u8>) {
        self.head.encode(out);
        out.extend_from_slice(&self.total_work.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let head = Block::decode(reader)?;
        let total_work = reader.read_f64()?;
        let height = reader.read_u32()?;
        Ok(Self {
            head,
            total_work,
            height,
        })
    }

    fn encoded_size(&self) -> usize {
        self.head.encoded_size() + 8 + 4
    }
}

/// Chain entries keyed by block hash, plus the main chain pointer
pub struct ChainStore {
    store: Arc<dyn KVStore>,
}

impl ChainStore {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self { store }
    }

    /// Chain store held in memory
    pub fn volatile() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn chain_key(hash: &Hash) -> Vec<u8> {
        format!("{}{}", CHAIN_KEY_PREFIX, hash.to_hex()).into_bytes()
    }

    pub fn get(&self, hash: &Hash) -> Result<Option<Chain>, ChainStoreError> {
        match self.store.get(&Self::chain_key(hash))? {
            Some(bytes) => Chain::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| ChainStoreError::Corrupt(*hash, e)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: &Hash) -> Result<bool, ChainStoreError> {
        Ok(self.store.exists(&Self::chain_key(hash))?)
    }

    /// Store `chain` under the hash of its head
    pub fn put(&self, chain: &Chain) -> Result<Hash, ChainStoreError> {
        let hash = chain.hash();
        self.store.put(&Self::chain_key(&hash), &chain.to_bytes())?;
        Ok(hash)
    }

    pub fn remove(&self, hash: &Hash) -> Result<(), ChainStoreError> {
        self.store.delete(&Self::chain_key(hash))?;
        Ok(())
    }

    /// Entry of the main chain head, if one was recorded
    pub fn get_main_chain(&self) -> Result<Option<Chain>, ChainStoreError> {
        let bytes = match self.store.get(MAIN_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let hash = Hash::from_bytes(&bytes).map_err(|e| ChainStoreError::Corrupt(Hash::zero(), e))?;
        match self.get(&hash)? {
            Some(chain) => Ok(Some(chain)),
            None => Err(ChainStoreError::MissingMain(hash)),
        }
    }

    pub fn set_main_chain(&self, hash: &Hash) -> Result<(), ChainStoreError> {
        self.store.put(MAIN_KEY, hash.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{BlockBody, BlockHeader};
    use crate::crypto::keys::Address;
    use tempfile::tempdir;

    use crate::storage::kv_store::RocksDBStore;

    fn create_test_chain(height: u32) -> Chain {
        let body = BlockBody::new(Address::new([height as u8; 20]), vec![]);
        let header = BlockHeader::new(Hash::zero(), body.hash(), Hash::zero(), 0x1f00ffff, height, 100, 0);
        Chain::new(Block::new(header, body), 2.5 * height as f64, height)
    }

    #[test]
    fn test_chain_codec() {
        let chain = create_test_chain(3);
        let bytes = chain.to_bytes();
        assert_eq!(bytes.len(), chain.encoded_size());
        assert_eq!(&bytes[bytes.len() - 12..bytes.len() - 4], &7.5f64.to_be_bytes());
        assert_eq!(Chain::from_bytes(&bytes).unwrap(), chain);
    }

    #[test]
    fn test_main_chain_pointer() {
        let store = ChainStore::volatile();
        assert!(store.get_main_chain().unwrap().is_none());

        let chain = create_test_chain(1);
        let hash = store.put(&chain).unwrap();
        store.set_main_chain(&hash).unwrap();

        assert_eq!(store.get_main_chain().unwrap(), Some(chain));
        assert!(store.contains(&hash).unwrap());

        store.remove(&hash).unwrap();
        assert!(matches!(store.get_main_chain(), Err(ChainStoreError::MissingMain(h)) if h == hash));
    }

    #[test]
    fn test_persistent_chain_store() {
        let temp_dir = tempdir().unwrap();
        let chain = create_test_chain(2);
        let hash;

        {
            let store = ChainStore::new(Arc::new(RocksDBStore::new(temp_dir.path()).unwrap()));
            hash = store.put(&chain).unwrap();
            store.set_main_chain(&hash).unwrap();
        }

        // Reopen
        let store = ChainStore::new(Arc::new(RocksDBStore::new(temp_dir.path()).unwrap()));
        assert_eq!(store.get_main_chain().unwrap().map(|c| c.hash()), Some(hash));
    }
}
