use dashmap::DashMap;
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::RwLock;

/// Error type for KVStore operations
#[derive(Debug, thiserror::Error)]
pub enum KVStoreError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// RocksDB error
    #[error("RocksDB error: {0}")]
    RocksDBError(String),

    /// Batch operation failed
    #[error("Batch operation failed: {0}")]
    BatchOperationFailed(String),

    /// A lock guarding the store was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<rocksdb::Error> for KVStoreError {
    fn from(err: rocksdb::Error) -> Self {
        KVStoreError::RocksDBError(err.to_string())
    }
}

/// Write batch operation for atomic updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteBatchOperation {
    /// Put operation
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete operation
    Delete { key: Vec<u8> },
}

/// Extension trait for Vec<WriteBatchOperation>
pub trait WriteBatchOperationExt {
    /// Add a put operation to the batch
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Add a delete operation to the batch
    fn delete(&mut self, key: Vec<u8>);
}

impl WriteBatchOperationExt for Vec<WriteBatchOperation> {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.push(WriteBatchOperation::Put { key, value });
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.push(WriteBatchOperation::Delete { key });
    }
}

/// Key-value store trait
pub trait KVStore: Send + Sync {
    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Delete a key-value pair
    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Write a batch of operations atomically
    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError>;

    /// Flush any pending writes to disk
    fn flush(&self) -> Result<(), KVStoreError>;
}

/// RocksDB implementation of KVStore
pub struct RocksDBStore {
    /// RocksDB instance
    db: DB,
}

impl RocksDBStore {
    /// Open or create a database at `path`
    pub fn new(path: &Path) -> Result<Self, KVStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to open RocksDB: {}", e)))?;
        Ok(Self { db })
    }
}

impl KVStore for RocksDBStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.db
            .put(key, value)
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to put key: {}", e)))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.db
            .get(key)
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to get key: {}", e)))
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.db
            .delete(key)
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to delete key: {}", e)))
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        let mut batch = WriteBatch::default();

        for op in operations {
            match op {
                WriteBatchOperation::Put { key, value } => batch.put(&key, &value),
                WriteBatchOperation::Delete { key } => batch.delete(&key),
            }
        }

        self.db
            .write(batch)
            .map_err(|e| KVStoreError::BatchOperationFailed(format!("Failed to write batch: {}", e)))
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        self.db
            .flush()
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to flush: {}", e)))
    }
}

/// In-memory implementation of KVStore.
///
/// Batches hold the write side of `batch_lock` so readers never observe half
/// of a batch.
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<Vec<u8>, Vec<u8>>,
    batch_lock: RwLock<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KVStore for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        let _guard = self.batch_lock.read().map_err(|_| KVStoreError::LockPoisoned)?;
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        let _guard = self.batch_lock.read().map_err(|_| KVStoreError::LockPoisoned)?;
        Ok(self.data.get(key).map(|value| value.value().clone()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        let _guard = self.batch_lock.read().map_err(|_| KVStoreError::LockPoisoned)?;
        self.data.remove(key);
        Ok(())
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        let _guard = self.batch_lock.write().map_err(|_| KVStoreError::LockPoisoned)?;
        for op in operations {
            match op {
                WriteBatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                WriteBatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn check_basic_operations(store: &dyn KVStore) {
        // Test put and get
        let key = b"test_key";
        let value = b"test_value";
        store.put(key, value).unwrap();
        assert_eq!(store.get(key).unwrap(), Some(value.to_vec()));

        // Test exists
        assert!(store.exists(key).unwrap());
        assert!(!store.exists(b"nonexistent_key").unwrap());

        // Test delete
        store.delete(key).unwrap();
        assert_eq!(store.get(key).unwrap(), None);
    }

    fn check_batch(store: &dyn KVStore) {
        let mut batch = Vec::new();
        batch.put(b"prefix:2".to_vec(), b"value2".to_vec());
        batch.put(b"prefix:1".to_vec(), b"value1".to_vec());
        batch.put(b"other:1".to_vec(), b"other1".to_vec());
        store.write_batch(batch).unwrap();

        let mut batch = Vec::new();
        batch.delete(b"prefix:2".to_vec());
        batch.put(b"prefix:3".to_vec(), b"value3".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"prefix:1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"prefix:2").unwrap(), None);
        assert_eq!(store.get(b"prefix:3").unwrap(), Some(b"value3".to_vec()));
        assert_eq!(store.get(b"other:1").unwrap(), Some(b"other1".to_vec()));
    }

    #[test]
    fn test_rocksdb_store() {
        let temp_dir = tempdir().unwrap();
        let store = RocksDBStore::new(temp_dir.path()).unwrap();
        check_basic_operations(&store);
        check_batch(&store);
        store.flush().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        check_basic_operations(&store);
        check_batch(&store);
        assert_eq!(store.len(), 3);
    }
}
