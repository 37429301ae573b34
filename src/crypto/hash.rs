use sha2::{Digest, Sha256};
use std::fmt;

use crate::codec::{BinaryCodec, CodecError, SerialReader};

/// Size of a hash in bytes
pub const HASH_SIZE: usize = 32;

/// Compute SHA-256 hash of data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// A 32-byte content hash.
///
/// Ordering is byte-lexicographic, which equals the ordering of the hashes read
/// as big-endian unsigned integers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Create a new hash from bytes
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash, used as the predecessor of the genesis block
    pub const fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    /// Light hash, used for content addressing and identities
    pub fn light(data: &[u8]) -> Self {
        Self(sha256(data))
    }

    /// Hard hash, used for proof-of-work
    pub fn hard(data: &[u8]) -> Self {
        Self(sha256(data))
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s).map_err(|_| CodecError::Malformed("hash"))?;
        let bytes: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|_| CodecError::Malformed("hash"))?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl BinaryCodec for Hash {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        Ok(Self(reader.read_array()?))
    }

    fn encoded_size(&self) -> usize {
        HASH_SIZE
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
