use std::fmt;

use crate::codec::{BinaryCodec, CodecError, SerialReader};
use crate::core::transaction::Transaction;
use crate::crypto::hash::{Hash, HASH_SIZE};
use crate::crypto::keys::{Address, ADDRESS_SIZE};

/// Current block header format version
pub const BLOCK_VERSION: u16 = 1;

/// Size of a serialized header
pub const BLOCK_HEADER_SIZE: usize = 2 + 3 * HASH_SIZE + 4 + 4 + 4 + 8;

/// Block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u16,

    /// Hash of the predecessor header
    pub prev_hash: Hash,

    /// Merkle root of the body
    pub body_hash: Hash,

    /// Root of the accounts tree after applying this block
    pub accounts_hash: Hash,

    /// Compact proof-of-work target
    pub n_bits: u32,

    pub height: u32,

    /// Seconds since the Unix epoch
    pub timestamp: u32,

    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(
        prev_hash: Hash,
        body_hash: Hash,
        accounts_hash: Hash,
        n_bits: u32,
        height: u32,
        timestamp: u32,
        nonce: u64,
    ) -> Self {
        Self {
            version: BLOCK_VERSION,
            prev_hash,
            body_hash,
            accounts_hash,
            n_bits,
            height,
            timestamp,
            nonce,
        }
    }

    /// Block identity
    pub fn hash(&self) -> Hash {
        Hash::light(&self.to_bytes())
    }

    /// Hash compared against the target
    pub fn pow_hash(&self) -> Hash {
        Hash::hard(&self.to_bytes())
    }
}

impl BinaryCodec for BlockHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        self.prev_hash.encode(out);
        self.body_hash.encode(out);
        self.accounts_hash.encode(out);
        out.extend_from_slice(&self.n_bits.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let version = reader.read_u16()?;
        if version != BLOCK_VERSION {
            return Err(CodecError::UnsupportedVersion("block", version));
        }

        Ok(Self {
            version,
            prev_hash: Hash::decode(reader)?,
            body_hash: Hash::decode(reader)?,
            accounts_hash: Hash::decode(reader)?,
            n_bits: reader.read_u32()?,
            height: reader.read_u32()?,
            timestamp: reader.read_u32()?,
            nonce: reader.read_u64()?,
        })
    }

    fn encoded_size(&self) -> usize {
        BLOCK_HEADER_SIZE
    }
}

/// Block body: the miner's address followed by the included transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBody {
    pub miner: Address,
    pub transactions: Vec<Transaction>,
}

/// Leaf of the body merkle tree
enum MerkleLeaf<'a> {
    Miner(&'a Address),
    Transaction(&'a Transaction),
}

impl MerkleLeaf<'_> {
    fn hash(&self) -> Hash {
        match self {
            MerkleLeaf::Miner(address) => Hash::light(address.as_bytes()),
            MerkleLeaf::Transaction(tx) => tx.hash(),
        }
    }
}

impl BlockBody {
    pub fn new(miner: Address, transactions: Vec<Transaction>) -> Self {
        Self { miner, transactions }
    }

    /// Merkle root over `[miner, ...transactions]`
    pub fn hash(&self) -> Hash {
        let mut leaves = Vec::with_capacity(self.transactions.len() + 1);
        leaves.push(MerkleLeaf::Miner(&self.miner));
        leaves.extend(self.transactions.iter().map(MerkleLeaf::Transaction));
        compute_root(&leaves)
    }
}

// The left half takes the extra leaf on odd lengths.
fn compute_root(leaves: &[MerkleLeaf<'_>]) -> Hash {
    if leaves.len() == 1 {
        return leaves[0].hash();
    }

    let mid = (leaves.len() + 1) / 2;
    let left = compute_root(&leaves[..mid]);
    let right = compute_root(&leaves[mid..]);

    let mut data = Vec::with_capacity(2 * HASH_SIZE);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    Hash::light(&data)
}

impl BinaryCodec for BlockBody {
    fn encode(&self, out: &mut Vec<u8>) {
        self.miner.encode(out);
        out.extend_from_slice(&(self.transactions.len() as u16).to_be_bytes());
        for tx in &self.transactions {
            tx.encode(out);
        }
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let miner = Address::decode(reader)?;
        let count = reader.read_u16()? as usize;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::decode(reader)?);
        }
        Ok(Self { miner, transactions })
    }

    fn encoded_size(&self) -> usize {
        ADDRESS_SIZE + 2 + self.transactions.iter().map(|tx| tx.encoded_size()).sum::<usize>()
    }
}

/// A complete block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    pub fn accounts_hash(&self) -> &Hash {
        &self.header.accounts_hash
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn n_bits(&self) -> u32 {
        self.header.n_bits
    }

    pub fn miner(&self) -> &Address {
        &self.body.miner
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }
}

impl BinaryCodec for Block {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        self.body.encode(out);
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let header = BlockHeader::decode(reader)?;
        let body = BlockBody::decode(reader)?;
        Ok(Self { header, body })
    }

    fn encoded_size(&self) -> usize {
        self.header.encoded_size() + self.body.encoded_size()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block {{ hash: {}, height: {}, txs: {} }}",
            self.hash(),
            self.height(),
            self.body.transactions.len()
        )
    }
}
