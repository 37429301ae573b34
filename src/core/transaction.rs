use std::fmt;

use crate::codec::{BinaryCodec, CodecError, SerialReader};
use crate::crypto::hash::Hash;
use crate::crypto::keys::{Address, KeyError, KeyPair, PublicKey, ADDRESS_SIZE, PUBLIC_KEY_SIZE};
use crate::crypto::signer::{sign_message, Signature, SIGNATURE_SIZE};

/// Current transaction format version
pub const TRANSACTION_VERSION: u16 = 1;

/// Type tag of a basic value transfer
pub const TRANSACTION_TYPE_BASIC: u8 = 0;

/// Size of the signed part of a transaction
pub const TRANSACTION_CONTENT_SIZE: usize = 2 + 1 + PUBLIC_KEY_SIZE + ADDRESS_SIZE + 8 + 8 + 4;

/// A signed value transfer from the owner of `sender_pubkey` to `recipient`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u16,
    pub sender_pubkey: PublicKey,
    pub recipient: Address,

    /// Amount transferred, always non-zero
    pub value: u64,

    /// Fee credited to the miner
    pub fee: u64,

    /// Must equal the sender's nonce in the ledger
    pub nonce: u32,

    pub signature: Signature,
}

impl Transaction {
    /// Create an unsigned transaction
    pub fn new(sender_pubkey: PublicKey, recipient: Address, value: u64, fee: u64, nonce: u32) -> Self {
        Self {
            version: TRANSACTION_VERSION,
            sender_pubkey,
            recipient,
            value,
            fee,
            nonce,
            signature: Signature::default(),
        }
    }

    /// Create a transaction signed by `keypair`
    pub fn signed(
        keypair: &KeyPair,
        recipient: Address,
        value: u64,
        fee: u64,
        nonce: u32,
    ) -> Result<Self, KeyError> {
        let mut tx = Self::new(keypair.public, recipient, value, fee, nonce);
        tx.sign(keypair)?;
        Ok(tx)
    }

    /// Sign the content with `keypair`, replacing any existing signature
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), KeyError> {
        self.signature = sign_message(keypair, &self.content_bytes())?;
        Ok(())
    }

    /// Serialize everything except the signature
    pub fn encode_content(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(TRANSACTION_TYPE_BASIC);
        self.sender_pubkey.encode(out);
        self.recipient.encode(out);
        out.extend_from_slice(&self.value.to_be_bytes());
        out.extend_from_slice(&self.fee.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
    }

    pub fn content_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRANSACTION_CONTENT_SIZE);
        self.encode_content(&mut out);
        out
    }

    /// Transaction identity. The signature is excluded so it cannot be malleated.
    pub fn hash(&self) -> Hash {
        Hash::light(&self.content_bytes())
    }

    pub fn verify_signature(&self) -> bool {
        self.signature.verify(&self.sender_pubkey, &self.content_bytes())
    }

    pub fn sender(&self) -> Address {
        self.sender_pubkey.to_address()
    }

    /// Total amount debited from the sender
    pub fn total_cost(&self) -> u128 {
        self.value as u128 + self.fee as u128
    }
}

impl BinaryCodec for Transaction {
    fn encode(&self, out: &mut Vec<u8>) {
        self.encode_content(out);
        self.signature.encode(out);
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let version = reader.read_u16()?;
        if version != TRANSACTION_VERSION {
            return Err(CodecError::UnsupportedVersion("transaction", version));
        }
        let tx_type = reader.read_u8()?;
        if tx_type != TRANSACTION_TYPE_BASIC {
            return Err(CodecError::InvalidType("transaction", tx_type));
        }

        let sender_pubkey = PublicKey::decode(reader)?;
        let recipient = Address::decode(reader)?;
        let value = reader.read_u64()?;
        if value == 0 {
            return Err(CodecError::Malformed("transaction value"));
        }
        let fee = reader.read_u64()?;
        let nonce = reader.read_u32()?;
        let signature = Signature::decode(reader)?;

        Ok(Self {
            version,
            sender_pubkey,
            recipient,
            value,
            fee,
            nonce,
            signature,
        })
    }

    fn encoded_size(&self) -> usize {
        TRANSACTION_CONTENT_SIZE + SIGNATURE_SIZE
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction {{ sender: {}, recipient: {}, value: {}, fee: {}, nonce: {} }}",
            self.sender(),
            self.recipient,
            self.value,
            self.fee,
            self.nonce
        )
    }
}
