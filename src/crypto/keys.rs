use ed25519_dalek::{PublicKey as DalekPublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use crate::codec::{BinaryCodec, CodecError, SerialReader};
use crate::crypto::hash::sha256;

/// Size of a serialized public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a serialized private key
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Size of a serialized address
pub const ADDRESS_SIZE: usize = 20;

/// Error raised for malformed key material
pub type KeyError = ed25519_dalek::SignatureError;

/// Account address: the first 20 bytes of the light hash of a public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Lowercase hex form, which is also the key path in the accounts tree
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s).map_err(|_| CodecError::Malformed("address"))?;
        let bytes: [u8; ADDRESS_SIZE] = bytes
            .try_into()
            .map_err(|_| CodecError::Malformed("address"))?;
        Ok(Self(bytes))
    }
}

impl BinaryCodec for Address {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        Ok(Self(reader.read_array()?))
    }

    fn encoded_size(&self) -> usize {
        ADDRESS_SIZE
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Serializable public key wrapper
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create a new public key from bytes
    pub fn new(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Convert to ed25519_dalek PublicKey
    pub fn to_dalek_pubkey(&self) -> Result<DalekPublicKey, KeyError> {
        DalekPublicKey::from_bytes(&self.0)
    }

    /// Get the address derived from this public key
    pub fn to_address(&self) -> Address {
        let digest = sha256(&self.0);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest[..ADDRESS_SIZE]);
        Address(bytes)
    }
}

impl BinaryCodec for PublicKey {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        Ok(Self(reader.read_array()?))
    }

    fn encoded_size(&self) -> usize {
        PUBLIC_KEY_SIZE
    }
}

impl From<DalekPublicKey> for PublicKey {
    fn from(pubkey: DalekPublicKey) -> Self {
        Self(*pubkey.as_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// Secret key bytes. Never printed.
#[derive(Clone)]
pub struct PrivateKey([u8; PRIVATE_KEY_SIZE]);

impl PrivateKey {
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        &self.0
    }

    pub(crate) fn to_dalek_secret(&self) -> Result<SecretKey, KeyError> {
        SecretKey::from_bytes(&self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

/// Keypair for signing transactions
#[derive(Clone)]
pub struct KeyPair {
    /// Secret key for signing
    pub private: PrivateKey,

    /// Public key for verification
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random keypair.
    ///
    /// The seed is drawn from the OS directly so the dalek 1.x rand_core
    /// version does not leak into our dependency graph.
    pub fn generate() -> Result<Self, KeyError> {
        let mut seed = [0u8; PRIVATE_KEY_SIZE];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Create a keypair from secret key bytes
    pub fn from_seed(seed: [u8; PRIVATE_KEY_SIZE]) -> Result<Self, KeyError> {
        let secret = SecretKey::from_bytes(&seed)?;
        let public = DalekPublicKey::from(&secret);
        Ok(Self {
            private: PrivateKey(seed),
            public: public.into(),
        })
    }

    /// Get the address derived from this keypair
    pub fn address(&self) -> Address {
        self.public.to_address()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair {{ public: {} }}", hex::encode(self.public.0))
    }
}
