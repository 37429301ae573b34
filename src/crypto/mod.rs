//! Hashing, keys and signatures

pub mod hash;
pub mod keys;
pub mod signer;

pub use hash::{sha256, Hash, HASH_SIZE};
pub use keys::{Address, KeyError, KeyPair, PrivateKey, PublicKey, ADDRESS_SIZE, PUBLIC_KEY_SIZE};
pub use signer::{sign_message, verify_signature, Signature, SIGNATURE_SIZE};
