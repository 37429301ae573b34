use ed25519_dalek::{Keypair, Signature as DalekSignature, Signer, Verifier};
use std::fmt;

use crate::codec::{BinaryCodec, CodecError, SerialReader};
use crate::crypto::keys::{KeyError, KeyPair, PublicKey};

/// Size of a serialized signature
pub const SIGNATURE_SIZE: usize = 64;

/// Sign a message using the provided keypair
pub fn sign_message(keypair: &KeyPair, message: &[u8]) -> Result<Signature, KeyError> {
    let secret = keypair.private.to_dalek_secret()?;
    let public = keypair.public.to_dalek_pubkey()?;
    let dalek_keypair = Keypair { secret, public };
    let signature = dalek_keypair.sign(message);
    Ok(Signature(signature.to_bytes()))
}

/// Verify a signature against a message and public key
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let public = match public_key.to_dalek_pubkey() {
        Ok(public) => public,
        Err(_) => return false,
    };

    match DalekSignature::from_bytes(&signature.0) {
        Ok(sig) => public.verify(message, &sig).is_ok(),
        Err(_) => false,
    }
}

/// A serializable signature wrapper
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create a new signature from bytes
    pub fn new(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the signature as bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn verify(&self, public_key: &PublicKey, message: &[u8]) -> bool {
        verify_signature(message, self, public_key)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_SIZE])
    }
}

impl BinaryCodec for Signature {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        Ok(Self(reader.read_array()?))
    }

    fn encoded_size(&self) -> usize {
        SIGNATURE_SIZE
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}
