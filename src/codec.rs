//! Fixed-width big-endian binary codec
//!
//! Every hash and signature in the ledger is computed over the byte sequences
//! produced here, so field order and widths must never change.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

/// Error raised while decoding a binary object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input ended before the object was complete
    #[error("Unexpected end of input")]
    UnexpectedEnd,

    /// Unknown type discriminant
    #[error("Invalid {0} type: {1}")]
    InvalidType(&'static str, u8),

    /// Version not supported by this implementation
    #[error("Unsupported {0} version: {1}")]
    UnsupportedVersion(&'static str, u16),

    /// Field value outside its allowed range
    #[error("Malformed {0}")]
    Malformed(&'static str),

    /// Bytes left over after a complete object was decoded
    #[error("{0} trailing bytes after object")]
    TrailingBytes(usize),
}

impl From<std::io::Error> for CodecError {
    fn from(_: std::io::Error) -> Self {
        CodecError::UnexpectedEnd
    }
}

/// Cursor over a byte slice with big-endian primitive readers
pub struct SerialReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> SerialReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(bytes) }
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(self.cursor.read_u64::<BigEndian>()?)
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(self.cursor.read_f64::<BigEndian>()?)
    }

    /// Read exactly `N` bytes
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut bytes = [0u8; N];
        self.cursor.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Read a string prefixed by its length as a single byte
    pub fn read_var_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| CodecError::Malformed("string"))
    }

    /// Number of bytes not yet consumed
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }
}

/// Write a string prefixed by its length as a single byte.
///
/// Callers only pass hex prefixes of at most 40 characters.
pub fn write_var_string(out: &mut Vec<u8>, value: &str) {
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
}

/// Binary encoding shared by all ledger entities
pub trait BinaryCodec: Sized {
    /// Append the encoding of `self` to `out`
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode one object from the reader
    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError>;

    /// Exact number of bytes `encode` writes
    fn encoded_size(&self) -> usize;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        self.encode(&mut out);
        out
    }

    /// Decode an object that must span the whole input
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = SerialReader::new(bytes);
        let value = Self::decode(&mut reader)?;
        match reader.remaining() {
            0 => Ok(value),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
