use std::fmt;

use crate::codec::{BinaryCodec, CodecError, SerialReader};

/// Type tag of the only account kind
pub const ACCOUNT_TYPE_BASIC: u8 = 0;

/// Error raised when a balance update leaves the valid range
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("Balance would become negative")]
    ValueUnderflow,

    #[error("Balance exceeds u64 range")]
    ValueOverflow,

    #[error("Nonce would become negative")]
    NonceUnderflow,

    #[error("Nonce exceeds u32 range")]
    NonceOverflow,
}

/// Spendable value and replay counter of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Balance {
    /// Value in satoshis
    pub value: u64,

    /// Number of transactions sent from this account
    pub nonce: u32,
}

impl Balance {
    /// The canonical zero balance of an address that is not in the ledger
    pub const INITIAL: Balance = Balance { value: 0, nonce: 0 };

    pub const fn new(value: u64, nonce: u32) -> Self {
        Self { value, nonce }
    }

    /// Return the balance with `value_delta` added to the value and
    /// `nonce_delta` added to the nonce
    pub fn apply(&self, value_delta: i128, nonce_delta: i64) -> Result<Balance, BalanceError> {
        let value = self.value as i128 + value_delta;
        if value < 0 {
            return Err(BalanceError::ValueUnderflow);
        }
        let value = u64::try_from(value).map_err(|_| BalanceError::ValueOverflow)?;

        let nonce = self.nonce as i64 + nonce_delta;
        if nonce < 0 {
            return Err(BalanceError::NonceUnderflow);
        }
        let nonce = u32::try_from(nonce).map_err(|_| BalanceError::NonceOverflow)?;

        Ok(Balance { value, nonce })
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }
}

impl BinaryCodec for Balance {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let value = reader.read_u64()?;
        let nonce = reader.read_u32()?;
        Ok(Self { value, nonce })
    }

    fn encoded_size(&self) -> usize {
        8 + 4
    }
}

/// A ledger account. Only the basic kind exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Account {
    pub balance: Balance,
}

impl Account {
    /// The canonical absent account. Storing it removes the address.
    pub const INITIAL: Account = Account { balance: Balance::INITIAL };

    pub const fn new(balance: Balance) -> Self {
        Self { balance }
    }

    pub fn is_initial(&self) -> bool {
        self.balance.is_initial()
    }
}

impl BinaryCodec for Account {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(ACCOUNT_TYPE_BASIC);
        self.balance.encode(out);
    }

    fn decode(reader: &mut SerialReader<'_>) -> Result<Self, CodecError> {
        let account_type = reader.read_u8()?;
        if account_type != ACCOUNT_TYPE_BASIC {
            return Err(CodecError::InvalidType("account", account_type));
        }
        let balance = Balance::decode(reader)?;
        Ok(Self { balance })
    }

    fn encoded_size(&self) -> usize {
        1 + self.balance.encoded_size()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BasicAccount {{ value: {}, nonce: {} }}",
            self.balance.value, self.balance.nonce
        )
    }
}
