//! Ledger entities and their binary encodings

pub mod account;
pub mod block;
pub mod transaction;

pub use account::{Account, Balance, BalanceError};
pub use block::{Block, BlockBody, BlockHeader};
pub use transaction::Transaction;
