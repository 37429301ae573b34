// Emberchain - state management core of an account-based proof-of-work chain

pub mod codec;
pub mod config;
pub mod consensus;
pub mod core;
pub mod crypto;
pub mod mempool;
pub mod service;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

// Initialize logging
pub fn init_logger() {
    env_logger::init();
}
