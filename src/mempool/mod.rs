// Emberchain pending transaction pool
//
// Admits signed transactions that the current ledger can pay for, one per
// sender, and drops them again once a new head makes them stale.

pub mod pool;


pub use pool::{Mempool, MempoolError};
