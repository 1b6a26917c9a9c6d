//! Durable reconciliation cache for attendance punches.
//!
//! This module keeps a deduplicated view of every punch seen across fetch
//! cycles:
//! - Entries are keyed by the composite `{emp_code}_{punch_time}` identity
//! - Re-fetched punches overwrite in place (last write wins)
//! - Entries older than the retention window are pruned
//! - The whole map is flushed to a single JSON file after every mutation,
//!   best-effort; a failed write never fails the in-memory operation

mod store;
mod transactions;

pub use store::JsonStore;
pub use transactions::{composite_key, merge, CacheEntry, TransactionCache};
