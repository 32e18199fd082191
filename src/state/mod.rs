//! Ledger storage for the instrumentation tool.
//!
//! This module provides persistent per-resource records (managed tag keys,
//! run history) and the leases that keep two processes from reconciling the
//! same state machine at once.

mod store;
mod local;
mod s3;
mod lock;
mod types;

pub use store::StateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use s3::S3StateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use types::{storage_key, HistoryEntry, ResourceRecord, RunOutcome, STATE_VERSION};
