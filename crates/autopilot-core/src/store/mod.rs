//! Shared persisted key/value store.
//!
//! The store is the only channel between supervisor processes. It carries the
//! leader lock, the weekly stats aggregate and the pending-enable flag.

mod keys;
mod memory;
mod sqlite;
mod traits;

pub use keys::StoreKeys;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{read_json, write_json, KeyValueStore};

use crate::error::{AutopilotError, Result};

/// Run a blocking store operation on tokio's blocking pool.
///
/// SQLite may wait on its busy timeout while another process writes, which
/// must not stall the scheduler's worker threads.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AutopilotError::Other(format!("Store task failed: {}", e)))?
}
