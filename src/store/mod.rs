//! Shared key-value store.
//!
//! Every piece of cross-request coordination (cached responses, rate-limit
//! tokens, quota counters) goes through a [`KvStore`]. Workers on different
//! processes cooperate by pointing at the same backing store.
//!
//! - [`MemoryStore`] keeps entries in a [`dashmap::DashMap`]; one process only.
//! - [`SqliteStore`] persists entries through `bookforged-db`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::time::Duration;

use async_trait::async_trait;

/// Errors surfaced by a [`KvStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached or the operation failed.
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),

    /// A stored value did not have the expected shape.
    #[error("corrupt value for key '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// An expiring key-value store tolerant of concurrent writers.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value that expires after `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically add `delta` to the decimal counter at `key`, returning the
    /// new total. A missing or expired counter starts at zero and expires
    /// after `ttl`; a live counter keeps its expiry.
    async fn increment(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64, StoreError>;
}

/// Decode a counter written by [`KvStore::increment`].
pub fn decode_counter(key: &str, bytes: &[u8]) -> Result<u64, StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            reason: "not a decimal counter".to_string(),
        })
}
