//! Response cache with negative caching.
//!
//! Entries live in the shared [`KvStore`] as JSON. A confirmed "no data"
//! answer is stored as an explicit absence, so a lookup distinguishes three
//! states: [`CacheLookup::Hit`], [`CacheLookup::Absent`], and
//! [`CacheLookup::Miss`]. The TTL is chosen by the writer and fixed at write
//! time.
//!
//! Cache failures never fail a lookup: a broken store reads as a miss and a
//! failed write is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use bookforged_common::Isbn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::capability::Capability;
use crate::store::KvStore;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    /// The identifier was confirmed to have no data.
    Absent,
    /// Never cached, expired, or unreadable.
    Miss,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum StoredEntry<T> {
    Hit { value: T },
    Absent,
}

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KvStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// `cache:{provider}:{operation}:{identifier}`
    pub fn key(provider: &str, operation: &str, identifier: &str) -> String {
        format!("cache:{provider}:{operation}:{}", identifier.trim())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed; treating as miss");
                return CacheLookup::Miss;
            }
        };

        match serde_json::from_slice::<StoredEntry<T>>(&bytes) {
            Ok(StoredEntry::Hit { value }) => {
                debug!(key = %key, "Cache hit");
                CacheLookup::Hit(value)
            }
            Ok(StoredEntry::Absent) => {
                debug!(key = %key, "Negative cache hit");
                CacheLookup::Absent
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cache entry; treating as miss");
                CacheLookup::Miss
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(&StoredEntry::Hit { value }) {
            Ok(bytes) => self.write(key, bytes, ttl).await,
            Err(e) => warn!(key = %key, error = %e, "Failed to encode cache entry"),
        }
    }

    pub async fn put_absent(&self, key: &str, ttl: Duration) {
        match serde_json::to_vec(&StoredEntry::<()>::Absent) {
            Ok(bytes) => self.write(key, bytes, ttl).await,
            Err(e) => warn!(key = %key, error = %e, "Failed to encode negative cache entry"),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = self.store.put(key, bytes, ttl).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}

/// Resolver-level record of identifiers no provider could answer for.
///
/// Sits in front of the whole fallback chain: a hit skips every provider.
/// Keys are `cache:resolver:{capability}:{isbn}`.
#[derive(Clone)]
pub struct NegativeCache {
    cache: ResponseCache,
    ttl: Duration,
}

impl NegativeCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            cache: ResponseCache::new(store),
            ttl,
        }
    }

    fn key(capability: Capability, isbn: &Isbn) -> String {
        ResponseCache::key("resolver", capability.as_str(), isbn.as_str())
    }

    pub async fn is_known_absent(&self, capability: Capability, isbn: &Isbn) -> bool {
        matches!(
            self.cache.get::<()>(&Self::key(capability, isbn)).await,
            CacheLookup::Absent
        )
    }

    pub async fn remember_absent(&self, capability: Capability, isbn: &Isbn) {
        self.cache
            .put_absent(&Self::key(capability, isbn), self.ttl)
            .await;
    }
}
