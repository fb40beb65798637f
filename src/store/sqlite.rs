use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookforged_db::pool::{get_conn, DbPool};
use bookforged_db::queries::kv;

use super::{KvStore, StoreError};
use crate::clock::{SharedClock, SystemClock};

/// [`KvStore`] persisted in the `kv_entries` SQLite table.
///
/// Several processes opening the same database file share cache entries,
/// rate-limit tokens, and quota counters. Blocking SQLite calls run on the
/// Tokio blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    clock: SharedClock,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Delete expired rows. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.now_ms();
        self.blocking(move |pool| {
            let conn = get_conn(&pool)?;
            kv::purge_expired(&conn, now)
        })
        .await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(DbPool) -> bookforged_common::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || op(pool))
            .await
            .map_err(|e| StoreError::Unavailable(format!("sqlite task failed: {e}")))?
            .map_err(into_store_error)
    }
}

fn into_store_error(err: bookforged_common::Error) -> StoreError {
    match err {
        bookforged_common::Error::Serialization(reason) => StoreError::Corrupt {
            key: String::new(),
            reason,
        },
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn expiry_ms(now_ms: i64, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_add(ttl_ms)
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.now_ms();
        let key = key.to_string();
        self.blocking(move |pool| {
            let conn = get_conn(&pool)?;
            kv::get(&conn, &key, now)
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = self.now_ms();
        let key = key.to_string();
        self.blocking(move |pool| {
            let conn = get_conn(&pool)?;
            kv::put(&conn, &key, &value, expiry_ms(now, ttl))
        })
        .await
    }

    async fn increment(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64, StoreError> {
        let now = self.now_ms();
        let owned_key = key.to_string();
        self.blocking(move |pool| {
            let mut conn = get_conn(&pool)?;
            kv::increment(&mut conn, &owned_key, delta, expiry_ms(now, ttl), now)
        })
        .await
        .map_err(|err| match err {
            StoreError::Corrupt { reason, .. } => StoreError::Corrupt {
                key: key.to_string(),
                reason,
            },
            other => other,
        })
    }
}
