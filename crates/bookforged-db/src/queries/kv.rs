//! Expiring key-value queries.
//!
//! All timestamps are unix epoch milliseconds supplied by the caller, so
//! expiry decisions follow the caller's clock rather than SQLite's.
//! Expired rows are invisible to reads and are overwritten by writes;
//! [`purge_expired`] reclaims their space.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use bookforged_common::{Error, Result};

/// Read a live value.
pub fn get(conn: &Connection, key: &str, now_ms: i64) -> Result<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT value FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
        params![key, now_ms],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Insert or replace a value.
pub fn put(conn: &Connection, key: &str, value: &[u8], expires_at_ms: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        params![key, value, expires_at_ms],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Atomically add `delta` to a decimal counter and return the new total.
///
/// The counter is stored as ASCII digits so plain [`get`] reads it. A missing
/// or expired counter starts from zero and takes `expires_at_ms`; a live
/// counter keeps its original expiry. The read and write happen under an
/// immediate transaction, so concurrent incrementers on other connections
/// serialize on SQLite's write lock.
pub fn increment(
    conn: &mut Connection,
    key: &str,
    delta: u64,
    expires_at_ms: i64,
    now_ms: i64,
) -> Result<u64> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))?;

    let existing: Option<(Vec<u8>, i64)> = tx
        .query_row(
            "SELECT value, expires_at FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
            params![key, now_ms],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    let (current, expires_at) = match existing {
        Some((bytes, expires_at)) => (parse_counter(key, &bytes)?, expires_at),
        None => (0, expires_at_ms),
    };
    let total = current.saturating_add(delta);

    tx.execute(
        "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        params![key, total.to_string().into_bytes(), expires_at],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(total)
}

/// Delete entries whose expiry has passed. Returns the number removed.
pub fn purge_expired(conn: &Connection, now_ms: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM kv_entries WHERE expires_at <= ?1",
        params![now_ms],
    )
    .map_err(|e| Error::database(e.to_string()))
}

fn parse_counter(key: &str, bytes: &[u8]) -> Result<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::serialization(format!("kv entry '{key}' is not a counter")))
}
