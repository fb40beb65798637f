//! Bookforged-DB: Database schema, migrations, and query operations
//!
//! SQLite storage for bookforged using rusqlite with r2d2 connection pooling.
//! Two concerns live here: the shared key-value table that backs the response
//! cache, rate-limit tokens, and quota counters when running against SQLite,
//! and the enrichment table the queue consumer writes resolved records into.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use bookforged_db::pool::{init_pool, get_conn};
//! use bookforged_db::queries::kv;
//!
//! let pool = init_pool("/var/lib/bookforged/bookforged.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let now = chrono::Utc::now().timestamp_millis();
//! kv::put(&conn, "greeting", b"hello", now + 60_000).unwrap();
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
