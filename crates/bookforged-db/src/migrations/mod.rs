//! Database migrations.
//!
//! Schema files are embedded in the binary and applied in version order, each
//! inside its own transaction. Applied versions are tracked in
//! `schema_migrations`.

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

/// Migration error types
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration {version} ({name}) failed: {reason}")]
    Failed {
        version: usize,
        name: &'static str,
        reason: String,
    },

    #[error("Database schema version {found} is newer than this build supports ({latest})")]
    TooNew { found: usize, latest: usize },
}

struct Migration {
    version: usize,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "kv_and_enrichments",
    sql: include_str!("001_initial.sql"),
}];

fn ensure_tracking_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
}

fn read_version(conn: &Connection) -> rusqlite::Result<usize> {
    let version: Option<usize> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the database's recorded version.
///
/// Returns the versions that were applied, in order. An empty vector means
/// the schema was already current.
pub fn run_migrations(conn: &Connection) -> Result<Vec<usize>, MigrationError> {
    ensure_tracking_table(conn)?;

    let current = read_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(MigrationError::TooNew {
            found: current,
            latest,
        });
    }

    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let failed = |e: rusqlite::Error| MigrationError::Failed {
            version: migration.version,
            name: migration.name,
            reason: e.to_string(),
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        applied.push(migration.version);
    }

    Ok(applied)
}

/// Get the current schema version without applying migrations
pub fn current_version(conn: &Connection) -> Result<usize, MigrationError> {
    ensure_tracking_table(conn)?;
    Ok(read_version(conn)?)
}

/// Get the latest available migration version
pub fn latest_version() -> usize {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
