//! Enrichment record queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use bookforged_common::{Error, Result};

use crate::models::BookEnrichment;

/// Insert or replace the record for `(isbn, capability)`.
pub fn upsert(conn: &Connection, record: &BookEnrichment) -> Result<()> {
    let payload = serde_json::to_string(&record.payload)
        .map_err(|e| Error::serialization(e.to_string()))?;

    conn.execute(
        "INSERT INTO book_enrichments (isbn, capability, source, confidence, payload, enriched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(isbn, capability) DO UPDATE SET
            source = excluded.source,
            confidence = excluded.confidence,
            payload = excluded.payload,
            enriched_at = excluded.enriched_at",
        params![
            record.isbn,
            record.capability,
            record.source,
            record.confidence,
            payload,
            record.enriched_at.to_rfc3339(),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Fetch the record for one capability of a book.
pub fn get(conn: &Connection, isbn: &str, capability: &str) -> Result<Option<BookEnrichment>> {
    conn.query_row(
        "SELECT isbn, capability, source, confidence, payload, enriched_at
         FROM book_enrichments WHERE isbn = ?1 AND capability = ?2",
        params![isbn, capability],
        row_to_record,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// All records for a book, ordered by capability name.
pub fn list_for_isbn(conn: &Connection, isbn: &str) -> Result<Vec<BookEnrichment>> {
    let mut stmt = conn
        .prepare(
            "SELECT isbn, capability, source, confidence, payload, enriched_at
             FROM book_enrichments WHERE isbn = ?1 ORDER BY capability",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map(params![isbn], row_to_record)
        .map_err(|e| Error::database(e.to_string()))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Number of stored records.
pub fn count(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM book_enrichments", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|n| n as u64)
    .map_err(|e| Error::database(e.to_string()))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<BookEnrichment> {
    let payload: String = row.get(4)?;
    let enriched_at: String = row.get(5)?;

    Ok(BookEnrichment {
        isbn: row.get(0)?,
        capability: row.get(1)?,
        source: row.get(2)?,
        confidence: row.get(3)?,
        payload: serde_json::from_str(&payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        enriched_at: DateTime::parse_from_rfc3339(&enriched_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
    })
}
