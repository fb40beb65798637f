//! Persistence of resolved enrichment records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bookforged_common::Isbn;
use bookforged_db::models::BookEnrichment;
use bookforged_db::pool::{get_conn, DbPool};
use bookforged_db::queries::enrichments;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::capability::Capability;
use super::provider::Candidate;
use crate::clock::{SharedClock, SystemClock};

/// One resolved value, ready to be stored against a book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentPayload {
    pub capability: Capability,
    pub source: String,
    pub confidence: u8,
    pub data: Value,
}

impl EnrichmentPayload {
    pub fn from_candidate<T: Serialize>(
        capability: Capability,
        candidate: &Candidate<T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            capability,
            source: candidate.source.clone(),
            confidence: candidate.confidence,
            data: serde_json::to_value(&candidate.value)?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to persist enrichment for {isbn}: {reason}")]
    Storage { isbn: String, reason: String },
}

/// Where the queue consumer writes resolved records.
#[async_trait]
pub trait EnrichmentSink: Send + Sync {
    async fn enrich_record(&self, isbn: &Isbn, payload: &EnrichmentPayload) -> Result<(), SinkError>;
}

/// Writes into the `book_enrichments` table, one row per (isbn, capability).
#[derive(Clone)]
pub struct SqliteSink {
    pool: DbPool,
    clock: SharedClock,
}

impl SqliteSink {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl EnrichmentSink for SqliteSink {
    async fn enrich_record(&self, isbn: &Isbn, payload: &EnrichmentPayload) -> Result<(), SinkError> {
        let record = BookEnrichment {
            isbn: isbn.to_string(),
            capability: payload.capability.as_str().to_string(),
            source: payload.source.clone(),
            confidence: payload.confidence,
            payload: payload.data.clone(),
            enriched_at: self.clock.now(),
        };
        let pool = self.pool.clone();
        let storage_error = |reason: String| SinkError::Storage {
            isbn: isbn.to_string(),
            reason,
        };

        tokio::task::spawn_blocking(move || {
            let conn = get_conn(&pool)?;
            enrichments::upsert(&conn, &record)
        })
        .await
        .map_err(|e| storage_error(e.to_string()))?
        .map_err(|e| storage_error(e.to_string()))?;

        debug!(isbn = %isbn, capability = %payload.capability, "Stored enrichment");
        Ok(())
    }
}

/// Keeps records in memory. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Isbn, EnrichmentPayload)>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<(Isbn, EnrichmentPayload)> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl EnrichmentSink for MemorySink {
    async fn enrich_record(&self, isbn: &Isbn, payload: &EnrichmentPayload) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Storage {
                isbn: isbn.to_string(),
                reason: "sink offline".to_string(),
            });
        }
        self.records.lock().push((isbn.clone(), payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::provider::CoverImage;
    use crate::resolver::provider::CoverSize;
    use bookforged_db::pool::init_memory_pool;

    #[tokio::test]
    async fn sqlite_sink_upserts_per_capability() {
        let pool = init_memory_pool().unwrap();
        let sink = SqliteSink::new(pool.clone());
        let isbn = Isbn::parse("9780451524935").unwrap();

        let cover = Candidate::new(
            CoverImage {
                url: "https://covers.openlibrary.org/b/isbn/9780451524935-L.jpg".into(),
                size: CoverSize::Large,
            },
            80,
            "open_library",
        );
        let payload = EnrichmentPayload::from_candidate(Capability::FetchCover, &cover).unwrap();
        sink.enrich_record(&isbn, &payload).await.unwrap();

        let replaced = EnrichmentPayload {
            source: "google_books".into(),
            confidence: 70,
            ..payload.clone()
        };
        sink.enrich_record(&isbn, &replaced).await.unwrap();

        let conn = get_conn(&pool).unwrap();
        let stored = enrichments::get(&conn, isbn.as_str(), "fetch_cover")
            .unwrap()
            .unwrap();
        assert_eq!(stored.source, "google_books");
        assert_eq!(stored.confidence, 70);
        assert_eq!(stored.payload["size"], "large");
        assert_eq!(enrichments::count(&conn).unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_sink_failure_mode() {
        let sink = MemorySink::new();
        let isbn = Isbn::parse("9780451524935").unwrap();
        let payload = EnrichmentPayload {
            capability: Capability::FetchSubjects,
            source: "stub".into(),
            confidence: 50,
            data: serde_json::json!(["Fiction"]),
        };

        sink.set_failing(true);
        assert!(sink.enrich_record(&isbn, &payload).await.is_err());
        sink.set_failing(false);
        sink.enrich_record(&isbn, &payload).await.unwrap();
        assert_eq!(sink.records().len(), 1);
    }
}
