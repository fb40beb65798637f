//! Rust models matching the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved enrichment result for one book and one capability.
///
/// `payload` is the capability's JSON payload as produced by the resolver;
/// the storage layer does not interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEnrichment {
    pub isbn: String,
    pub capability: String,
    pub source: String,
    pub confidence: u8,
    pub payload: serde_json::Value,
    pub enriched_at: DateTime<Utc>,
}
