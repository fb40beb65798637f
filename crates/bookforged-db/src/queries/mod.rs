//! Database query modules.
//!
//! - kv: Expiring key-value entries and atomic counters
//! - enrichments: Resolved book records written by the queue consumer

pub mod enrichments;
pub mod kv;
