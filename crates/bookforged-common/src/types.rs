//! Core enums shared by the resolver and the storage layer.
//!
//! All enums serialize in lowercase so they read naturally in TOML config
//! and in queue message payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Billing class of an external data source.
///
/// The derived ordering is the fallback order: free sources are always
/// consulted before paid ones, and AI generation comes last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderClass {
    /// Public API with no per-call cost.
    Free,
    /// Metered API with a daily call budget.
    Paid,
    /// Generative model; answers are synthesized, not looked up.
    Ai,
}

impl fmt::Display for ProviderClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Paid => write!(f, "paid"),
            Self::Ai => write!(f, "ai"),
        }
    }
}

/// Priority carried on enrichment queue messages.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}
