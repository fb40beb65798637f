//! Provider trait, descriptors, and the payload types providers return.
//!
//! Every external source implements [`Provider`]. The trait has one method
//! per [`Capability`]; each defaults to [`ProviderError::Unsupported`], so an
//! adapter only overrides the operations listed in its descriptor's
//! [`CapabilitySet`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::{Isbn, ProviderClass, RequestId};
use serde::{Deserialize, Serialize};

use super::capability::{Capability, CapabilitySet};
use crate::http::FetchError;

// ---------------------------------------------------------------------------
// Queries and context
// ---------------------------------------------------------------------------

/// A (title, author) lookup used to find an ISBN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TitleQuery {
    pub title: String,
    pub author: Option<String>,
}

impl TitleQuery {
    pub fn new(title: impl Into<String>, author: Option<impl Into<String>>) -> Self {
        Self {
            title: title.into(),
            author: author.map(Into::into),
        }
    }

    /// Stable identifier for cache keys: lowercase and whitespace-collapsed.
    pub fn cache_identifier(&self) -> String {
        let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match &self.author {
            Some(author) => format!("{}|{}", norm(&self.title), norm(author)),
            None => norm(&self.title),
        }
    }
}

/// Request for AI book generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub count: usize,
}

/// Per-request policy passed down the fallback chain.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub request_id: RequestId,
    /// Whether metered providers may be consulted.
    pub allow_paid: bool,
    /// Whether generative providers may be consulted.
    pub allow_ai: bool,
    /// Providers that already answered "no data" for this request.
    pub answered: Vec<&'static str>,
}

impl ResolveContext {
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            allow_paid: true,
            allow_ai: true,
            answered: Vec::new(),
        }
    }

    /// A context that never spends paid quota.
    pub fn free_only() -> Self {
        Self {
            allow_paid: false,
            allow_ai: false,
            ..Self::new()
        }
    }

    /// The same policy, recording that `provider` has nothing for this request.
    pub fn answered_by(&self, provider: &'static str) -> Self {
        let mut ctx = self.clone();
        if !ctx.answered.contains(&provider) {
            ctx.answered.push(provider);
        }
        ctx
    }

    pub fn has_answered(&self, provider: &str) -> bool {
        self.answered.iter().any(|p| *p == provider)
    }

    pub fn permits(&self, class: ProviderClass) -> bool {
        match class {
            ProviderClass::Free => true,
            ProviderClass::Paid => self.allow_paid,
            ProviderClass::Ai => self.allow_ai,
        }
    }
}

impl Default for ResolveContext {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Independent TTLs for positive and confirmed-absent results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub positive: Duration,
    pub negative: Duration,
}

/// Which ISBNs a batch provider can answer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsbnScope {
    Any,
    /// Excludes registration groups of predominantly non-Latin-script
    /// publishing areas (Japan, China, Russia, Korea, Taiwan, Hong Kong,
    /// Iran, Arab world, Israel, Thailand, Greece).
    LatinScript,
}

const NON_LATIN_GROUPS: &[(&str, &str)] = &[
    ("978", "4"),
    ("978", "5"),
    ("978", "7"),
    ("978", "89"),
    ("978", "957"),
    ("978", "960"),
    ("978", "962"),
    ("978", "964"),
    ("978", "965"),
    ("978", "974"),
    ("978", "977"),
    ("978", "986"),
    ("978", "988"),
    ("978", "600"),
    ("978", "603"),
    ("978", "614"),
    ("978", "616"),
    ("979", "11"),
];

impl IsbnScope {
    pub fn accepts(&self, isbn: &Isbn) -> bool {
        match self {
            Self::Any => true,
            Self::LatinScript => !NON_LATIN_GROUPS.contains(&isbn.registration_group()),
        }
    }
}

/// Limits for multi-identifier requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    pub max_size: usize,
    pub scope: IsbnScope,
}

/// Static description of a provider, fixed at construction.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub class: ProviderClass,
    pub capabilities: CapabilitySet,
    /// Order within the class; lower runs first.
    pub priority: u8,
    /// Minimum spacing between network requests, shared across workers.
    pub min_interval: Duration,
    pub cache_ttl: CacheTtl,
    pub batch: Option<BatchSpec>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A provider's answer together with how far it can be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate<T> {
    pub value: T,
    /// 0-100, attached by the provider when the data is returned.
    pub confidence: u8,
    pub source: String,
}

impl<T> Candidate<T> {
    pub fn new(value: T, confidence: u8, source: impl Into<String>) -> Self {
        Self {
            value,
            confidence: confidence.min(100),
            source: source.into(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Candidate<U> {
        Candidate {
            value: f(self.value),
            confidence: self.confidence,
            source: self.source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed response from {provider}: {reason}")]
    Malformed {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: &'static str,
        capability: Capability,
    },

    #[error("{provider} is unavailable: {reason}")]
    Unavailable {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} daily quota exhausted")]
    QuotaExhausted { provider: &'static str },
}

impl ProviderError {
    pub fn malformed(provider: &'static str, reason: impl ToString) -> Self {
        Self::Malformed {
            provider,
            reason: reason.to_string(),
        }
    }
}

/// `Ok(None)` is a confirmed "no data"; `Err` is a failed attempt.
pub type ProviderResult<T> = Result<Option<Candidate<T>>, ProviderError>;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsbnMatch {
    pub isbn: Isbn,
    pub title: String,
    pub authors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub isbn: Option<Isbn>,
    pub title: String,
    pub subtitle: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    /// As reported by the source; often only a year.
    pub published_date: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub page_count: Option<u32>,
    pub language: Option<String>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverImage {
    pub url: String,
    pub size: CoverSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicDomainStatus {
    pub is_public_domain: bool,
    pub reason: String,
    pub first_published_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    pub average: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditionVariant {
    pub isbn: Isbn,
    pub title: Option<String>,
    pub language: Option<String>,
    pub published_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub name: String,
    pub position: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub name: String,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub language: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedBook {
    pub title: String,
    pub author: String,
    pub year: Option<i32>,
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// An adapter to one external data source.
///
/// Adapters check the response cache, then wait on the shared rate limiter,
/// then issue the network call; see
/// [`ProviderRuntime`](super::runtime::ProviderRuntime).
#[async_trait]
pub trait Provider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    /// Whether the provider can serve a request right now: credentials are
    /// configured and, for metered providers, quota remains.
    async fn is_available(&self, ctx: &ResolveContext) -> bool;

    async fn resolve_isbn(&self, _query: &TitleQuery) -> ProviderResult<IsbnMatch> {
        Err(self.unsupported(Capability::ResolveIsbn))
    }

    async fn fetch_metadata(&self, _isbn: &Isbn) -> ProviderResult<BookMetadata> {
        Err(self.unsupported(Capability::FetchMetadata))
    }

    async fn fetch_cover(&self, _isbn: &Isbn) -> ProviderResult<CoverImage> {
        Err(self.unsupported(Capability::FetchCover))
    }

    async fn fetch_subjects(&self, _isbn: &Isbn) -> ProviderResult<Vec<String>> {
        Err(self.unsupported(Capability::FetchSubjects))
    }

    async fn check_public_domain(&self, _isbn: &Isbn) -> ProviderResult<PublicDomainStatus> {
        Err(self.unsupported(Capability::CheckPublicDomain))
    }

    async fn fetch_ratings(&self, _isbn: &Isbn) -> ProviderResult<Ratings> {
        Err(self.unsupported(Capability::FetchRatings))
    }

    async fn fetch_edition_variants(&self, _isbn: &Isbn) -> ProviderResult<Vec<EditionVariant>> {
        Err(self.unsupported(Capability::FetchEditionVariants))
    }

    async fn fetch_series(&self, _isbn: &Isbn) -> ProviderResult<SeriesInfo> {
        Err(self.unsupported(Capability::FetchSeries))
    }

    async fn fetch_awards(&self, _isbn: &Isbn) -> ProviderResult<Vec<Award>> {
        Err(self.unsupported(Capability::FetchAwards))
    }

    async fn fetch_translations(&self, _isbn: &Isbn) -> ProviderResult<Vec<Translation>> {
        Err(self.unsupported(Capability::FetchTranslations))
    }

    async fn generate_books(&self, _request: &GenerateRequest) -> ProviderResult<Vec<GeneratedBook>> {
        Err(self.unsupported(Capability::GenerateBooks))
    }

    /// Fetch metadata for many ISBNs in one request. ISBNs missing from the
    /// returned map had no data at the provider.
    async fn batch_fetch_metadata(
        &self,
        _isbns: &[Isbn],
    ) -> Result<HashMap<Isbn, Candidate<BookMetadata>>, ProviderError> {
        Err(self.unsupported(Capability::BatchFetchMetadata))
    }

    fn unsupported(&self, capability: Capability) -> ProviderError {
        ProviderError::Unsupported {
            provider: self.name(),
            capability,
        }
    }
}
