//! ISBNdb: paid, metered against a daily call budget, and the only source
//! that accepts many ISBNs per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::{Isbn, ProviderClass};
use serde::Deserialize;

use super::{api_key, base_url, AdapterDefaults, DAY};
use crate::config::ProviderConfig;
use crate::http::FetchRequest;
use crate::resolver::capability::CapabilitySet;
use crate::resolver::provider::*;
use crate::resolver::quota::QuotaPolicy;
use crate::resolver::runtime::{ProviderDeps, ProviderRuntime};
use crate::resolver::scoring::{score, Evidence, ScoreQuery, ScoringProfile};
use crate::secrets::SecretSource;

const DEFAULTS: AdapterDefaults = AdapterDefaults {
    name: "isbndb",
    class: ProviderClass::Paid,
    capabilities: CapabilitySet::RESOLVE_ISBN
        .union(CapabilitySet::FETCH_METADATA)
        .union(CapabilitySet::FETCH_COVER)
        .union(CapabilitySet::BATCH_FETCH_METADATA),
    priority: 0,
    min_interval: Duration::from_millis(1000),
    cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
    negative_ttl: DAY,
    batch: Some(BatchSpec {
        max_size: 100,
        scope: IsbnScope::LatinScript,
    }),
};

const DEFAULT_SECRET: &str = "ISBNDB_API_KEY";
const DEFAULT_DAILY_LIMIT: u64 = 1000;
const DEFAULT_RESERVE: u64 = 50;

#[derive(Debug, Default, Deserialize)]
struct BookEnvelope {
    book: Option<IsbndbBook>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    books: Vec<IsbndbBook>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchEnvelope {
    #[serde(default)]
    data: Vec<IsbndbBook>,
}

#[derive(Debug, Default, Deserialize)]
struct IsbndbBook {
    #[serde(default)]
    title: String,
    title_long: Option<String>,
    isbn13: Option<String>,
    isbn: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    date_published: Option<String>,
    synopsis: Option<String>,
    overview: Option<String>,
    #[serde(default)]
    subjects: Vec<String>,
    pages: Option<u32>,
    language: Option<String>,
    image: Option<String>,
}

impl IsbndbBook {
    fn isbn(&self) -> Option<Isbn> {
        self.isbn13
            .iter()
            .chain(self.isbn.iter())
            .find_map(|raw| Isbn::parse(raw).ok())
    }

    fn into_metadata(self, isbn: Option<Isbn>) -> BookMetadata {
        let subtitle = self.title_long.as_deref().and_then(|long| {
            long.strip_prefix(self.title.as_str())
                .map(|rest| rest.trim_start_matches([':', ' ']).trim().to_string())
                .filter(|rest| !rest.is_empty())
        });
        BookMetadata {
            isbn,
            title: self.title,
            subtitle,
            authors: self.authors,
            publisher: self.publisher,
            published_date: self.date_published,
            description: self.synopsis.or(self.overview),
            subjects: self.subjects,
            page_count: self.pages,
            language: self.language,
            cover_url: self.image,
        }
    }
}

pub struct Isbndb {
    descriptor: ProviderDescriptor,
    runtime: ProviderRuntime,
    secrets: Arc<dyn SecretSource>,
    secret: String,
    base_url: String,
    profile: ScoringProfile,
}

/// Daily budget for `config`, with the plan defaults filled in.
pub fn quota_policy(config: &ProviderConfig) -> QuotaPolicy {
    QuotaPolicy {
        daily_limit: config.daily_limit.unwrap_or(DEFAULT_DAILY_LIMIT),
        reserve: config.quota_reserve.unwrap_or(DEFAULT_RESERVE),
        reset_hour_utc: config.reset_hour_utc.unwrap_or(0),
    }
}

impl Isbndb {
    pub fn new(config: &ProviderConfig, deps: &ProviderDeps) -> Self {
        let descriptor = DEFAULTS.descriptor(config);
        let runtime = ProviderRuntime::new(&descriptor, deps).with_quota(quota_policy(config));
        Self {
            descriptor,
            runtime,
            secrets: Arc::clone(&deps.secrets),
            secret: config.secret.clone().unwrap_or_else(|| DEFAULT_SECRET.to_string()),
            base_url: base_url(config, "https://api2.isbndb.com"),
            profile: ScoringProfile::default(),
        }
    }

    pub fn secret_name(&self) -> &str {
        &self.secret
    }

    pub fn runtime(&self) -> &ProviderRuntime {
        &self.runtime
    }

    async fn authorized(&self, request: FetchRequest) -> Result<FetchRequest, ProviderError> {
        let key = api_key(self.secrets.as_ref(), self.name(), &self.secret).await?;
        Ok(request.header("Authorization", key))
    }

    fn candidate(&self, book: IsbndbBook, isbn: Option<Isbn>) -> Candidate<BookMetadata> {
        let metadata = book.into_metadata(isbn);
        let confidence = score(
            &self.profile,
            ScoreQuery::ByIdentifier,
            &Evidence::from_metadata(&metadata),
        );
        Candidate::new(metadata, confidence, self.name())
    }

    /// `{base}/books/{title}` with the title as one encoded path segment.
    fn title_url(&self, title: &str) -> Result<String, ProviderError> {
        let mut url = reqwest::Url::parse(&format!("{}/books", self.base_url))
            .map_err(|e| ProviderError::malformed(self.name(), format!("bad base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ProviderError::malformed(self.name(), "base URL cannot have a path"))?
            .push(title);
        Ok(url.into())
    }
}

#[async_trait]
impl Provider for Isbndb {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self, _ctx: &ResolveContext) -> bool {
        matches!(self.secrets.get_secret(&self.secret).await, Ok(Some(_)))
            && self.runtime.has_quota().await
    }

    async fn resolve_isbn(&self, query: &TitleQuery) -> ProviderResult<IsbnMatch> {
        self.runtime
            .cached("resolve", &query.cache_identifier(), || async {
                let request = FetchRequest::get(self.title_url(&query.title)?)
                    .query("column", "title")
                    .query("pageSize", "20");
                let Some(body) = self.runtime.fetch(self.authorized(request).await?).await? else {
                    return Ok(None);
                };
                let response: SearchEnvelope = self.runtime.decode(body)?;

                let mut best: Option<Candidate<IsbnMatch>> = None;
                for book in response.books {
                    let Some(isbn) = book.isbn() else {
                        continue;
                    };
                    let metadata = book.into_metadata(Some(isbn.clone()));
                    let confidence = score(
                        &self.profile,
                        query.into(),
                        &Evidence::from_metadata(&metadata),
                    );
                    if best.as_ref().map_or(true, |b| confidence > b.confidence) {
                        let found = IsbnMatch {
                            isbn,
                            title: metadata.title,
                            authors: metadata.authors,
                        };
                        best = Some(Candidate::new(found, confidence, self.name()));
                    }
                }
                Ok(best)
            })
            .await
    }

    async fn fetch_metadata(&self, isbn: &Isbn) -> ProviderResult<BookMetadata> {
        self.runtime
            .cached("metadata", isbn.as_str(), || async {
                let request = FetchRequest::get(format!("{}/book/{isbn}", self.base_url));
                let Some(body) = self.runtime.fetch(self.authorized(request).await?).await? else {
                    return Ok(None);
                };
                let envelope: BookEnvelope = self.runtime.decode(body)?;
                Ok(envelope
                    .book
                    .map(|book| self.candidate(book, Some(isbn.clone()))))
            })
            .await
    }

    async fn fetch_cover(&self, isbn: &Isbn) -> ProviderResult<CoverImage> {
        let Some(candidate) = self.fetch_metadata(isbn).await? else {
            return Ok(None);
        };
        let confidence = candidate.confidence;
        Ok(candidate.value.cover_url.map(|url| {
            Candidate::new(
                CoverImage {
                    url,
                    size: CoverSize::Large,
                },
                confidence,
                self.name(),
            )
        }))
    }

    async fn batch_fetch_metadata(
        &self,
        isbns: &[Isbn],
    ) -> Result<HashMap<Isbn, Candidate<BookMetadata>>, ProviderError> {
        self.runtime
            .cached_many("metadata", isbns, |misses| async move {
                let joined = misses
                    .iter()
                    .map(Isbn::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                let request = FetchRequest::post_form(
                    format!("{}/books", self.base_url),
                    vec![("isbns".to_string(), joined)],
                );
                let Some(body) = self.runtime.fetch(self.authorized(request).await?).await? else {
                    return Ok(HashMap::new());
                };
                let envelope: BatchEnvelope = self.runtime.decode(body)?;

                let mut found = HashMap::new();
                for book in envelope.data {
                    let Some(isbn) = book.isbn() else {
                        continue;
                    };
                    // Only keys that were asked for; the API may echo extras.
                    if misses.contains(&isbn) {
                        let candidate = self.candidate(book, Some(isbn.clone()));
                        found.insert(isbn, candidate);
                    }
                }
                Ok(found)
            })
            .await
    }
}
