//! Open Library: free, broad coverage, the first stop for most capabilities.

use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::{Isbn, ProviderClass};
use serde::Deserialize;
use serde_json::Value;

use super::{base_url, AdapterDefaults, DAY};
use crate::config::ProviderConfig;
use crate::http::FetchRequest;
use crate::resolver::capability::CapabilitySet;
use crate::resolver::provider::*;
use crate::resolver::runtime::{ProviderDeps, ProviderRuntime};
use crate::resolver::scoring::{score, Evidence, ScoreQuery, ScoringProfile};

const DEFAULTS: AdapterDefaults = AdapterDefaults {
    name: "open_library",
    class: ProviderClass::Free,
    capabilities: CapabilitySet::RESOLVE_ISBN
        .union(CapabilitySet::FETCH_METADATA)
        .union(CapabilitySet::FETCH_COVER)
        .union(CapabilitySet::FETCH_SUBJECTS)
        .union(CapabilitySet::FETCH_RATINGS)
        .union(CapabilitySet::FETCH_EDITION_VARIANTS),
    priority: 0,
    min_interval: Duration::from_millis(1000),
    cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
    negative_ttl: DAY,
    batch: None,
};

const SEARCH_LIMIT: &str = "10";

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
    first_publish_year: Option<i32>,
    cover_i: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Excerpt {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Covers {
    small: Option<String>,
    medium: Option<String>,
    large: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BookData {
    #[serde(default)]
    title: String,
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<Named>,
    #[serde(default)]
    publishers: Vec<Named>,
    publish_date: Option<String>,
    #[serde(default)]
    subjects: Vec<Named>,
    number_of_pages: Option<u32>,
    #[serde(default)]
    excerpts: Vec<Excerpt>,
    cover: Option<Covers>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyRef {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct EditionRecord {
    #[serde(default)]
    works: Vec<KeyRef>,
}

#[derive(Debug, Default, Deserialize)]
struct RatingsResponse {
    summary: Option<RatingsSummary>,
}

#[derive(Debug, Default, Deserialize)]
struct RatingsSummary {
    average: Option<f64>,
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct EditionsResponse {
    #[serde(default)]
    entries: Vec<EditionEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct EditionEntry {
    title: Option<String>,
    #[serde(default)]
    isbn_13: Vec<String>,
    #[serde(default)]
    isbn_10: Vec<String>,
    #[serde(default)]
    languages: Vec<KeyRef>,
    publish_date: Option<String>,
}

/// Prefer an ISBN-13 from a list of raw identifiers.
fn best_isbn<'a>(raw: impl IntoIterator<Item = &'a String>) -> Option<Isbn> {
    let parsed: Vec<(usize, Isbn)> = raw
        .into_iter()
        .filter_map(|s| Isbn::parse(s).ok().map(|isbn| (s.len(), isbn)))
        .collect();
    parsed
        .iter()
        .find(|(len, _)| *len == 13)
        .or_else(|| parsed.first())
        .map(|(_, isbn)| isbn.clone())
}

/// `/languages/eng` -> `eng`.
fn language_code(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}

impl BookData {
    fn into_metadata(self, isbn: &Isbn) -> BookMetadata {
        let cover_url = self
            .cover
            .and_then(|c| c.large.or(c.medium).or(c.small));
        BookMetadata {
            isbn: Some(isbn.clone()),
            title: self.title,
            subtitle: self.subtitle,
            authors: self.authors.into_iter().map(|a| a.name).collect(),
            publisher: self.publishers.into_iter().next().map(|p| p.name),
            published_date: self.publish_date,
            description: self
                .excerpts
                .into_iter()
                .map(|e| e.text)
                .find(|t| !t.trim().is_empty()),
            subjects: self.subjects.into_iter().map(|s| s.name).collect(),
            page_count: self.number_of_pages,
            language: None,
            cover_url,
        }
    }
}

pub struct OpenLibrary {
    descriptor: ProviderDescriptor,
    runtime: ProviderRuntime,
    base_url: String,
    profile: ScoringProfile,
}

impl OpenLibrary {
    pub fn new(config: &ProviderConfig, deps: &ProviderDeps) -> Self {
        let descriptor = DEFAULTS.descriptor(config);
        let runtime = ProviderRuntime::new(&descriptor, deps);
        Self {
            descriptor,
            runtime,
            base_url: base_url(config, "https://openlibrary.org"),
            profile: ScoringProfile::default(),
        }
    }

    async fn get(&self, request: FetchRequest) -> Result<Option<Value>, ProviderError> {
        self.runtime.fetch(request).await
    }

    /// The work an edition belongs to, e.g. `/works/OL1168083W`.
    async fn work_key(&self, isbn: &Isbn) -> Result<Option<String>, ProviderError> {
        let Some(body) = self
            .get(FetchRequest::get(format!("{}/isbn/{isbn}.json", self.base_url)))
            .await?
        else {
            return Ok(None);
        };
        let edition: EditionRecord = self.runtime.decode(body)?;
        Ok(edition.works.into_iter().next().map(|w| w.key))
    }
}

#[async_trait]
impl Provider for OpenLibrary {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self, _ctx: &ResolveContext) -> bool {
        true
    }

    async fn resolve_isbn(&self, query: &TitleQuery) -> ProviderResult<IsbnMatch> {
        self.runtime
            .cached("resolve", &query.cache_identifier(), || async {
                let mut request = FetchRequest::get(format!("{}/search.json", self.base_url))
                    .query("title", query.title.as_str())
                    .query("fields", "title,author_name,isbn,first_publish_year,cover_i")
                    .query("limit", SEARCH_LIMIT);
                if let Some(author) = &query.author {
                    request = request.query("author", author.as_str());
                }

                let Some(body) = self.get(request).await? else {
                    return Ok(None);
                };
                let response: SearchResponse = self.runtime.decode(body)?;

                let mut best: Option<Candidate<IsbnMatch>> = None;
                for doc in response.docs {
                    let Some(isbn) = best_isbn(&doc.isbn) else {
                        continue;
                    };
                    let year = doc.first_publish_year.map(|y| y.to_string());
                    let evidence = Evidence {
                        title: &doc.title,
                        authors: &doc.author_name,
                        has_cover: doc.cover_i.is_some(),
                        published_date: year.as_deref(),
                        ..Default::default()
                    };
                    let confidence = score(&self.profile, query.into(), &evidence);
                    if best.as_ref().map_or(true, |b| confidence > b.confidence) {
                        let found = IsbnMatch {
                            isbn,
                            title: doc.title,
                            authors: doc.author_name,
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
                let bibkey = format!("ISBN:{isbn}");
                let request = FetchRequest::get(format!("{}/api/books", self.base_url))
                    .query("bibkeys", bibkey.as_str())
                    .query("format", "json")
                    .query("jscmd", "data");

                let Some(mut body) = self.get(request).await? else {
                    return Ok(None);
                };
                let Some(entry) = body.get_mut(&bibkey).map(Value::take) else {
                    return Ok(None);
                };
                let data: BookData = self.runtime.decode(entry)?;
                let metadata = data.into_metadata(isbn);
                let confidence = score(
                    &self.profile,
                    ScoreQuery::ByIdentifier,
                    &Evidence::from_metadata(&metadata),
                );
                Ok(Some(Candidate::new(metadata, confidence, self.name())))
            })
            .await
    }

    async fn fetch_cover(&self, isbn: &Isbn) -> ProviderResult<CoverImage> {
        let Some(candidate) = self.fetch_metadata(isbn).await? else {
            return Ok(None);
        };
        let confidence = candidate.confidence;
        let Some(url) = candidate.value.cover_url else {
            return Ok(None);
        };
        let size = if url.ends_with("-L.jpg") {
            CoverSize::Large
        } else if url.ends_with("-S.jpg") {
            CoverSize::Small
        } else {
            CoverSize::Medium
        };
        Ok(Some(Candidate::new(CoverImage { url, size }, confidence, self.name())))
    }

    async fn fetch_subjects(&self, isbn: &Isbn) -> ProviderResult<Vec<String>> {
        let Some(candidate) = self.fetch_metadata(isbn).await? else {
            return Ok(None);
        };
        if candidate.value.subjects.is_empty() {
            return Ok(None);
        }
        Ok(Some(candidate.map(|m| m.subjects)))
    }

    async fn fetch_ratings(&self, isbn: &Isbn) -> ProviderResult<Ratings> {
        self.runtime
            .cached("ratings", isbn.as_str(), || async {
                let Some(work) = self.work_key(isbn).await? else {
                    return Ok(None);
                };
                let Some(body) = self
                    .get(FetchRequest::get(format!("{}{work}/ratings.json", self.base_url)))
                    .await?
                else {
                    return Ok(None);
                };
                let response: RatingsResponse = self.runtime.decode(body)?;
                let ratings = response.summary.and_then(|s| match s.average {
                    Some(average) if s.count > 0 => Some(Ratings {
                        average,
                        count: s.count,
                    }),
                    _ => None,
                });
                // More ratings, more trust.
                Ok(ratings.map(|r| {
                    let confidence = 50 + r.count.min(50) as u8;
                    Candidate::new(r, confidence, self.name())
                }))
            })
            .await
    }

    async fn fetch_edition_variants(&self, isbn: &Isbn) -> ProviderResult<Vec<EditionVariant>> {
        self.runtime
            .cached("editions", isbn.as_str(), || async {
                let Some(work) = self.work_key(isbn).await? else {
                    return Ok(None);
                };
                let request = FetchRequest::get(format!("{}{work}/editions.json", self.base_url))
                    .query("limit", "50");
                let Some(body) = self.get(request).await? else {
                    return Ok(None);
                };
                let response: EditionsResponse = self.runtime.decode(body)?;

                let variants: Vec<EditionVariant> = response
                    .entries
                    .into_iter()
                    .filter_map(|entry| {
                        let variant_isbn = best_isbn(entry.isbn_13.iter().chain(&entry.isbn_10))?;
                        (variant_isbn != *isbn).then(|| EditionVariant {
                            isbn: variant_isbn,
                            title: entry.title,
                            language: entry.languages.first().map(|l| language_code(&l.key)),
                            published_date: entry.publish_date,
                        })
                    })
                    .collect();

                if variants.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Candidate::new(variants, 70, self.name())))
            })
            .await
    }
}
