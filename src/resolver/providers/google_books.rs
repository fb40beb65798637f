//! Google Books volumes API. Free; an API key raises the anonymous limits
//! but is not required.

use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::{Isbn, ProviderClass};
use serde::Deserialize;

use super::{base_url, AdapterDefaults, DAY};
use crate::config::ProviderConfig;
use crate::http::FetchRequest;
use crate::resolver::capability::CapabilitySet;
use crate::resolver::provider::*;
use crate::resolver::runtime::{ProviderDeps, ProviderRuntime};
use crate::resolver::scoring::{score, Evidence, ScoreQuery, ScoringProfile};
use crate::secrets::SecretSource;

const DEFAULTS: AdapterDefaults = AdapterDefaults {
    name: "google_books",
    class: ProviderClass::Free,
    capabilities: CapabilitySet::RESOLVE_ISBN
        .union(CapabilitySet::FETCH_METADATA)
        .union(CapabilitySet::FETCH_COVER),
    priority: 1,
    min_interval: Duration::from_millis(500),
    cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
    negative_ttl: DAY,
    batch: None,
};

const DEFAULT_SECRET: &str = "GOOGLE_BOOKS_API_KEY";

#[derive(Debug, Default, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Default, Deserialize)]
struct Volume {
    #[serde(rename = "volumeInfo", default)]
    info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    #[serde(default)]
    title: String,
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    published_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    page_count: Option<u32>,
    language: Option<String>,
    image_links: Option<ImageLinks>,
    #[serde(default)]
    industry_identifiers: Vec<IndustryIdentifier>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    small_thumbnail: Option<String>,
    thumbnail: Option<String>,
    medium: Option<String>,
    large: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

impl VolumeInfo {
    fn isbn(&self) -> Option<Isbn> {
        ["ISBN_13", "ISBN_10"].iter().find_map(|kind| {
            self.industry_identifiers
                .iter()
                .find(|id| id.kind == *kind)
                .and_then(|id| Isbn::parse(&id.identifier).ok())
        })
    }

    /// Largest image offered, upgraded to https.
    fn cover(&self) -> Option<CoverImage> {
        let links = self.image_links.as_ref()?;
        let (url, size) = [
            (&links.large, CoverSize::Large),
            (&links.medium, CoverSize::Medium),
            (&links.thumbnail, CoverSize::Small),
            (&links.small_thumbnail, CoverSize::Small),
        ]
        .into_iter()
        .find_map(|(url, size)| url.as_ref().map(|u| (u, size)))?;
        Some(CoverImage {
            url: url.replacen("http://", "https://", 1),
            size,
        })
    }

    fn into_metadata(self, isbn: Option<Isbn>) -> BookMetadata {
        let cover_url = self.cover().map(|c| c.url);
        BookMetadata {
            isbn,
            title: self.title,
            subtitle: self.subtitle,
            authors: self.authors,
            publisher: self.publisher,
            published_date: self.published_date,
            description: self.description,
            subjects: self.categories,
            page_count: self.page_count,
            language: self.language,
            cover_url,
        }
    }
}

pub struct GoogleBooks {
    descriptor: ProviderDescriptor,
    runtime: ProviderRuntime,
    secrets: std::sync::Arc<dyn SecretSource>,
    secret: String,
    base_url: String,
    profile: ScoringProfile,
}

impl GoogleBooks {
    pub fn new(config: &ProviderConfig, deps: &ProviderDeps) -> Self {
        let descriptor = DEFAULTS.descriptor(config);
        let runtime = ProviderRuntime::new(&descriptor, deps);
        Self {
            descriptor,
            runtime,
            secrets: deps.secrets.clone(),
            secret: config.secret.clone().unwrap_or_else(|| DEFAULT_SECRET.to_string()),
            base_url: base_url(config, "https://www.googleapis.com/books/v1"),
            profile: ScoringProfile::default(),
        }
    }

    async fn volumes(&self, q: String) -> Result<Vec<Volume>, ProviderError> {
        let mut request = FetchRequest::get(format!("{}/volumes", self.base_url))
            .query("q", q)
            .query("maxResults", "10");
        if let Ok(Some(key)) = self.secrets.get_secret(&self.secret).await {
            request = request.query("key", key);
        }
        match self.runtime.fetch(request).await? {
            Some(body) => Ok(self.runtime.decode::<VolumesResponse>(body)?.items),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Provider for GoogleBooks {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self, _ctx: &ResolveContext) -> bool {
        true
    }

    async fn resolve_isbn(&self, query: &TitleQuery) -> ProviderResult<IsbnMatch> {
        self.runtime
            .cached("resolve", &query.cache_identifier(), || async {
                let mut q = format!("intitle:{}", query.title);
                if let Some(author) = &query.author {
                    q.push_str(&format!("+inauthor:{author}"));
                }

                let mut best: Option<Candidate<IsbnMatch>> = None;
                for volume in self.volumes(q).await? {
                    let Some(isbn) = volume.info.isbn() else {
                        continue;
                    };
                    let metadata = volume.info.into_metadata(Some(isbn.clone()));
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
                let volume = self.volumes(format!("isbn:{isbn}")).await?.into_iter().next();
                Ok(volume.map(|v| {
                    let metadata = v.info.into_metadata(Some(isbn.clone()));
                    let confidence = score(
                        &self.profile,
                        ScoreQuery::ByIdentifier,
                        &Evidence::from_metadata(&metadata),
                    );
                    Candidate::new(metadata, confidence, self.name())
                }))
            })
            .await
    }

    async fn fetch_cover(&self, isbn: &Isbn) -> ProviderResult<CoverImage> {
        self.runtime
            .cached("cover", isbn.as_str(), || async {
                let volume = self.volumes(format!("isbn:{isbn}")).await?.into_iter().next();
                Ok(volume
                    .and_then(|v| v.info.cover())
                    .map(|cover| {
                        let confidence = match cover.size {
                            CoverSize::Large => 80,
                            CoverSize::Medium => 70,
                            CoverSize::Small => 55,
                        };
                        Candidate::new(cover, confidence, self.name())
                    }))
            })
            .await
    }
}
