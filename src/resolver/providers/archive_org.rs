//! Internet Archive: the archival source for public-domain status and scans.

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
use crate::resolver::scoring::{
    publication_year, score, Evidence, ScoreQuery, ScoringProfile, PUBLIC_DOMAIN_CUTOFF_YEAR,
};

const DEFAULTS: AdapterDefaults = AdapterDefaults {
    name: "archive_org",
    class: ProviderClass::Free,
    capabilities: CapabilitySet::CHECK_PUBLIC_DOMAIN.union(CapabilitySet::FETCH_COVER),
    priority: 2,
    min_interval: Duration::from_millis(1000),
    cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
    negative_ttl: DAY,
    batch: None,
};

const FIELDS: [&str; 6] = ["identifier", "title", "creator", "year", "date", "licenseurl"];

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    response: SearchBody,
}

#[derive(Debug, Default, Deserialize)]
struct SearchBody {
    #[serde(default)]
    docs: Vec<ArchiveDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct ArchiveDoc {
    identifier: String,
    #[serde(default)]
    title: Option<Value>,
    #[serde(default)]
    creator: Option<Value>,
    #[serde(default)]
    year: Option<Value>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    licenseurl: Option<String>,
}

/// Archive metadata fields are a string or a list of strings.
fn strings(value: &Option<Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::Number(n)) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

impl ArchiveDoc {
    fn year(&self) -> Option<i32> {
        strings(&self.year)
            .iter()
            .chain(self.date.iter())
            .find_map(|s| publication_year(s))
    }

    fn is_public_domain_licensed(&self) -> bool {
        self.licenseurl
            .as_deref()
            .is_some_and(|url| url.contains("publicdomain"))
    }
}

pub struct ArchiveOrg {
    descriptor: ProviderDescriptor,
    runtime: ProviderRuntime,
    base_url: String,
    profile: ScoringProfile,
}

impl ArchiveOrg {
    pub fn new(config: &ProviderConfig, deps: &ProviderDeps) -> Self {
        let descriptor = DEFAULTS.descriptor(config);
        let runtime = ProviderRuntime::new(&descriptor, deps);
        Self {
            descriptor,
            runtime,
            base_url: base_url(config, "https://archive.org"),
            profile: ScoringProfile::archival(),
        }
    }

    async fn search(&self, isbn: &Isbn) -> Result<Vec<ArchiveDoc>, ProviderError> {
        let mut request = FetchRequest::get(format!("{}/advancedsearch.php", self.base_url))
            .query("q", format!("isbn:{isbn}"))
            .query("rows", "10")
            .query("output", "json");
        for field in FIELDS {
            request = request.query("fl[]", field);
        }
        match self.runtime.fetch(request).await? {
            Some(body) => Ok(self.runtime.decode::<SearchResponse>(body)?.response.docs),
            None => Ok(Vec::new()),
        }
    }

    fn confidence(&self, doc: &ArchiveDoc, has_cover: bool) -> u8 {
        let title = strings(&doc.title).into_iter().next().unwrap_or_default();
        let authors = strings(&doc.creator);
        let year = doc.year().map(|y| y.to_string());
        let evidence = Evidence {
            title: &title,
            authors: &authors,
            has_cover,
            published_date: year.as_deref(),
            ..Default::default()
        };
        score(&self.profile, ScoreQuery::ByIdentifier, &evidence)
    }
}

#[async_trait]
impl Provider for ArchiveOrg {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self, _ctx: &ResolveContext) -> bool {
        true
    }

    async fn check_public_domain(&self, isbn: &Isbn) -> ProviderResult<PublicDomainStatus> {
        self.runtime
            .cached("public_domain", isbn.as_str(), || async {
                let docs = self.search(isbn).await?;

                // The earliest dated scan is the best first-publication proxy.
                let Some(doc) = docs
                    .iter()
                    .filter(|d| d.year().is_some())
                    .min_by_key(|d| d.year())
                    .or_else(|| docs.first())
                else {
                    return Ok(None);
                };

                let year = doc.year();
                let (is_public_domain, reason) = if doc.is_public_domain_licensed() {
                    (true, format!("{} is marked public domain", doc.identifier))
                } else {
                    match year {
                        Some(y) if y < PUBLIC_DOMAIN_CUTOFF_YEAR => (
                            true,
                            format!("published {y}, before {PUBLIC_DOMAIN_CUTOFF_YEAR}"),
                        ),
                        Some(y) => (
                            false,
                            format!("published {y}, not before {PUBLIC_DOMAIN_CUTOFF_YEAR}"),
                        ),
                        None => (false, "publication year unknown".to_string()),
                    }
                };

                let status = PublicDomainStatus {
                    is_public_domain,
                    reason,
                    first_published_year: year,
                };
                Ok(Some(Candidate::new(
                    status,
                    self.confidence(doc, false),
                    self.name(),
                )))
            })
            .await
    }

    async fn fetch_cover(&self, isbn: &Isbn) -> ProviderResult<CoverImage> {
        self.runtime
            .cached("cover", isbn.as_str(), || async {
                let docs = self.search(isbn).await?;
                Ok(docs.first().map(|doc| {
                    let cover = CoverImage {
                        url: format!("{}/services/img/{}", self.base_url, doc.identifier),
                        size: CoverSize::Medium,
                    };
                    Candidate::new(cover, self.confidence(doc, true), self.name())
                }))
            })
            .await
    }
}
