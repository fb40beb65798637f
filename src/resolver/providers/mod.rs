//! Adapters for the external book data sources.
//!
//! Each adapter owns a [`ProviderRuntime`](super::runtime::ProviderRuntime)
//! and reads its descriptor from the matching `[[providers]]` config entry,
//! falling back to the adapter's own defaults.

mod archive_org;
mod gemini;
mod google_books;
mod isbndb;
mod open_library;
mod wikidata;

pub use archive_org::ArchiveOrg;
pub use gemini::Gemini;
pub use google_books::GoogleBooks;
pub use isbndb::{quota_policy, Isbndb};
pub use open_library::OpenLibrary;
pub use wikidata::Wikidata;

use std::sync::Arc;
use std::time::Duration;

use bookforged_common::ProviderClass;
use tracing::{info, warn};

use super::capability::CapabilitySet;
use super::provider::{BatchSpec, CacheTtl, Provider, ProviderDescriptor, ProviderError};
use super::runtime::ProviderDeps;
use crate::config::{Config, ProviderConfig, ProviderKind};
use crate::secrets::SecretSource;

/// Adapter defaults, overridden field by field by [`ProviderConfig`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdapterDefaults {
    pub name: &'static str,
    pub class: ProviderClass,
    pub capabilities: CapabilitySet,
    pub priority: u8,
    pub min_interval: Duration,
    pub cache_ttl: Duration,
    pub negative_ttl: Duration,
    pub batch: Option<BatchSpec>,
}

impl AdapterDefaults {
    pub fn descriptor(&self, config: &ProviderConfig) -> ProviderDescriptor {
        ProviderDescriptor {
            name: self.name,
            class: self.class,
            capabilities: self.capabilities,
            priority: config.priority.unwrap_or(self.priority),
            min_interval: config
                .min_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(self.min_interval),
            cache_ttl: CacheTtl {
                positive: config
                    .cache_ttl_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.cache_ttl),
                negative: config
                    .negative_ttl_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.negative_ttl),
            },
            batch: self.batch.map(|spec| BatchSpec {
                max_size: config.max_batch_size.unwrap_or(spec.max_size),
                ..spec
            }),
        }
    }
}

pub(crate) const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configured endpoint without a trailing slash.
pub(crate) fn base_url(config: &ProviderConfig, default: &str) -> String {
    config
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Look up an API key. Missing or unreadable keys make the provider
/// unavailable rather than failing the request.
pub(crate) async fn api_key(
    secrets: &dyn SecretSource,
    provider: &'static str,
    secret: &str,
) -> Result<String, ProviderError> {
    match secrets.get_secret(secret).await {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(ProviderError::Unavailable {
            provider,
            reason: format!("secret {secret} is not set"),
        }),
        Err(e) => Err(ProviderError::Unavailable {
            provider,
            reason: e.to_string(),
        }),
    }
}

/// Strip a Markdown code fence from model output.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Instantiate every enabled provider in `config`.
///
/// Providers whose credentials are missing are still registered; they report
/// themselves unavailable until the secret appears.
pub async fn build_providers(config: &Config, deps: &ProviderDeps) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    for entry in config.providers.iter().filter(|p| p.enabled) {
        let (provider, secret): (Arc<dyn Provider>, Option<String>) = match entry.name {
            ProviderKind::OpenLibrary => (Arc::new(OpenLibrary::new(entry, deps)), None),
            ProviderKind::GoogleBooks => (Arc::new(GoogleBooks::new(entry, deps)), None),
            ProviderKind::ArchiveOrg => (Arc::new(ArchiveOrg::new(entry, deps)), None),
            ProviderKind::Wikidata => (Arc::new(Wikidata::new(entry, deps)), None),
            ProviderKind::Isbndb => {
                let provider = Isbndb::new(entry, deps);
                let secret = provider.secret_name().to_string();
                (Arc::new(provider), Some(secret))
            }
            ProviderKind::Gemini => {
                let provider = Gemini::new(entry, deps);
                let secret = provider.secret_name().to_string();
                (Arc::new(provider), Some(secret))
            }
        };

        if let Some(secret) = secret {
            if !matches!(deps.secrets.get_secret(&secret).await, Ok(Some(_))) {
                warn!(
                    provider = provider.name(),
                    secret = %secret,
                    "Provider is enabled but its secret is not set; it will be skipped"
                );
            }
        }

        info!(
            provider = provider.name(),
            class = %provider.descriptor().class,
            priority = provider.descriptor().priority,
            "Registered provider"
        );
        providers.push(provider);
    }

    providers
}
