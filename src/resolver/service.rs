//! The caller-facing resolution API.
//!
//! Every method is total: malformed input, exhausted chains, and provider
//! failures all come back as `None`. An ISBN that fails validation never
//! reaches the network.

use std::collections::BTreeMap;
use std::sync::Arc;

use bookforged_common::Isbn;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::batch::{BatchOutcome, BatchResolver};
use super::cache::NegativeCache;
use super::capability::Capability;
use super::orchestrator::{Orchestrator, Resolution};
use super::provider::*;

pub struct BookResolver {
    orchestrator: Arc<Orchestrator>,
    batch: BatchResolver,
    absent: NegativeCache,
}

impl BookResolver {
    pub fn new(orchestrator: Arc<Orchestrator>, batch: BatchResolver, absent: NegativeCache) -> Self {
        Self {
            orchestrator,
            batch,
            absent,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn batch(&self) -> &BatchResolver {
        &self.batch
    }

    /// Parse `raw` and drop identifiers already known to have no data.
    async fn admit(&self, capability: Capability, raw: &str) -> Option<Isbn> {
        let isbn = match Isbn::parse(raw) {
            Ok(isbn) => isbn,
            Err(e) => {
                warn!(identifier = raw, capability = %capability, error = %e, "Rejecting invalid ISBN");
                return None;
            }
        };
        if self.absent.is_known_absent(capability, &isbn).await {
            debug!(isbn = %isbn, capability = %capability, "Known absent; skipping providers");
            return None;
        }
        Some(isbn)
    }

    /// Record a definitive absence and hand back the candidate, if any.
    async fn settle<T>(&self, isbn: &Isbn, resolution: Resolution<T>) -> Option<Candidate<T>> {
        if resolution.is_definitive_absence() {
            self.absent.remember_absent(resolution.capability, isbn).await;
        }
        resolution.into_candidate()
    }

    pub async fn remember_absent(&self, capability: Capability, isbn: &Isbn) {
        self.absent.remember_absent(capability, isbn).await;
    }

    /// Best-matching ISBN for a title and optional author.
    pub async fn resolve_isbn(
        &self,
        title: &str,
        author: Option<&str>,
        ctx: &ResolveContext,
    ) -> Option<Candidate<IsbnMatch>> {
        if title.trim().is_empty() {
            warn!("Rejecting ISBN lookup with an empty title");
            return None;
        }
        let query = TitleQuery::new(title.trim(), author.map(str::trim).filter(|a| !a.is_empty()));
        self.orchestrator
            .resolve_isbn(&query, ctx)
            .await
            .into_candidate()
    }

    pub async fn fetch_metadata(&self, isbn: &str, ctx: &ResolveContext) -> Option<Candidate<BookMetadata>> {
        let isbn = self.admit(Capability::FetchMetadata, isbn).await?;
        let resolution = self.orchestrator.fetch_metadata(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn fetch_cover(&self, isbn: &str, ctx: &ResolveContext) -> Option<Candidate<CoverImage>> {
        let isbn = self.admit(Capability::FetchCover, isbn).await?;
        let resolution = self.orchestrator.fetch_cover(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn fetch_subjects(&self, isbn: &str, ctx: &ResolveContext) -> Option<Candidate<Vec<String>>> {
        let isbn = self.admit(Capability::FetchSubjects, isbn).await?;
        let resolution = self.orchestrator.fetch_subjects(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn check_public_domain(
        &self,
        isbn: &str,
        ctx: &ResolveContext,
    ) -> Option<Candidate<PublicDomainStatus>> {
        let isbn = self.admit(Capability::CheckPublicDomain, isbn).await?;
        let resolution = self.orchestrator.check_public_domain(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn fetch_ratings(&self, isbn: &str, ctx: &ResolveContext) -> Option<Candidate<Ratings>> {
        let isbn = self.admit(Capability::FetchRatings, isbn).await?;
        let resolution = self.orchestrator.fetch_ratings(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn fetch_edition_variants(
        &self,
        isbn: &str,
        ctx: &ResolveContext,
    ) -> Option<Candidate<Vec<EditionVariant>>> {
        let isbn = self.admit(Capability::FetchEditionVariants, isbn).await?;
        let resolution = self.orchestrator.fetch_edition_variants(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn fetch_series(&self, isbn: &str, ctx: &ResolveContext) -> Option<Candidate<SeriesInfo>> {
        let isbn = self.admit(Capability::FetchSeries, isbn).await?;
        let resolution = self.orchestrator.fetch_series(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn fetch_awards(&self, isbn: &str, ctx: &ResolveContext) -> Option<Candidate<Vec<Award>>> {
        let isbn = self.admit(Capability::FetchAwards, isbn).await?;
        let resolution = self.orchestrator.fetch_awards(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn fetch_translations(
        &self,
        isbn: &str,
        ctx: &ResolveContext,
    ) -> Option<Candidate<Vec<Translation>>> {
        let isbn = self.admit(Capability::FetchTranslations, isbn).await?;
        let resolution = self.orchestrator.fetch_translations(&isbn, ctx).await;
        self.settle(&isbn, resolution).await
    }

    pub async fn generate_books(
        &self,
        prompt: &str,
        count: usize,
        ctx: &ResolveContext,
    ) -> Option<Candidate<Vec<GeneratedBook>>> {
        if prompt.trim().is_empty() || count == 0 {
            return None;
        }
        let request = GenerateRequest {
            prompt: prompt.trim().to_string(),
            count,
        };
        self.orchestrator
            .generate_books(&request, ctx)
            .await
            .into_candidate()
    }

    /// Metadata for many ISBNs. Every requested string is a key in the
    /// result; invalid and unresolved identifiers map to `None`.
    pub async fn batch_fetch_metadata<S: AsRef<str>>(
        &self,
        isbns: &[S],
        ctx: &ResolveContext,
    ) -> BTreeMap<String, Option<Candidate<BookMetadata>>> {
        let outcome = self.batch_until_done(isbns, ctx).await;
        for isbn in &outcome.not_found {
            self.absent
                .remember_absent(Capability::FetchMetadata, isbn)
                .await;
        }

        isbns
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                let candidate = Isbn::parse(raw)
                    .ok()
                    .and_then(|isbn| outcome.found.get(&isbn).cloned());
                (raw.to_string(), candidate)
            })
            .collect()
    }

    /// Run the batch resolver until nothing is deferred.
    pub async fn batch_until_done<S: AsRef<str>>(&self, isbns: &[S], ctx: &ResolveContext) -> BatchOutcome {
        let mut total = self.batch.resolve(isbns, ctx).await;
        while !total.deferred.is_empty() {
            let deferred = std::mem::take(&mut total.deferred);
            let next = self.batch.resolve(deferred.as_slice(), ctx).await;
            total.found.extend(next.found);
            total.not_found.extend(next.not_found);
            total.unconfirmed.extend(next.unconfirmed);
            total.failed.extend(next.failed);
            total.deferred = next.deferred;
        }
        total
    }

    /// Resolve any ISBN-keyed capability with a JSON payload. Returns `None`
    /// for capabilities that are not keyed on a single ISBN.
    ///
    /// Known-absent identifiers come back as an empty resolution without
    /// consulting providers.
    pub async fn resolve_json(
        &self,
        capability: Capability,
        isbn: &Isbn,
        ctx: &ResolveContext,
    ) -> Option<Resolution<Value>> {
        fn json<T: Serialize>(resolution: Resolution<T>) -> Resolution<Value> {
            resolution.map(|v| serde_json::to_value(v).unwrap_or_default())
        }

        let orch = &self.orchestrator;
        let keyed = !matches!(
            capability,
            Capability::ResolveIsbn | Capability::GenerateBooks | Capability::BatchFetchMetadata
        );
        if keyed && self.absent.is_known_absent(capability, isbn).await {
            return Some(Resolution {
                capability,
                candidate: None,
                trace: Vec::new(),
            });
        }

        let resolution = match capability {
            Capability::FetchMetadata => json(orch.fetch_metadata(isbn, ctx).await),
            Capability::FetchCover => json(orch.fetch_cover(isbn, ctx).await),
            Capability::FetchSubjects => json(orch.fetch_subjects(isbn, ctx).await),
            Capability::CheckPublicDomain => json(orch.check_public_domain(isbn, ctx).await),
            Capability::FetchRatings => json(orch.fetch_ratings(isbn, ctx).await),
            Capability::FetchEditionVariants => json(orch.fetch_edition_variants(isbn, ctx).await),
            Capability::FetchSeries => json(orch.fetch_series(isbn, ctx).await),
            Capability::FetchAwards => json(orch.fetch_awards(isbn, ctx).await),
            Capability::FetchTranslations => json(orch.fetch_translations(isbn, ctx).await),
            Capability::ResolveIsbn | Capability::GenerateBooks | Capability::BatchFetchMetadata => {
                return None
            }
        };
        Some(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::capability::CapabilitySet;
    use crate::resolver::registry::ProviderRegistry;
    use crate::store::MemoryStore;
    use crate::test_support::{StubAnswer, StubProvider};
    use bookforged_common::ProviderClass;
    use std::time::Duration;

    fn service(providers: Vec<Arc<dyn Provider>>) -> BookResolver {
        let registry = Arc::new(ProviderRegistry::new(providers).unwrap());
        let orchestrator = Arc::new(Orchestrator::new(registry, Duration::from_secs(5)));
        let absent = NegativeCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(600));
        let batch = BatchResolver::new(
            Arc::clone(&orchestrator),
            absent.clone(),
            Duration::from_secs(5),
            4,
        );
        BookResolver::new(orchestrator, batch, absent)
    }

    #[tokio::test]
    async fn invalid_isbn_makes_no_provider_call() {
        let stub = StubProvider::new("covers", ProviderClass::Free, CapabilitySet::FETCH_COVER)
            .answer(StubAnswer::Found(90))
            .shared();
        let resolver = service(vec![stub.clone()]);

        assert!(resolver.fetch_cover("978-0-00-000000-0", &ResolveContext::new()).await.is_none());
        assert!(resolver.fetch_cover("", &ResolveContext::new()).await.is_none());
        assert_eq!(stub.calls(), 0);

        let cover = resolver
            .fetch_cover("0-451-52493-4", &ResolveContext::new())
            .await
            .unwrap();
        assert_eq!(cover.source, "covers");
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn known_absent_isbn_is_not_requeried() {
        let stub = StubProvider::new("ratings", ProviderClass::Free, CapabilitySet::FETCH_RATINGS).shared();
        let resolver = service(vec![stub.clone()]);
        let ctx = ResolveContext::new();

        assert!(resolver.fetch_ratings("9780451524935", &ctx).await.is_none());
        assert!(resolver.fetch_ratings("9780451524935", &ctx).await.is_none());
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_not_remembered() {
        let stub = StubProvider::new("flaky", ProviderClass::Free, CapabilitySet::FETCH_SERIES)
            .answer(StubAnswer::Fail)
            .shared();
        let resolver = service(vec![stub.clone()]);
        let ctx = ResolveContext::new();

        assert!(resolver.fetch_series("9780451524935", &ctx).await.is_none());
        assert!(resolver.fetch_series("9780451524935", &ctx).await.is_none());
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn free_only_miss_does_not_hide_paid_provider() {
        let free = StubProvider::new("open_free", ProviderClass::Free, CapabilitySet::FETCH_METADATA).shared();
        let paid = StubProvider::new("metered", ProviderClass::Paid, CapabilitySet::FETCH_METADATA)
            .answer(StubAnswer::Found(90))
            .shared();
        let resolver = service(vec![free.clone(), paid.clone()]);

        assert!(resolver
            .fetch_metadata("9780451524935", &ResolveContext::free_only())
            .await
            .is_none());
        assert_eq!(paid.calls(), 0);

        let found = resolver
            .fetch_metadata("9780451524935", &ResolveContext::new())
            .await
            .unwrap();
        assert_eq!(found.source, "metered");
        assert_eq!(paid.calls(), 1);
        assert_eq!(free.calls(), 2);
    }

    #[tokio::test]
    async fn batch_miss_falls_through_to_free_providers() {
        let free = StubProvider::new("open_free", ProviderClass::Free, CapabilitySet::FETCH_METADATA)
            .answer(StubAnswer::Found(80))
            .shared();
        let bulk = StubProvider::new(
            "bulk",
            ProviderClass::Paid,
            CapabilitySet::BATCH_FETCH_METADATA | CapabilitySet::FETCH_METADATA,
        )
        .batch(100, IsbnScope::Any, &[])
        .shared();
        let resolver = service(vec![free.clone(), bulk.clone()]);
        let ctx = ResolveContext::new();

        let mapping = resolver.batch_fetch_metadata(&["9780441172719"], &ctx).await;
        assert_eq!(mapping["9780441172719"].as_ref().unwrap().source, "open_free");
        // One batch request, no single lookup against the batch provider.
        assert_eq!(bulk.batch_requests().len(), 1);
        assert_eq!(bulk.calls(), 1);
        assert_eq!(free.calls(), 1);

        let single = resolver.fetch_metadata("9780441172719", &ctx).await.unwrap();
        assert_eq!(single.source, "open_free");
    }

    #[tokio::test]
    async fn batch_mapping_covers_every_key() {
        let bulk = StubProvider::new(
            "bulk",
            ProviderClass::Paid,
            CapabilitySet::BATCH_FETCH_METADATA | CapabilitySet::FETCH_METADATA,
        )
        .batch(1, IsbnScope::Any, &["9780451524935", "9780547928227"])
        .shared();
        let resolver = service(vec![bulk.clone()]);

        let keys = ["9780451524935", "9780441172719", "9780547928227", "bogus"];
        let mapping = resolver
            .batch_fetch_metadata(&keys, &ResolveContext::new())
            .await;

        assert_eq!(mapping.len(), 4);
        assert!(mapping["9780451524935"].is_some());
        assert!(mapping["9780441172719"].is_none());
        assert!(mapping["9780547928227"].is_some());
        assert!(mapping["bogus"].is_none());
        // One identifier per request, three requests.
        assert_eq!(bulk.batch_requests().len(), 3);
    }

    #[tokio::test]
    async fn resolve_json_rejects_unkeyed_capabilities() {
        let resolver = service(Vec::new());
        let isbn = Isbn::parse("9780451524935").unwrap();
        let ctx = ResolveContext::new();
        assert!(resolver
            .resolve_json(Capability::GenerateBooks, &isbn, &ctx)
            .await
            .is_none());
        let resolution = resolver
            .resolve_json(Capability::FetchAwards, &isbn, &ctx)
            .await
            .unwrap();
        assert!(resolution.is_definitive_absence());
    }

    #[tokio::test]
    async fn resolve_json_serializes_payload() {
        let stub = StubProvider::new("covers", ProviderClass::Free, CapabilitySet::FETCH_COVER)
            .answer(StubAnswer::Found(77))
            .shared();
        let resolver = service(vec![stub]);
        let isbn = Isbn::parse("9780451524935").unwrap();
        let resolution = resolver
            .resolve_json(Capability::FetchCover, &isbn, &ResolveContext::new())
            .await
            .unwrap();
        let candidate = resolution.candidate.unwrap();
        assert_eq!(candidate.confidence, 77);
        assert_eq!(candidate.value["size"], "large");
    }

    #[tokio::test]
    async fn empty_generation_request_is_none() {
        let stub = StubProvider::new("ai", ProviderClass::Ai, CapabilitySet::GENERATE_BOOKS)
            .answer(StubAnswer::Found(50))
            .shared();
        let resolver = service(vec![stub.clone()]);
        let ctx = ResolveContext::new();
        assert!(resolver.generate_books("  ", 3, &ctx).await.is_none());
        let books = resolver.generate_books("cozy mysteries", 2, &ctx).await.unwrap();
        assert_eq!(books.value.len(), 2);
        assert_eq!(stub.calls(), 1);
    }
}
