//! Multi-identifier metadata lookups.
//!
//! [`BatchResolver::resolve`] collapses many ISBNs into as few network calls
//! as the batch provider allows and reports every requested identifier in
//! exactly one bucket of the returned [`BatchOutcome`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bookforged_common::Isbn;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::cache::NegativeCache;
use super::capability::Capability;
use super::orchestrator::Orchestrator;
use super::provider::{BatchSpec, BookMetadata, Candidate, IsbnScope, Provider, ResolveContext};

/// Where each requested identifier ended up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub found: BTreeMap<Isbn, Candidate<BookMetadata>>,
    /// Confirmed absent.
    pub not_found: Vec<Isbn>,
    /// No data, but a provider was passed over for this context or its
    /// quota. Not confirmed absent.
    pub unconfirmed: Vec<Isbn>,
    /// No answer because a provider failed; worth retrying.
    pub failed: Vec<Isbn>,
    /// Inputs that are not ISBNs.
    pub invalid: Vec<String>,
    /// Valid but beyond the batch size; not attempted.
    pub deferred: Vec<Isbn>,
}

impl BatchOutcome {
    /// Number of distinct valid identifiers accounted for.
    pub fn resolved_count(&self) -> usize {
        self.found.len() + self.not_found.len() + self.unconfirmed.len() + self.failed.len()
    }
}

pub struct BatchResolver {
    orchestrator: Arc<Orchestrator>,
    absent: NegativeCache,
    provider_timeout: Duration,
    fallback_concurrency: usize,
}

impl BatchResolver {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        absent: NegativeCache,
        provider_timeout: Duration,
        fallback_concurrency: usize,
    ) -> Self {
        Self {
            orchestrator,
            absent,
            provider_timeout,
            fallback_concurrency: fallback_concurrency.max(1),
        }
    }

    /// First batch provider this context may use right now.
    async fn batch_provider(&self, ctx: &ResolveContext) -> Option<Arc<dyn Provider>> {
        let registry = self.orchestrator.registry();
        for provider in registry.providers_for(Capability::BatchFetchMetadata) {
            if !ctx.permits(provider.descriptor().class) {
                continue;
            }
            if provider.is_available(ctx).await {
                return Some(Arc::clone(provider));
            }
            debug!(provider = provider.name(), "Batch provider unavailable");
        }
        None
    }

    pub async fn resolve<S: AsRef<str>>(&self, identifiers: &[S], ctx: &ResolveContext) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        // Normalize and de-duplicate, keeping first-seen order.
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for raw in identifiers {
            match Isbn::parse(raw.as_ref()) {
                Ok(isbn) => {
                    if seen.insert(isbn.clone()) {
                        pending.push(isbn);
                    }
                }
                Err(e) => {
                    debug!(identifier = raw.as_ref(), error = %e, "Skipping invalid identifier");
                    outcome.invalid.push(raw.as_ref().to_string());
                }
            }
        }

        let mut live = Vec::with_capacity(pending.len());
        for isbn in pending {
            if self.absent.is_known_absent(Capability::FetchMetadata, &isbn).await {
                outcome.not_found.push(isbn);
            } else {
                live.push(isbn);
            }
        }

        let mut single = Vec::new();
        let mut misses = Vec::new();
        let mut batch_name = None;
        match self.batch_provider(ctx).await {
            Some(provider) => {
                let spec = provider.descriptor().batch.unwrap_or(BatchSpec {
                    max_size: live.len().max(1),
                    scope: IsbnScope::Any,
                });
                let (in_scope, out_of_scope): (Vec<_>, Vec<_>) =
                    live.into_iter().partition(|isbn| spec.scope.accepts(isbn));
                single.extend(out_of_scope);

                let max_size = spec.max_size.max(1);
                let mut chunk = in_scope;
                if chunk.len() > max_size {
                    outcome.deferred = chunk.split_off(max_size);
                }

                if !chunk.is_empty() {
                    batch_name = Some(provider.name());
                    let call = provider.batch_fetch_metadata(&chunk);
                    match tokio::time::timeout(self.provider_timeout, call).await {
                        Ok(Ok(mut results)) => {
                            for isbn in chunk {
                                match results.remove(&isbn) {
                                    Some(candidate) => {
                                        outcome.found.insert(isbn, candidate);
                                    }
                                    None => misses.push(isbn),
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(
                                provider = provider.name(),
                                count = chunk.len(),
                                error = %e,
                                "Batch request failed; falling back to single lookups"
                            );
                            single.extend(chunk);
                        }
                        Err(_) => {
                            warn!(
                                provider = provider.name(),
                                count = chunk.len(),
                                "Batch request timed out; falling back to single lookups"
                            );
                            single.extend(chunk);
                        }
                    }
                }
            }
            None => single = live,
        }

        // Batch misses still get the rest of the chain, minus the batch provider.
        let miss_ctx = batch_name.map(|name| ctx.answered_by(name));
        let lookups = single
            .into_iter()
            .map(|isbn| (isbn, ctx))
            .chain(misses.into_iter().map(|isbn| (isbn, miss_ctx.as_ref().unwrap_or(ctx))));
        self.resolve_singly(lookups, &mut outcome).await;

        outcome.not_found.sort();
        outcome.unconfirmed.sort();
        outcome.failed.sort();

        info!(
            found = outcome.found.len(),
            not_found = outcome.not_found.len(),
            unconfirmed = outcome.unconfirmed.len(),
            failed = outcome.failed.len(),
            invalid = outcome.invalid.len(),
            deferred = outcome.deferred.len(),
            "Batch resolved"
        );
        outcome
    }

    async fn resolve_singly<'c>(
        &self,
        lookups: impl Iterator<Item = (Isbn, &'c ResolveContext)>,
        outcome: &mut BatchOutcome,
    ) {
        let orchestrator = &self.orchestrator;
        let results: Vec<_> = stream::iter(lookups)
            .map(|(isbn, ctx)| async move {
                let resolution = orchestrator.fetch_metadata(&isbn, ctx).await;
                (isbn, resolution)
            })
            .buffer_unordered(self.fallback_concurrency)
            .collect()
            .await;
        if !results.is_empty() {
            debug!(count = results.len(), "Resolved identifiers one at a time");
        }

        for (isbn, resolution) in results {
            if resolution.is_transient() {
                outcome.failed.push(isbn);
            } else if resolution.is_definitive_absence() {
                outcome.not_found.push(isbn);
            } else {
                match resolution.into_candidate() {
                    Some(candidate) => {
                        outcome.found.insert(isbn, candidate);
                    }
                    None => outcome.unconfirmed.push(isbn),
                }
            }
        }
    }
}
