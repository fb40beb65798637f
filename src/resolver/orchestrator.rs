//! Fallback chain across providers.
//!
//! [`Orchestrator::resolve`] walks the registry's ordered providers for one
//! capability. Providers the context disallows, or that report themselves
//! unavailable, are skipped. Each remaining provider runs under a timeout,
//! and any failure (network, timeout, malformed payload) is logged and
//! treated as "no result from this provider". The chain always completes.
//!
//! The capability's [`SelectionMode`] decides when to stop: first match, or
//! best confidence within the first tier that produced anything.

use std::sync::Arc;
use std::time::Duration;

use bookforged_common::{Isbn, ProviderClass};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use super::capability::{Capability, SelectionMode};
use super::provider::*;
use super::registry::ProviderRegistry;

/// What happened when a provider was consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The context does not allow this provider's class.
    SkippedDisallowed,
    /// Missing credentials or closed quota.
    SkippedUnavailable,
    /// Answered: no data.
    NoResult,
    Found { confidence: u8 },
    /// Answered, but under the configured minimum confidence.
    BelowThreshold { confidence: u8 },
    QuotaExhausted,
    TimedOut,
    Failed { error: String },
}

impl AttemptOutcome {
    /// The provider answered authoritatively, with or without data.
    pub fn is_answer(&self) -> bool {
        matches!(
            self,
            Self::NoResult | Self::Found { .. } | Self::BelowThreshold { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Failed { .. })
    }

    /// Skipped for reasons tied to this call's context or today's quota.
    /// Another caller, or the same caller tomorrow, may reach the provider.
    pub fn is_context_skip(&self) -> bool {
        matches!(self, Self::SkippedDisallowed | Self::QuotaExhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderAttempt {
    pub provider: &'static str,
    pub class: ProviderClass,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Result of running the chain for one capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    pub capability: Capability,
    pub candidate: Option<Candidate<T>>,
    /// Per-provider record, in the order consulted.
    pub trace: Vec<ProviderAttempt>,
}

impl<T> Resolution<T> {
    pub fn is_found(&self) -> bool {
        self.candidate.is_some()
    }

    /// Nothing found, and at least one provider failed rather than answering.
    /// A retry might change the outcome.
    pub fn is_transient(&self) -> bool {
        self.candidate.is_none() && self.trace.iter().any(|a| a.outcome.is_failure())
    }

    /// Nothing found, no provider failed, and none was passed over because
    /// of the caller's context or an exhausted quota.
    pub fn is_definitive_absence(&self) -> bool {
        self.candidate.is_none()
            && !self.is_transient()
            && !self.trace.iter().any(|a| a.outcome.is_context_skip())
    }

    pub fn into_candidate(self) -> Option<Candidate<T>> {
        self.candidate
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        Resolution {
            capability: self.capability,
            candidate: self.candidate.map(|c| c.map(f)),
            trace: self.trace,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    provider_timeout: Duration,
    min_confidence: u8,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, provider_timeout: Duration) -> Self {
        Self {
            registry,
            provider_timeout,
            min_confidence: 0,
        }
    }

    /// Discard candidates scoring under `min_confidence`.
    pub fn with_min_confidence(mut self, min_confidence: u8) -> Self {
        self.min_confidence = min_confidence.min(100);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Run `op` against the capability's providers in fallback order.
    pub async fn resolve<'a, T, F>(
        &self,
        capability: Capability,
        ctx: &ResolveContext,
        op: F,
    ) -> Resolution<T>
    where
        T: Send + 'a,
        F: Fn(Arc<dyn Provider>) -> BoxFuture<'a, ProviderResult<T>>,
    {
        let span = info_span!("resolve", request_id = %ctx.request_id, capability = %capability);
        async {
            let mode = capability.selection_mode();
            let mut trace = Vec::new();
            let mut best: Option<Candidate<T>> = None;
            let mut tier: Option<ProviderClass> = None;

            for provider in self.registry.providers_for(capability) {
                let name = provider.name();
                let class = provider.descriptor().class;

                if mode == SelectionMode::BestWithinTier && best.is_some() && tier != Some(class) {
                    debug!(capability = %capability, "Tier produced a candidate; not escalating");
                    break;
                }
                tier = Some(class);

                let record = |outcome| ProviderAttempt {
                    provider: name,
                    class,
                    outcome,
                };

                if !ctx.permits(class) {
                    trace.push(record(AttemptOutcome::SkippedDisallowed));
                    continue;
                }
                if ctx.has_answered(name) {
                    debug!(provider = name, capability = %capability, "Already answered with no data");
                    trace.push(record(AttemptOutcome::NoResult));
                    continue;
                }
                if !provider.is_available(ctx).await {
                    debug!(provider = name, capability = %capability, "Provider unavailable; skipping");
                    trace.push(record(AttemptOutcome::SkippedUnavailable));
                    continue;
                }

                let outcome = match tokio::time::timeout(self.provider_timeout, op(Arc::clone(provider))).await {
                    Err(_) => {
                        warn!(
                            provider = name,
                            capability = %capability,
                            timeout_ms = self.provider_timeout.as_millis() as u64,
                            "Provider timed out"
                        );
                        AttemptOutcome::TimedOut
                    }
                    Ok(Err(ProviderError::QuotaExhausted { .. })) => {
                        debug!(provider = name, "Quota exhausted mid-chain; skipping");
                        AttemptOutcome::QuotaExhausted
                    }
                    Ok(Err(e)) => {
                        warn!(provider = name, capability = %capability, error = %e, "Provider failed");
                        AttemptOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                    Ok(Ok(None)) => AttemptOutcome::NoResult,
                    Ok(Ok(Some(candidate))) if candidate.confidence < self.min_confidence => {
                        debug!(
                            provider = name,
                            confidence = candidate.confidence,
                            "Candidate below minimum confidence"
                        );
                        AttemptOutcome::BelowThreshold {
                            confidence: candidate.confidence,
                        }
                    }
                    Ok(Ok(Some(candidate))) => {
                        let confidence = candidate.confidence;
                        trace.push(record(AttemptOutcome::Found { confidence }));
                        match mode {
                            SelectionMode::FirstMatch => {
                                info!(provider = name, capability = %capability, confidence, "Resolved");
                                return Resolution {
                                    capability,
                                    candidate: Some(candidate),
                                    trace,
                                };
                            }
                            SelectionMode::BestWithinTier => {
                                if best.as_ref().map_or(true, |b| confidence > b.confidence) {
                                    best = Some(candidate);
                                }
                            }
                        }
                        continue;
                    }
                };
                trace.push(record(outcome));
            }

            match &best {
                Some(candidate) => info!(
                    provider = %candidate.source,
                    capability = %capability,
                    confidence = candidate.confidence,
                    "Resolved"
                ),
                None => debug!(capability = %capability, attempts = trace.len(), "No provider had a result"),
            }

            Resolution {
                capability,
                candidate: best,
                trace,
            }
        }
        .instrument(span)
        .await
    }

    pub async fn resolve_isbn(&self, query: &TitleQuery, ctx: &ResolveContext) -> Resolution<IsbnMatch> {
        self.resolve(Capability::ResolveIsbn, ctx, |p| {
            async move { p.resolve_isbn(query).await }.boxed()
        })
        .await
    }

    pub async fn fetch_metadata(&self, isbn: &Isbn, ctx: &ResolveContext) -> Resolution<BookMetadata> {
        self.resolve(Capability::FetchMetadata, ctx, |p| {
            async move { p.fetch_metadata(isbn).await }.boxed()
        })
        .await
    }

    pub async fn fetch_cover(&self, isbn: &Isbn, ctx: &ResolveContext) -> Resolution<CoverImage> {
        self.resolve(Capability::FetchCover, ctx, |p| {
            async move { p.fetch_cover(isbn).await }.boxed()
        })
        .await
    }

    pub async fn fetch_subjects(&self, isbn: &Isbn, ctx: &ResolveContext) -> Resolution<Vec<String>> {
        self.resolve(Capability::FetchSubjects, ctx, |p| {
            async move { p.fetch_subjects(isbn).await }.boxed()
        })
        .await
    }

    pub async fn check_public_domain(
        &self,
        isbn: &Isbn,
        ctx: &ResolveContext,
    ) -> Resolution<PublicDomainStatus> {
        self.resolve(Capability::CheckPublicDomain, ctx, |p| {
            async move { p.check_public_domain(isbn).await }.boxed()
        })
        .await
    }

    pub async fn fetch_ratings(&self, isbn: &Isbn, ctx: &ResolveContext) -> Resolution<Ratings> {
        self.resolve(Capability::FetchRatings, ctx, |p| {
            async move { p.fetch_ratings(isbn).await }.boxed()
        })
        .await
    }

    pub async fn fetch_edition_variants(
        &self,
        isbn: &Isbn,
        ctx: &ResolveContext,
    ) -> Resolution<Vec<EditionVariant>> {
        self.resolve(Capability::FetchEditionVariants, ctx, |p| {
            async move { p.fetch_edition_variants(isbn).await }.boxed()
        })
        .await
    }

    pub async fn fetch_series(&self, isbn: &Isbn, ctx: &ResolveContext) -> Resolution<SeriesInfo> {
        self.resolve(Capability::FetchSeries, ctx, |p| {
            async move { p.fetch_series(isbn).await }.boxed()
        })
        .await
    }

    pub async fn fetch_awards(&self, isbn: &Isbn, ctx: &ResolveContext) -> Resolution<Vec<Award>> {
        self.resolve(Capability::FetchAwards, ctx, |p| {
            async move { p.fetch_awards(isbn).await }.boxed()
        })
        .await
    }

    pub async fn fetch_translations(
        &self,
        isbn: &Isbn,
        ctx: &ResolveContext,
    ) -> Resolution<Vec<Translation>> {
        self.resolve(Capability::FetchTranslations, ctx, |p| {
            async move { p.fetch_translations(isbn).await }.boxed()
        })
        .await
    }

    pub async fn generate_books(
        &self,
        request: &GenerateRequest,
        ctx: &ResolveContext,
    ) -> Resolution<Vec<GeneratedBook>> {
        self.resolve(Capability::GenerateBooks, ctx, |p| {
            async move { p.generate_books(request).await }.boxed()
        })
        .await
    }
}
