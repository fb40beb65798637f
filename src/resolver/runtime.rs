//! Per-provider plumbing shared by every adapter.
//!
//! A [`ProviderRuntime`] wraps the order of operations each adapter follows
//! for a network-backed capability:
//!
//! 1. Response cache (hit or confirmed absent answers without network).
//! 2. Quota check for metered providers.
//! 3. Shared rate-limit wait.
//! 4. The request itself, then quota recording whatever the outcome.
//! 5. Cache write for positive and negative answers. Errors are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bookforged_common::Isbn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::cache::{CacheLookup, ResponseCache};
use super::provider::{Candidate, CacheTtl, ProviderDescriptor, ProviderError, ProviderResult};
use super::quota::{QuotaManager, QuotaPolicy};
use super::rate_limit::RateLimiter;
use crate::clock::SharedClock;
use crate::http::{FetchRequest, JsonFetcher};
use crate::secrets::SecretSource;
use crate::store::KvStore;

/// Handles every adapter is built from.
#[derive(Clone)]
pub struct ProviderDeps {
    pub fetcher: Arc<dyn JsonFetcher>,
    pub store: Arc<dyn KvStore>,
    pub secrets: Arc<dyn SecretSource>,
    pub clock: SharedClock,
}

pub struct ProviderRuntime {
    name: &'static str,
    fetcher: Arc<dyn JsonFetcher>,
    store: Arc<dyn KvStore>,
    clock: SharedClock,
    cache: ResponseCache,
    limiter: RateLimiter,
    min_interval: Duration,
    ttl: CacheTtl,
    quota: Option<QuotaManager>,
}

impl ProviderRuntime {
    pub fn new(descriptor: &ProviderDescriptor, deps: &ProviderDeps) -> Self {
        Self {
            name: descriptor.name,
            fetcher: Arc::clone(&deps.fetcher),
            store: Arc::clone(&deps.store),
            clock: Arc::clone(&deps.clock),
            cache: ResponseCache::new(Arc::clone(&deps.store)),
            limiter: RateLimiter::new(Arc::clone(&deps.store), Arc::clone(&deps.clock)),
            min_interval: descriptor.min_interval,
            ttl: descriptor.cache_ttl,
            quota: None,
        }
    }

    /// Meter this provider against a daily quota.
    pub fn with_quota(mut self, policy: QuotaPolicy) -> Self {
        self.quota = Some(QuotaManager::new(
            self.name,
            policy,
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
        ));
        self
    }

    pub fn quota(&self) -> Option<&QuotaManager> {
        self.quota.as_ref()
    }

    /// Whether one more call fits in the quota. Unmetered providers always
    /// have room.
    pub async fn has_quota(&self) -> bool {
        match &self.quota {
            Some(quota) => quota.check_quota(1, quota.policy().reserve).await.allowed,
            None => true,
        }
    }

    /// Answer from cache, or run `fetch` and cache what it returns.
    pub async fn cached<T, F, Fut>(
        &self,
        operation: &str,
        identifier: &str,
        fetch: F,
    ) -> ProviderResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let key = ResponseCache::key(self.name, operation, identifier);
        match self.cache.get::<Candidate<T>>(&key).await {
            CacheLookup::Hit(candidate) => return Ok(Some(candidate)),
            CacheLookup::Absent => return Ok(None),
            CacheLookup::Miss => {}
        }

        let result = fetch().await?;
        match &result {
            Some(candidate) => self.cache.put(&key, candidate, self.ttl.positive).await,
            None => self.cache.put_absent(&key, self.ttl.negative).await,
        }
        Ok(result)
    }

    /// Batch form of [`cached`](Self::cached): only cache misses reach
    /// `fetch`, and every identifier sent is cached as found or absent.
    pub async fn cached_many<T, F, Fut>(
        &self,
        operation: &str,
        isbns: &[Isbn],
        fetch: F,
    ) -> Result<HashMap<Isbn, Candidate<T>>, ProviderError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Vec<Isbn>) -> Fut,
        Fut: Future<Output = Result<HashMap<Isbn, Candidate<T>>, ProviderError>>,
    {
        let mut found = HashMap::new();
        let mut misses = Vec::new();
        for isbn in isbns {
            let key = ResponseCache::key(self.name, operation, isbn.as_str());
            match self.cache.get::<Candidate<T>>(&key).await {
                CacheLookup::Hit(candidate) => {
                    found.insert(isbn.clone(), candidate);
                }
                CacheLookup::Absent => {}
                CacheLookup::Miss => misses.push(isbn.clone()),
            }
        }

        if misses.is_empty() {
            debug!(provider = self.name, count = isbns.len(), "Batch served from cache");
            return Ok(found);
        }

        let fetched = fetch(misses.clone()).await?;
        for isbn in &misses {
            let key = ResponseCache::key(self.name, operation, isbn.as_str());
            match fetched.get(isbn) {
                Some(candidate) => self.cache.put(&key, candidate, self.ttl.positive).await,
                None => self.cache.put_absent(&key, self.ttl.negative).await,
            }
        }
        found.extend(fetched);
        Ok(found)
    }

    /// Issue one request. A 404 is `Ok(None)`.
    pub async fn fetch(&self, request: FetchRequest) -> Result<Option<Value>, ProviderError> {
        if let Some(quota) = &self.quota {
            let check = quota.check_quota(1, quota.policy().reserve).await;
            if !check.allowed {
                debug!(
                    provider = self.name,
                    reason = check.reason.as_deref().unwrap_or_default(),
                    "Skipping request; quota exhausted"
                );
                return Err(ProviderError::QuotaExhausted {
                    provider: self.name,
                });
            }
        }

        self.limiter.wait(self.name, self.min_interval).await;
        let result = self.fetcher.fetch_json(request).await;

        if let Some(quota) = &self.quota {
            // Failure is logged by the quota manager and carried forward.
            let _ = quota.record_api_call(1).await;
        }

        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T, ProviderError> {
        serde_json::from_value(value).map_err(|e| ProviderError::malformed(self.name, e))
    }
}
