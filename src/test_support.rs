//! Shared fixtures for unit tests: broken stores, a scripted HTTP fetcher,
//! a configurable stub provider, and log capture.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::{Isbn, ProviderClass};
use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;

use crate::http::{FetchError, FetchRequest, JsonFetcher};
use crate::resolver::capability::CapabilitySet;
use crate::resolver::provider::*;
use crate::store::{KvStore, MemoryStore, StoreError};

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// A store where every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn increment(&self, _key: &str, _delta: u64, _ttl: Duration) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// A [`MemoryStore`] whose writes can be switched off.
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("write rejected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn increment(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.increment(key, delta, ttl).await
    }
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = SharedBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `fut` with a subscriber that records every event as plain text.
pub async fn capture_logs<F: Future>(fut: F) -> (F::Output, String) {
    let buffer = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();

    let guard = tracing::subscriber::set_default(subscriber);
    let output = fut.await;
    drop(guard);

    let logs = String::from_utf8_lossy(&buffer.0.lock()).into_owned();
    (output, logs)
}

// ---------------------------------------------------------------------------
// Scripted HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Scripted {
    Json(Value),
    NotFound,
    Status(u16),
    Timeout,
}

/// A [`JsonFetcher`] that answers from a list of `(pattern, response)`
/// routes. A route matches when its pattern occurs in the request URL or
/// its rendered query string. Unmatched requests get a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<Vec<(String, Scripted)>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, body: Value) -> Self {
        self.route(pattern, Scripted::Json(body))
    }

    pub fn on_status(self, pattern: &str, status: u16) -> Self {
        self.route(pattern, Scripted::Status(status))
    }

    pub fn on_timeout(self, pattern: &str) -> Self {
        self.route(pattern, Scripted::Timeout)
    }

    pub fn route(self, pattern: &str, response: Scripted) -> Self {
        self.routes.lock().push((pattern.to_string(), response));
        self
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| render(r).contains(pattern))
            .count()
    }
}

fn render(request: &FetchRequest) -> String {
    let query: Vec<String> = request
        .query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{}?{}", request.url, query.join("&"))
}

#[async_trait]
impl JsonFetcher for ScriptedFetcher {
    async fn fetch_json(&self, request: FetchRequest) -> Result<Value, FetchError> {
        let rendered = render(&request);
        let url = request.url.clone();
        self.requests.lock().push(request);

        let response = self
            .routes
            .lock()
            .iter()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());

        match response {
            Some(Scripted::Json(body)) => Ok(body),
            Some(Scripted::Status(status)) => Err(FetchError::Status { status, url }),
            Some(Scripted::Timeout) => Err(FetchError::Timeout { url }),
            Some(Scripted::NotFound) | None => Err(FetchError::NotFound { url }),
        }
    }
}

// ---------------------------------------------------------------------------
// Stub provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubAnswer {
    /// Return a candidate with this confidence.
    Found(u8),
    Absent,
    Fail,
    /// Never answer.
    Hang,
}

/// A provider that answers every capability the same scripted way.
pub struct StubProvider {
    descriptor: ProviderDescriptor,
    available: AtomicBool,
    answer: StubAnswer,
    isbn: Isbn,
    batch_known: Vec<Isbn>,
    batch_fails: bool,
    calls: AtomicUsize,
    batch_requests: Mutex<Vec<Vec<Isbn>>>,
}

impl StubProvider {
    pub fn new(name: &'static str, class: ProviderClass, capabilities: CapabilitySet) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                name,
                class,
                capabilities,
                priority: 0,
                min_interval: Duration::ZERO,
                cache_ttl: CacheTtl {
                    positive: Duration::from_secs(60),
                    negative: Duration::from_secs(60),
                },
                batch: None,
            },
            available: AtomicBool::new(true),
            answer: StubAnswer::Absent,
            isbn: Isbn::parse("9780451524935").unwrap(),
            batch_known: Vec::new(),
            batch_fails: false,
            calls: AtomicUsize::new(0),
            batch_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.descriptor.priority = priority;
        self
    }

    pub fn answer(mut self, answer: StubAnswer) -> Self {
        self.answer = answer;
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn returning_isbn(mut self, isbn: &str) -> Self {
        self.isbn = Isbn::parse(isbn).unwrap();
        self
    }

    /// Answer batch requests for `known`; everything else is absent.
    pub fn batch(mut self, max_size: usize, scope: IsbnScope, known: &[&str]) -> Self {
        self.descriptor.batch = Some(BatchSpec { max_size, scope });
        self.batch_known = known.iter().map(|s| Isbn::parse(s).unwrap()).collect();
        self
    }

    pub fn failing_batch(mut self) -> Self {
        self.batch_fails = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_requests(&self) -> Vec<Vec<Isbn>> {
        self.batch_requests.lock().clone()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    async fn respond<T>(&self, value: T) -> ProviderResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            StubAnswer::Found(confidence) => Ok(Some(Candidate::new(value, confidence, self.name()))),
            StubAnswer::Absent => Ok(None),
            StubAnswer::Fail => Err(ProviderError::malformed(self.name(), "scripted failure")),
            StubAnswer::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self, _ctx: &ResolveContext) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn resolve_isbn(&self, query: &TitleQuery) -> ProviderResult<IsbnMatch> {
        self.respond(IsbnMatch {
            isbn: self.isbn.clone(),
            title: query.title.clone(),
            authors: query.author.iter().cloned().collect(),
        })
        .await
    }

    async fn fetch_metadata(&self, isbn: &Isbn) -> ProviderResult<BookMetadata> {
        self.respond(BookMetadata {
            isbn: Some(isbn.clone()),
            title: format!("{} title", self.name()),
            ..Default::default()
        })
        .await
    }

    async fn fetch_cover(&self, isbn: &Isbn) -> ProviderResult<CoverImage> {
        self.respond(CoverImage {
            url: format!("https://covers.test/{}/{isbn}.jpg", self.name()),
            size: CoverSize::Large,
        })
        .await
    }

    async fn fetch_subjects(&self, _isbn: &Isbn) -> ProviderResult<Vec<String>> {
        self.respond(vec!["Fiction".to_string()]).await
    }

    async fn check_public_domain(&self, _isbn: &Isbn) -> ProviderResult<PublicDomainStatus> {
        self.respond(PublicDomainStatus {
            is_public_domain: false,
            reason: "stub".to_string(),
            first_published_year: None,
        })
        .await
    }

    async fn fetch_ratings(&self, _isbn: &Isbn) -> ProviderResult<Ratings> {
        self.respond(Ratings {
            average: 4.0,
            count: 10,
        })
        .await
    }

    async fn fetch_edition_variants(&self, _isbn: &Isbn) -> ProviderResult<Vec<EditionVariant>> {
        self.respond(Vec::new()).await
    }

    async fn fetch_series(&self, _isbn: &Isbn) -> ProviderResult<SeriesInfo> {
        self.respond(SeriesInfo {
            name: "Stub Cycle".to_string(),
            position: Some("1".to_string()),
        })
        .await
    }

    async fn fetch_awards(&self, _isbn: &Isbn) -> ProviderResult<Vec<Award>> {
        self.respond(Vec::new()).await
    }

    async fn fetch_translations(&self, _isbn: &Isbn) -> ProviderResult<Vec<Translation>> {
        self.respond(Vec::new()).await
    }

    async fn generate_books(&self, request: &GenerateRequest) -> ProviderResult<Vec<GeneratedBook>> {
        let books = (0..request.count)
            .map(|i| GeneratedBook {
                title: format!("Generated {i}"),
                author: "Stub Author".to_string(),
                year: None,
            })
            .collect();
        self.respond(books).await
    }

    async fn batch_fetch_metadata(
        &self,
        isbns: &[Isbn],
    ) -> Result<HashMap<Isbn, Candidate<BookMetadata>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_requests.lock().push(isbns.to_vec());
        if self.batch_fails {
            return Err(ProviderError::Unavailable {
                provider: self.name(),
                reason: "scripted batch failure".to_string(),
            });
        }
        Ok(isbns
            .iter()
            .filter(|isbn| self.batch_known.contains(isbn))
            .map(|isbn| {
                let metadata = BookMetadata {
                    isbn: Some(isbn.clone()),
                    title: format!("Batch {isbn}"),
                    ..Default::default()
                };
                (isbn.clone(), Candidate::new(metadata, 80, self.name()))
            })
            .collect())
    }
}
