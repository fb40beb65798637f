//! Resolution against mock provider endpoints.
//!
//! Each test points real adapters and the real HTTP fetcher at a wiremock
//! server and drives the engine through its public API.

use std::sync::Arc;

use bookforged::clock::SystemClock;
use bookforged::config::{Config, HttpConfig, ProviderConfig, ProviderKind, StoreBackend};
use bookforged::http::HttpFetcher;
use bookforged::resolver::{Engine, ProviderDeps, ResolveContext};
use bookforged::secrets::StaticSecrets;
use bookforged::store::MemoryStore;
use bookforged_db::pool::init_memory_pool;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORWELL: &str = "9780451524935";
const DUNE: &str = "9780441172719";

fn provider(kind: ProviderKind, server: &MockServer) -> ProviderConfig {
    let mut entry = ProviderConfig::new(kind);
    entry.base_url = Some(server.uri());
    entry.min_interval_ms = Some(0);
    entry
}

fn config(providers: Vec<ProviderConfig>) -> Config {
    let mut config = Config {
        providers,
        ..Config::default()
    };
    config.store.backend = StoreBackend::Memory;
    config
}

async fn engine(config: &Config, secrets: StaticSecrets) -> Engine {
    let http = HttpConfig {
        max_retries: 0,
        ..HttpConfig::default()
    };
    let deps = ProviderDeps {
        fetcher: Arc::new(HttpFetcher::new(&http).unwrap()),
        store: Arc::new(MemoryStore::new()),
        secrets: Arc::new(secrets),
        clock: Arc::new(SystemClock),
    };
    Engine::with_deps(config, deps, init_memory_pool().unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn falls_back_to_next_provider_when_first_has_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("bibkeys", format!("ISBN:{ORWELL}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/volumes"))
        .and(query_param("q", format!("isbn:{ORWELL}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalItems": 1,
            "items": [{"volumeInfo": {
                "title": "1984",
                "authors": ["George Orwell"],
                "industryIdentifiers": [{"type": "ISBN_13", "identifier": ORWELL}]
            }}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(
        &config(vec![
            provider(ProviderKind::OpenLibrary, &server),
            provider(ProviderKind::GoogleBooks, &server),
        ]),
        StaticSecrets::new(),
    )
    .await;

    let found = engine
        .resolver
        .fetch_metadata(ORWELL, &ResolveContext::free_only())
        .await
        .unwrap();
    assert_eq!(found.source, "google_books");
    assert_eq!(found.value.title, "1984");
    assert_eq!(found.value.authors, vec!["George Orwell".to_string()]);
}

#[tokio::test]
async fn definitive_absence_is_not_asked_twice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(
        &config(vec![provider(ProviderKind::OpenLibrary, &server)]),
        StaticSecrets::new(),
    )
    .await;
    let ctx = ResolveContext::free_only();

    assert!(engine.resolver.fetch_metadata(DUNE, &ctx).await.is_none());
    assert!(engine.resolver.fetch_metadata(DUNE, &ctx).await.is_none());
}

#[tokio::test]
async fn provider_outage_is_retried_on_next_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let engine = engine(
        &config(vec![provider(ProviderKind::OpenLibrary, &server)]),
        StaticSecrets::new(),
    )
    .await;
    let ctx = ResolveContext::free_only();

    let first = engine
        .resolver
        .orchestrator()
        .fetch_metadata(&bookforged_common::Isbn::parse(DUNE).unwrap(), &ctx)
        .await;
    assert!(first.is_transient());
    assert!(engine.resolver.fetch_metadata(DUNE, &ctx).await.is_none());
}

#[tokio::test]
async fn batch_uses_one_authorized_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/books"))
        .and(header("Authorization", "isbndb-key"))
        .and(body_string_contains(ORWELL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "requested": 2,
            "data": [{"title": "1984", "isbn13": ORWELL, "authors": ["George Orwell"]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(
        &config(vec![provider(ProviderKind::Isbndb, &server)]),
        StaticSecrets::new().with("ISBNDB_API_KEY", "isbndb-key"),
    )
    .await;

    let results = engine
        .resolver
        .batch_fetch_metadata(&[ORWELL, DUNE, "garbage"], &ResolveContext::new())
        .await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[ORWELL].as_ref().unwrap().value.title, "1984");
    assert!(results[DUNE].is_none());
    assert!(results["garbage"].is_none());

    let statuses = engine.quota_statuses().await.unwrap();
    assert_eq!(statuses[0].used_today, 1);
}

#[tokio::test]
async fn free_only_context_skips_paid_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/book/{ORWELL}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "book": {"title": "1984", "isbn13": ORWELL}
        })))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(
        &config(vec![provider(ProviderKind::Isbndb, &server)]),
        StaticSecrets::new().with("ISBNDB_API_KEY", "isbndb-key"),
    )
    .await;

    let resolution = engine
        .resolver
        .orchestrator()
        .fetch_metadata(
            &bookforged_common::Isbn::parse(ORWELL).unwrap(),
            &ResolveContext::free_only(),
        )
        .await;
    assert!(resolution.candidate.is_none());
    assert!(!resolution.is_transient());
}

#[tokio::test]
async fn batch_miss_is_answered_by_free_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/books"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "requested": 2,
            "data": [{"title": "1984", "isbn13": ORWELL}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("bibkeys", format!("ISBN:{DUNE}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            format!("ISBN:{DUNE}"): {"title": "Dune", "authors": [{"name": "Frank Herbert"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/book/{DUNE}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(
        &config(vec![
            provider(ProviderKind::OpenLibrary, &server),
            provider(ProviderKind::Isbndb, &server),
        ]),
        StaticSecrets::new().with("ISBNDB_API_KEY", "isbndb-key"),
    )
    .await;

    let results = engine
        .resolver
        .batch_fetch_metadata(&[ORWELL, DUNE], &ResolveContext::new())
        .await;
    assert_eq!(results[ORWELL].as_ref().unwrap().source, "isbndb");
    let dune = results[DUNE].as_ref().unwrap();
    assert_eq!(dune.source, "open_library");
    assert_eq!(dune.value.title, "Dune");
}
