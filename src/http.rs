//! HTTP transport: "fetch JSON over HTTP" behind the [`JsonFetcher`] trait.
//!
//! Provider adapters never talk to `reqwest` directly. They build a
//! [`FetchRequest`] and get back parsed JSON or a [`FetchError`]. The
//! production [`HttpFetcher`] applies, for every request:
//!
//! - A process-wide token bucket via [`governor`], as a ceiling on top of the
//!   per-provider distributed rate limiter.
//! - A request timeout.
//! - Retry with backoff on HTTP 429 and 5xx, honoring `Retry-After`.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on a server-requested `Retry-After` wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Request / error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A single JSON request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<FetchBody>,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(FetchBody::Json(body)),
            ..Self::get(url)
        }
    }

    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            body: Some(FetchBody::Form(fields)),
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of the first query parameter named `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The server answered 404: the resource does not exist.
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("invalid JSON from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// 404 is a definitive answer; everything else may succeed on retry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Fetch JSON over HTTP.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch_json(&self, request: FetchRequest) -> Result<Value, FetchError>;
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

/// [`JsonFetcher`] backed by a shared [`reqwest::Client`].
pub struct HttpFetcher {
    client: reqwest::Client,
    default_timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            default_timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.backoff_ms),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn build(&self, request: &FetchRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(FetchBody::Json(body)) => builder.json(body),
            Some(FetchBody::Form(fields)) => builder.form(fields),
            None => builder,
        };
        builder.timeout(request.timeout.unwrap_or(self.default_timeout))
    }

    fn backoff(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) => Duration::from_secs(secs).min(MAX_RETRY_AFTER),
            None => self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1)),
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl JsonFetcher for HttpFetcher {
    async fn fetch_json(&self, request: FetchRequest) -> Result<Value, FetchError> {
        let url = request.url.clone();
        let mut retries = 0u32;

        loop {
            self.rate_limiter.until_ready().await;
            debug!(url = %url, attempt = retries + 1, "Sending request");

            let resp = self.build(&request).send().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout { url: url.clone() }
                } else {
                    FetchError::Network {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

            let status = resp.status();
            if is_retryable(status) && retries < self.max_retries {
                retries += 1;
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                let wait = self.backoff(retries, retry_after);
                warn!(
                    url = %url,
                    status = status.as_u16(),
                    retry = retries,
                    wait_ms = wait.as_millis() as u64,
                    "Retryable response, backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(FetchError::NotFound { url });
            }
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url,
                });
            }

            return resp.json::<Value>().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout { url: url.clone() }
                } else {
                    FetchError::Decode {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&HttpConfig {
            timeout_secs: 5,
            max_retries: 2,
            backoff_ms: 5,
            requests_per_second: 1000,
            user_agent: "bookforged-test".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn get_with_query_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/volumes"))
            .and(query_param("q", "isbn:9780451524935"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalItems": 1})))
            .mount(&server)
            .await;

        let value = fetcher()
            .fetch_json(
                FetchRequest::get(format!("{}/volumes", server.uri()))
                    .query("q", "isbn:9780451524935"),
            )
            .await
            .unwrap();
        assert_eq!(value["totalItems"], 1);
    }

    #[tokio::test]
    async fn post_json_sends_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/books"))
            .and(header("Authorization", "secret"))
            .and(body_json(json!({"isbns": ["9780451524935"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let value = fetcher()
            .fetch_json(
                FetchRequest::post_json(
                    format!("{}/books", server.uri()),
                    json!({"isbns": ["9780451524935"]}),
                )
                .header("Authorization", "secret"),
            )
            .await
            .unwrap();
        assert_eq!(value, json!({"data": []}));
    }

    #[tokio::test]
    async fn not_found_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_json(FetchRequest::get(format!("{}/isbn/x.json", server.uri())))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let value = fetcher()
            .fetch_json(FetchRequest::get(server.uri()))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_json(FetchRequest::get(server.uri()))
            .await
            .unwrap_err();
        assert_matches!(err, FetchError::Status { status: 429, .. });
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_json(FetchRequest::get(server.uri()))
            .await
            .unwrap_err();
        assert_matches!(err, FetchError::Status { status: 401, .. });
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_json(FetchRequest::get(server.uri()))
            .await
            .unwrap_err();
        assert_matches!(err, FetchError::Decode { .. });
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_json(FetchRequest::get(server.uri()).timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_matches!(err, FetchError::Timeout { .. });
    }

    #[test]
    fn backoff_prefers_retry_after_and_caps_it() {
        let f = fetcher();
        assert_eq!(f.backoff(1, Some(3)), Duration::from_secs(3));
        assert_eq!(f.backoff(1, Some(600)), MAX_RETRY_AFTER);
        assert_eq!(f.backoff(1, None), Duration::from_millis(5));
        assert_eq!(f.backoff(3, None), Duration::from_millis(20));
    }
}
