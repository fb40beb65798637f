use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Providers to register. Order here does not matter; the registry
    /// orders by class and priority.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            http: HttpConfig::default(),
            resolver: ResolverConfig::default(),
            queue: QueueConfig::default(),
            providers: default_providers(),
        }
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    ProviderKind::ALL
        .iter()
        .map(|kind| ProviderConfig::new(*kind))
        .collect()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Single-process store; state is lost on exit.
    Memory,
    /// Shared SQLite file; survives restarts and is visible to every worker.
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database path (supports `~`).
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("bookforged.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Per-request timeout applied by the transport.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Retries on 429 / 5xx before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base for exponential backoff when no `Retry-After` is sent.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Process-wide ceiling across all providers.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_requests_per_second() -> u32 {
    10
}
fn default_user_agent() -> String {
    format!("bookforged/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            requests_per_second: default_requests_per_second(),
            user_agent: default_user_agent(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Budget for a single provider call, including its rate-limit wait.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Candidates scoring below this are discarded.
    #[serde(default)]
    pub min_confidence: u8,

    /// Concurrent per-identifier lookups when a batch falls back to the
    /// single-identifier chain.
    #[serde(default = "default_fallback_concurrency")]
    pub batch_fallback_concurrency: usize,

    /// Prefix prepended to secret names before looking them up.
    #[serde(default)]
    pub secret_prefix: Option<String>,

    /// How long an ISBN that every provider reported absent is skipped.
    #[serde(default = "default_resolver_negative_ttl")]
    pub negative_ttl_secs: u64,
}

fn default_provider_timeout() -> u64 {
    10
}
fn default_fallback_concurrency() -> usize {
    4
}
fn default_resolver_negative_ttl() -> u64 {
    24 * 60 * 60
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout(),
            min_confidence: 0,
            batch_fallback_concurrency: default_fallback_concurrency(),
            secret_prefix: None,
            negative_ttl_secs: default_resolver_negative_ttl(),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Messages pulled per receive.
    #[serde(default = "default_queue_batch")]
    pub batch_size: usize,

    /// Sleep between empty polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Deliveries before a message is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_queue_batch() -> usize {
    100
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_queue_batch(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenLibrary,
    GoogleBooks,
    ArchiveOrg,
    Wikidata,
    Isbndb,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        Self::OpenLibrary,
        Self::GoogleBooks,
        Self::ArchiveOrg,
        Self::Wikidata,
        Self::Isbndb,
        Self::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenLibrary => "open_library",
            Self::GoogleBooks => "google_books",
            Self::ArchiveOrg => "archive_org",
            Self::Wikidata => "wikidata",
            Self::Isbndb => "isbndb",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-provider settings. Unset fields fall back to the adapter's defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: ProviderKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Order within the provider's class; lower runs first.
    #[serde(default)]
    pub priority: Option<u8>,

    /// Minimum spacing between requests to this provider.
    #[serde(default)]
    pub min_interval_ms: Option<u64>,

    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// TTL for confirmed-absent results.
    #[serde(default)]
    pub negative_ttl_secs: Option<u64>,

    /// Name of the secret holding the API key.
    #[serde(default)]
    pub secret: Option<String>,

    /// Override the API endpoint (testing, proxies).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Daily call budget for metered providers.
    #[serde(default)]
    pub daily_limit: Option<u64>,

    /// Calls held back from routine traffic.
    #[serde(default)]
    pub quota_reserve: Option<u64>,

    /// UTC hour at which the provider's billing day starts.
    #[serde(default)]
    pub reset_hour_utc: Option<u8>,

    #[serde(default)]
    pub max_batch_size: Option<usize>,

    /// Model name for generative providers.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(name: ProviderKind) -> Self {
        Self {
            name,
            enabled: true,
            priority: None,
            min_interval_ms: None,
            cache_ttl_secs: None,
            negative_ttl_secs: None,
            secret: None,
            base_url: None,
            daily_limit: None,
            quota_reserve: None,
            reset_hour_utc: None,
            max_batch_size: None,
            model: None,
        }
    }
}
