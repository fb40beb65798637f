mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;
    expand_paths(&mut config);

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./bookforged.toml",
        "~/.config/bookforged/config.toml",
        "/etc/bookforged/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    expand_paths(&mut config);
    Ok(config)
}

fn expand_paths(config: &mut Config) {
    let raw = config.store.path.to_string_lossy().into_owned();
    config.store.path = PathBuf::from(shellexpand::tilde(&raw).as_ref());
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.resolver.provider_timeout_secs == 0 {
        anyhow::bail!("resolver.provider_timeout_secs cannot be 0");
    }
    if config.resolver.min_confidence > 100 {
        anyhow::bail!(
            "resolver.min_confidence must be between 0 and 100, got {}",
            config.resolver.min_confidence
        );
    }
    if config.resolver.batch_fallback_concurrency == 0 {
        anyhow::bail!("resolver.batch_fallback_concurrency cannot be 0");
    }
    if config.queue.batch_size == 0 {
        anyhow::bail!("queue.batch_size cannot be 0");
    }
    if config.queue.max_attempts == 0 {
        anyhow::bail!("queue.max_attempts cannot be 0");
    }
    if config.http.requests_per_second == 0 {
        anyhow::bail!("http.requests_per_second cannot be 0");
    }

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.name) {
            anyhow::bail!("Provider '{}' is configured more than once", provider.name);
        }
        if provider.daily_limit == Some(0) {
            anyhow::bail!("Provider '{}' has a daily_limit of 0", provider.name);
        }
        // Unset fields fall back to the adapter defaults, so check the
        // policy the adapter will actually run with.
        let (limit, reserve) = if provider.name == ProviderKind::Isbndb {
            let policy = crate::resolver::providers::quota_policy(provider);
            (Some(policy.daily_limit), Some(policy.reserve))
        } else {
            (provider.daily_limit, provider.quota_reserve)
        };
        if let (Some(limit), Some(reserve)) = (limit, reserve) {
            if reserve >= limit {
                anyhow::bail!(
                    "Provider '{}' reserves {} of a {} call budget",
                    provider.name,
                    reserve,
                    limit
                );
            }
        }
        if let Some(hour) = provider.reset_hour_utc {
            if hour > 23 {
                anyhow::bail!(
                    "Provider '{}' reset_hour_utc must be 0-23, got {}",
                    provider.name,
                    hour
                );
            }
        }
        if provider.max_batch_size == Some(0) {
            anyhow::bail!("Provider '{}' has a max_batch_size of 0", provider.name);
        }
    }

    if config.store.backend == StoreBackend::Sqlite {
        if let Some(parent) = config.store.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tracing::warn!("Database directory does not exist: {:?}", parent);
            }
        }
    }

    Ok(())
}
