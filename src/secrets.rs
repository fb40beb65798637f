//! Credential lookup for providers that need an API key.
//!
//! A missing secret is not an error: the provider reports itself unavailable
//! and the fallback chain moves on.

use std::collections::HashMap;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret backend failed: {0}")]
    Backend(String),
}

/// Asynchronous source of named secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Look up `name`. `Ok(None)` means the secret is not configured.
    async fn get_secret(&self, name: &str) -> Result<Option<String>, SecretError>;
}

/// Reads secrets from process environment variables.
///
/// Empty values count as unset.
#[derive(Debug, Default, Clone)]
pub struct EnvSecrets {
    prefix: Option<String>,
}

impl EnvSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `prefix` to every looked-up name, e.g. `BOOKFORGED_`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

#[async_trait]
impl SecretSource for EnvSecrets {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, SecretError> {
        let var = match &self.prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        };
        match std::env::var(&var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::Backend(format!(
                "environment variable {var} is not valid unicode"
            ))),
        }
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, SecretError> {
        Ok(self.values.get(name).cloned())
    }
}
