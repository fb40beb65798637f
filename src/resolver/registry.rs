//! Capability registry.
//!
//! Maps each [`Capability`] to the providers that declare it, in fallback
//! order: free before paid before ai, then by in-class priority, then by
//! registration order. The ordering is computed once at construction; lookups
//! do no I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::capability::Capability;
use super::provider::Provider;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{0}' registered more than once")]
    DuplicateProvider(&'static str),
}

/// Ordered providers per capability.
///
/// ```rust,ignore
/// let registry = ProviderRegistry::new(vec![open_library, isbndb])?;
/// for provider in registry.providers_for(Capability::FetchCover) {
///     // free providers first
/// }
/// ```
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    by_capability: HashMap<Capability, Vec<Arc<dyn Provider>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self, RegistryError> {
        let mut names = HashSet::new();
        for provider in &providers {
            if !names.insert(provider.name()) {
                return Err(RegistryError::DuplicateProvider(provider.name()));
            }
        }

        // Stable sort keeps registration order for equal keys.
        let mut ordered = providers;
        ordered.sort_by_key(|p| {
            let d = p.descriptor();
            (d.class, d.priority)
        });

        let mut by_capability: HashMap<Capability, Vec<Arc<dyn Provider>>> = HashMap::new();
        for provider in &ordered {
            for capability in provider.descriptor().capabilities.capabilities() {
                by_capability
                    .entry(capability)
                    .or_default()
                    .push(Arc::clone(provider));
            }
        }

        Ok(Self {
            providers: ordered,
            by_capability,
        })
    }

    /// Providers declaring `capability`, in fallback order.
    pub fn providers_for(&self, capability: Capability) -> &[Arc<dyn Provider>] {
        self.by_capability
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Every registered provider, in fallback order.
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Capabilities served by at least one provider.
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.by_capability.contains_key(c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
