//! Capabilities: the operations a provider may implement.
//!
//! A provider declares a fixed [`CapabilitySet`]; the registry answers "who
//! supports X" by testing bits rather than by probing provider objects.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// One operation a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ResolveIsbn,
    FetchMetadata,
    FetchCover,
    FetchSubjects,
    CheckPublicDomain,
    FetchRatings,
    FetchEditionVariants,
    FetchSeries,
    FetchAwards,
    FetchTranslations,
    GenerateBooks,
    BatchFetchMetadata,
}

bitflags! {
    /// Set of capabilities declared by a provider.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapabilitySet: u16 {
        const RESOLVE_ISBN = 1 << 0;
        const FETCH_METADATA = 1 << 1;
        const FETCH_COVER = 1 << 2;
        const FETCH_SUBJECTS = 1 << 3;
        const CHECK_PUBLIC_DOMAIN = 1 << 4;
        const FETCH_RATINGS = 1 << 5;
        const FETCH_EDITION_VARIANTS = 1 << 6;
        const FETCH_SERIES = 1 << 7;
        const FETCH_AWARDS = 1 << 8;
        const FETCH_TRANSLATIONS = 1 << 9;
        const GENERATE_BOOKS = 1 << 10;
        const BATCH_FETCH_METADATA = 1 << 11;
    }
}

/// How the orchestrator picks among providers for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Return the first provider's candidate. Providers are pre-ordered so
    /// the first answer is an acceptable cost/quality tradeoff.
    FirstMatch,
    /// Run every available provider in the current class tier and keep the
    /// highest-confidence candidate; escalate to the next tier (free, then
    /// paid, then ai) only when the tier produced nothing.
    BestWithinTier,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Self::ResolveIsbn,
        Self::FetchMetadata,
        Self::FetchCover,
        Self::FetchSubjects,
        Self::CheckPublicDomain,
        Self::FetchRatings,
        Self::FetchEditionVariants,
        Self::FetchSeries,
        Self::FetchAwards,
        Self::FetchTranslations,
        Self::GenerateBooks,
        Self::BatchFetchMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveIsbn => "resolve_isbn",
            Self::FetchMetadata => "fetch_metadata",
            Self::FetchCover => "fetch_cover",
            Self::FetchSubjects => "fetch_subjects",
            Self::CheckPublicDomain => "check_public_domain",
            Self::FetchRatings => "fetch_ratings",
            Self::FetchEditionVariants => "fetch_edition_variants",
            Self::FetchSeries => "fetch_series",
            Self::FetchAwards => "fetch_awards",
            Self::FetchTranslations => "fetch_translations",
            Self::GenerateBooks => "generate_books",
            Self::BatchFetchMetadata => "batch_fetch_metadata",
        }
    }

    pub fn flag(self) -> CapabilitySet {
        match self {
            Self::ResolveIsbn => CapabilitySet::RESOLVE_ISBN,
            Self::FetchMetadata => CapabilitySet::FETCH_METADATA,
            Self::FetchCover => CapabilitySet::FETCH_COVER,
            Self::FetchSubjects => CapabilitySet::FETCH_SUBJECTS,
            Self::CheckPublicDomain => CapabilitySet::CHECK_PUBLIC_DOMAIN,
            Self::FetchRatings => CapabilitySet::FETCH_RATINGS,
            Self::FetchEditionVariants => CapabilitySet::FETCH_EDITION_VARIANTS,
            Self::FetchSeries => CapabilitySet::FETCH_SERIES,
            Self::FetchAwards => CapabilitySet::FETCH_AWARDS,
            Self::FetchTranslations => CapabilitySet::FETCH_TRANSLATIONS,
            Self::GenerateBooks => CapabilitySet::GENERATE_BOOKS,
            Self::BatchFetchMetadata => CapabilitySet::BATCH_FETCH_METADATA,
        }
    }

    /// Selection mode for this capability.
    ///
    /// ISBN resolution is best-of: a wrong fast answer poisons every later
    /// lookup keyed on that ISBN. Everything else is first-match.
    pub fn selection_mode(self) -> SelectionMode {
        match self {
            Self::ResolveIsbn => SelectionMode::BestWithinTier,
            _ => SelectionMode::FirstMatch,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability '{0}'")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

impl CapabilitySet {
    pub fn supports(&self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// The individual capabilities in this set, in declaration order.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(move |c| self.supports(*c))
    }
}

impl From<Capability> for CapabilitySet {
    fn from(capability: Capability) -> Self {
        capability.flag()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CapabilitySet::empty(), |set, c| set | c.flag())
    }
}
