//! Confidence scoring for provider results.
//!
//! Scores are integers in 0..=100 computed from what was asked and what came
//! back. No clock, no randomness: the same inputs always give the same score.

use std::collections::HashSet;

use super::provider::{BookMetadata, TitleQuery};

/// Last year whose publications are treated as public-domain era by archival
/// sources.
pub const PUBLIC_DOMAIN_CUTOFF_YEAR: i32 = 1928;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "from", "in", "of", "on", "or", "the", "to", "with",
];

/// Per-provider weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringProfile {
    /// Awarded for returning anything at all.
    pub base: u8,
    pub title_exact: u8,
    pub title_contains: u8,
    /// Ceiling for partial word overlap.
    pub title_fuzzy_max: u8,
    pub author: u8,
    pub description: u8,
    pub subjects: u8,
    pub cover: u8,
    pub published_date: u8,
    /// Bonus for pre-1928 publications; zero outside archival sources.
    pub pre_1928: u8,
    /// Replaces the title and author bonuses when the lookup was by ISBN.
    pub identifier_match: u8,
}

impl Default for ScoringProfile {
    fn default() -> Self {
        Self {
            base: 40,
            title_exact: 30,
            title_contains: 20,
            title_fuzzy_max: 15,
            author: 20,
            description: 5,
            subjects: 5,
            cover: 5,
            published_date: 5,
            pre_1928: 0,
            identifier_match: 30,
        }
    }
}

impl ScoringProfile {
    /// Default weights plus the pre-1928 bonus.
    pub fn archival() -> Self {
        Self {
            pre_1928: 10,
            ..Self::default()
        }
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreQuery<'a> {
    ByTitle {
        title: &'a str,
        author: Option<&'a str>,
    },
    /// Looked up by ISBN; the identifier itself is the match.
    ByIdentifier,
}

impl<'a> From<&'a TitleQuery> for ScoreQuery<'a> {
    fn from(query: &'a TitleQuery) -> Self {
        Self::ByTitle {
            title: &query.title,
            author: query.author.as_deref(),
        }
    }
}

/// What the provider returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evidence<'a> {
    pub title: &'a str,
    pub authors: &'a [String],
    pub has_description: bool,
    pub has_subjects: bool,
    pub has_cover: bool,
    pub published_date: Option<&'a str>,
}

impl<'a> Evidence<'a> {
    pub fn from_metadata(metadata: &'a BookMetadata) -> Self {
        Self {
            title: &metadata.title,
            authors: &metadata.authors,
            has_description: metadata
                .description
                .as_deref()
                .is_some_and(|d| !d.trim().is_empty()),
            has_subjects: !metadata.subjects.is_empty(),
            has_cover: metadata.cover_url.is_some(),
            published_date: metadata.published_date.as_deref(),
        }
    }
}

/// Lowercase and split on anything that is not a letter or digit.
fn tokens(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn normalized(s: &str) -> String {
    tokens(s).join(" ")
}

/// Contains on token boundaries, in either direction.
fn contains_either(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (a, b) = (format!(" {a} "), format!(" {b} "));
    a.contains(&b) || b.contains(&a)
}

fn title_bonus(profile: &ScoringProfile, query: &str, found: &str) -> u32 {
    let (q, f) = (normalized(query), normalized(found));
    if q.is_empty() || f.is_empty() {
        return 0;
    }
    if q == f {
        return profile.title_exact.into();
    }
    if contains_either(&q, &f) {
        return profile.title_contains.into();
    }

    let query_words: HashSet<String> = tokens(query)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect();
    if query_words.is_empty() {
        return 0;
    }
    let found_words: HashSet<String> = tokens(found).into_iter().collect();
    let shared = query_words.intersection(&found_words).count() as u32;
    u32::from(profile.title_fuzzy_max) * shared / query_words.len() as u32
}

fn author_matches(query: &str, authors: &[String]) -> bool {
    let q = normalized(query);
    authors.iter().any(|a| contains_either(&q, &normalized(a)))
}

/// First four-digit run in a free-form date.
pub fn publication_year(date: &str) -> Option<i32> {
    date.as_bytes()
        .windows(4)
        .find(|w| w.iter().all(u8::is_ascii_digit))
        .and_then(|w| std::str::from_utf8(w).ok())
        .and_then(|s| s.parse().ok())
}

/// Score a result against a query.
pub fn score(profile: &ScoringProfile, query: ScoreQuery<'_>, evidence: &Evidence<'_>) -> u8 {
    let mut total = u32::from(profile.base);

    match query {
        ScoreQuery::ByTitle { title, author } => {
            total += title_bonus(profile, title, evidence.title);
            if let Some(author) = author {
                if author_matches(author, evidence.authors) {
                    total += u32::from(profile.author);
                }
            }
        }
        ScoreQuery::ByIdentifier => total += u32::from(profile.identifier_match),
    }

    let signals = [
        (evidence.has_description, profile.description),
        (evidence.has_subjects, profile.subjects),
        (evidence.has_cover, profile.cover),
        (evidence.published_date.is_some(), profile.published_date),
    ];
    total += signals
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, weight)| u32::from(*weight))
        .sum::<u32>();

    if evidence
        .published_date
        .and_then(publication_year)
        .is_some_and(|year| year < PUBLIC_DOMAIN_CUTOFF_YEAR)
    {
        total += u32::from(profile.pre_1928);
    }

    total.min(100) as u8
}
