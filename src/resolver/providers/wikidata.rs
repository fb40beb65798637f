//! Wikidata SPARQL: series membership, literary awards and translations,
//! reached through the edition's ISBN-13 (P212) and the work it is an
//! edition of (P629).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::{Isbn, ProviderClass};
use serde::Deserialize;

use super::{base_url, AdapterDefaults};
use crate::config::ProviderConfig;
use crate::http::FetchRequest;
use crate::resolver::capability::CapabilitySet;
use crate::resolver::provider::*;
use crate::resolver::runtime::{ProviderDeps, ProviderRuntime};
use crate::resolver::scoring::publication_year;

const DEFAULTS: AdapterDefaults = AdapterDefaults {
    name: "wikidata",
    class: ProviderClass::Free,
    capabilities: CapabilitySet::FETCH_SERIES
        .union(CapabilitySet::FETCH_AWARDS)
        .union(CapabilitySet::FETCH_TRANSLATIONS),
    priority: 3,
    min_interval: Duration::from_millis(1000),
    cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
    negative_ttl: Duration::from_secs(7 * 24 * 60 * 60),
    batch: None,
};

/// Curated structured data; trusted above scraped catalog fields.
const CONFIDENCE: u8 = 75;

#[derive(Debug, Default, Deserialize)]
struct SparqlResponse {
    #[serde(default)]
    results: SparqlResults,
}

#[derive(Debug, Default, Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<HashMap<String, SparqlValue>>,
}

#[derive(Debug, Default, Deserialize)]
struct SparqlValue {
    value: String,
}

type Row = HashMap<String, String>;

/// Binds `?work` to the work whose edition carries this ISBN. Wikidata stores
/// hyphenated ISBNs, so the comparison strips hyphens.
fn work_clause(isbn: &Isbn) -> String {
    format!(
        r#"?edition wdt:P212 ?isbn .
  FILTER(REPLACE(?isbn, "-", "") = "{isbn}")
  ?edition wdt:P629 ?work ."#
    )
}

fn series_query(isbn: &Isbn) -> String {
    format!(
        r#"SELECT ?seriesLabel ?position WHERE {{
  {}
  ?work p:P179 ?membership .
  ?membership ps:P179 ?series .
  OPTIONAL {{ ?membership pq:P1545 ?position . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}} LIMIT 1"#,
        work_clause(isbn)
    )
}

fn awards_query(isbn: &Isbn) -> String {
    format!(
        r#"SELECT ?awardLabel ?date WHERE {{
  {}
  ?work p:P166 ?received .
  ?received ps:P166 ?award .
  OPTIONAL {{ ?received pq:P585 ?date . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#,
        work_clause(isbn)
    )
}

fn translations_query(isbn: &Isbn) -> String {
    format!(
        r#"SELECT DISTINCT ?code ?title WHERE {{
  {}
  ?other wdt:P629 ?work ;
         wdt:P407 ?language ;
         wdt:P1476 ?title .
  ?language wdt:P218 ?code .
  FILTER(?other != ?edition)
}}"#,
        work_clause(isbn)
    )
}

pub struct Wikidata {
    descriptor: ProviderDescriptor,
    runtime: ProviderRuntime,
    endpoint: String,
}

impl Wikidata {
    pub fn new(config: &ProviderConfig, deps: &ProviderDeps) -> Self {
        let descriptor = DEFAULTS.descriptor(config);
        let runtime = ProviderRuntime::new(&descriptor, deps);
        Self {
            descriptor,
            runtime,
            endpoint: base_url(config, "https://query.wikidata.org/sparql"),
        }
    }

    async fn select(&self, query: String) -> Result<Vec<Row>, ProviderError> {
        let request = FetchRequest::get(self.endpoint.as_str())
            .query("query", query)
            .query("format", "json")
            .header("Accept", "application/sparql-results+json");
        let Some(body) = self.runtime.fetch(request).await? else {
            return Ok(Vec::new());
        };
        let response: SparqlResponse = self.runtime.decode(body)?;
        Ok(response
            .results
            .bindings
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k, v.value)).collect())
            .collect())
    }
}

#[async_trait]
impl Provider for Wikidata {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self, _ctx: &ResolveContext) -> bool {
        true
    }

    async fn fetch_series(&self, isbn: &Isbn) -> ProviderResult<SeriesInfo> {
        self.runtime
            .cached("series", isbn.as_str(), || async {
                let rows = self.select(series_query(isbn)).await?;
                Ok(rows.into_iter().next().and_then(|mut row| {
                    let name = row.remove("seriesLabel")?;
                    let series = SeriesInfo {
                        name,
                        position: row.remove("position"),
                    };
                    Some(Candidate::new(series, CONFIDENCE, self.name()))
                }))
            })
            .await
    }

    async fn fetch_awards(&self, isbn: &Isbn) -> ProviderResult<Vec<Award>> {
        self.runtime
            .cached("awards", isbn.as_str(), || async {
                let awards: Vec<Award> = self
                    .select(awards_query(isbn))
                    .await?
                    .into_iter()
                    .filter_map(|mut row| {
                        Some(Award {
                            name: row.remove("awardLabel")?,
                            year: row.get("date").and_then(|d| publication_year(d)),
                        })
                    })
                    .collect();
                Ok((!awards.is_empty()).then(|| Candidate::new(awards, CONFIDENCE, self.name())))
            })
            .await
    }

    async fn fetch_translations(&self, isbn: &Isbn) -> ProviderResult<Vec<Translation>> {
        self.runtime
            .cached("translations", isbn.as_str(), || async {
                let translations: Vec<Translation> = self
                    .select(translations_query(isbn))
                    .await?
                    .into_iter()
                    .filter_map(|mut row| {
                        Some(Translation {
                            language: row.remove("code")?,
                            title: row.remove("title")?,
                        })
                    })
                    .collect();
                Ok((!translations.is_empty())
                    .then(|| Candidate::new(translations, CONFIDENCE, self.name())))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::ProviderKind;
    use crate::secrets::StaticSecrets;
    use crate::store::MemoryStore;
    use crate::test_support::ScriptedFetcher;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn provider(fetcher: Arc<ScriptedFetcher>) -> Wikidata {
        let mut config = ProviderConfig::new(ProviderKind::Wikidata);
        config.min_interval_ms = Some(0);
        let deps = ProviderDeps {
            fetcher,
            store: Arc::new(MemoryStore::new()),
            secrets: Arc::new(StaticSecrets::new()),
            clock: Arc::new(SystemClock),
        };
        Wikidata::new(&config, &deps)
    }

    fn bindings(rows: Value) -> Value {
        json!({"head": {"vars": []}, "results": {"bindings": rows}})
    }

    fn hobbit() -> Isbn {
        Isbn::parse("9780547928227").unwrap()
    }

    #[tokio::test]
    async fn series_with_position() {
        let fetcher = Arc::new(ScriptedFetcher::new().on(
            "P179",
            bindings(json!([{
                "seriesLabel": {"type": "literal", "value": "Middle-earth"},
                "position": {"type": "literal", "value": "1"}
            }])),
        ));
        let wd = provider(fetcher.clone());

        let series = wd.fetch_series(&hobbit()).await.unwrap().unwrap();
        assert_eq!(series.value.name, "Middle-earth");
        assert_eq!(series.value.position.as_deref(), Some("1"));

        let query = fetcher.requests()[0].query_value("query").unwrap().to_string();
        assert!(query.contains(r#"= "9780547928227""#));
    }

    #[tokio::test]
    async fn awards_parse_years() {
        let fetcher = Arc::new(ScriptedFetcher::new().on(
            "P166",
            bindings(json!([
                {"awardLabel": {"value": "Hugo Award for Best Novel"}, "date": {"value": "1966-01-01T00:00:00Z"}},
                {"awardLabel": {"value": "Nebula Award for Best Novel"}}
            ])),
        ));
        let wd = provider(fetcher);

        let awards = wd.fetch_awards(&hobbit()).await.unwrap().unwrap();
        assert_eq!(
            awards.value,
            vec![
                Award {
                    name: "Hugo Award for Best Novel".into(),
                    year: Some(1966)
                },
                Award {
                    name: "Nebula Award for Best Novel".into(),
                    year: None
                },
            ]
        );
    }

    #[tokio::test]
    async fn empty_bindings_are_absent() {
        let fetcher = Arc::new(ScriptedFetcher::new().on("sparql", bindings(json!([]))));
        let wd = provider(fetcher);
        assert!(wd.fetch_translations(&hobbit()).await.unwrap().is_none());
        assert!(wd.fetch_series(&hobbit()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn translations_skip_incomplete_rows() {
        let fetcher = Arc::new(ScriptedFetcher::new().on(
            "P407",
            bindings(json!([
                {"code": {"value": "de"}, "title": {"value": "Der kleine Hobbit"}},
                {"code": {"value": "fr"}}
            ])),
        ));
        let wd = provider(fetcher);
        let translations = wd.fetch_translations(&hobbit()).await.unwrap().unwrap();
        assert_eq!(translations.value.len(), 1);
        assert_eq!(translations.value[0].language, "de");
    }
}
