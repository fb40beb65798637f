//! Gemini: generative fallback that proposes books for a free-text prompt.
//! Answers are synthesized, so they carry a fixed low confidence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::ProviderClass;
use serde::Deserialize;
use serde_json::json;

use super::{api_key, base_url, strip_code_fence, AdapterDefaults};
use crate::config::ProviderConfig;
use crate::http::FetchRequest;
use crate::resolver::capability::CapabilitySet;
use crate::resolver::provider::*;
use crate::resolver::runtime::{ProviderDeps, ProviderRuntime};
use crate::secrets::SecretSource;

const DEFAULTS: AdapterDefaults = AdapterDefaults {
    name: "gemini",
    class: ProviderClass::Ai,
    capabilities: CapabilitySet::GENERATE_BOOKS,
    priority: 0,
    min_interval: Duration::from_millis(4000),
    cache_ttl: Duration::from_secs(60 * 60),
    negative_ttl: Duration::from_secs(10 * 60),
    batch: None,
};

const DEFAULT_SECRET: &str = "GEMINI_API_KEY";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const GENERATED_CONFIDENCE: u8 = 30;
const MAX_BOOKS: usize = 50;

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseCandidate {
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

fn instruction(request: &GenerateRequest) -> String {
    format!(
        "List {} real, published books matching this request: {}\n\
         Respond with only a JSON array of objects with keys \
         \"title\", \"author\" and \"year\" (integer or null).",
        request.count, request.prompt
    )
}

pub struct Gemini {
    descriptor: ProviderDescriptor,
    runtime: ProviderRuntime,
    secrets: Arc<dyn SecretSource>,
    secret: String,
    base_url: String,
    model: String,
}

impl Gemini {
    pub fn new(config: &ProviderConfig, deps: &ProviderDeps) -> Self {
        let descriptor = DEFAULTS.descriptor(config);
        let runtime = ProviderRuntime::new(&descriptor, deps);
        Self {
            descriptor,
            runtime,
            secrets: Arc::clone(&deps.secrets),
            secret: config.secret.clone().unwrap_or_else(|| DEFAULT_SECRET.to_string()),
            base_url: base_url(config, "https://generativelanguage.googleapis.com/v1beta"),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn secret_name(&self) -> &str {
        &self.secret
    }
}

#[async_trait]
impl Provider for Gemini {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self, ctx: &ResolveContext) -> bool {
        ctx.allow_ai && matches!(self.secrets.get_secret(&self.secret).await, Ok(Some(_)))
    }

    async fn generate_books(&self, request: &GenerateRequest) -> ProviderResult<Vec<GeneratedBook>> {
        let count = request.count.clamp(1, MAX_BOOKS);
        let identifier = format!("{count}|{}", request.prompt.trim().to_lowercase());

        self.runtime
            .cached("generate", &identifier, || async {
                let key = api_key(self.secrets.as_ref(), self.name(), &self.secret).await?;
                let body = json!({
                    "contents": [{"parts": [{"text": instruction(&GenerateRequest {
                        prompt: request.prompt.clone(),
                        count,
                    })}]}],
                    "generationConfig": {"responseMimeType": "application/json"}
                });
                let call = FetchRequest::post_json(
                    format!("{}/models/{}:generateContent", self.base_url, self.model),
                    body,
                )
                .header("x-goog-api-key", key);

                let Some(body) = self.runtime.fetch(call).await? else {
                    return Ok(None);
                };
                let response: GenerateResponse = self.runtime.decode(body)?;
                let text = response
                    .candidates
                    .into_iter()
                    .filter_map(|c| c.content)
                    .flat_map(|c| c.parts)
                    .map(|p| p.text)
                    .collect::<String>();
                if text.trim().is_empty() {
                    return Ok(None);
                }

                let mut books: Vec<GeneratedBook> = serde_json::from_str(strip_code_fence(&text))
                    .map_err(|e| ProviderError::malformed(self.name(), e))?;
                books.retain(|b| !b.title.trim().is_empty());
                books.truncate(count);

                if books.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Candidate::new(books, GENERATED_CONFIDENCE, self.name())))
            })
            .await
    }
}
