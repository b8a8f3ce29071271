//! Optional text-generation backend used for query expansion and field questions.
//!
//! Generation is never required: when no provider is configured, or a call fails, callers fall
//! back to deterministic rules. The Ollama-backed client issues HTTP requests directly to the
//! runtime and every call is routed through the shared rate limiter.

use crate::config::{Config, GenerationProvider};
use crate::throttle::{RateLimiter, RetryError, Retryable};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced while calling a generation provider.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Provider was explicitly disabled or unreachable.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider asked the caller to slow down.
    #[error("Generation provider rate limited the request: {0}")]
    RateLimited(String),
    /// Provider returned an error response.
    #[error("Failed to generate text: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Call did not complete within the throttle budget.
    #[error("Generation call timed out")]
    Timeout,
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout)
    }
}

/// Request payload passed to the generation provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully qualified model identifier understood by the provider.
    pub model: String,
    /// Prompt assembled by the caller.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Interface implemented by text-generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

/// Generation client wrapped with the shared rate limiter and the configured model.
#[derive(Clone)]
pub struct Generator {
    client: Arc<dyn GenerationClient>,
    limiter: Arc<RateLimiter>,
    model: String,
}

impl Generator {
    /// Wrap `client` so that every call goes through `limiter`.
    pub fn new(client: Arc<dyn GenerationClient>, limiter: Arc<RateLimiter>, model: String) -> Self {
        Self {
            client,
            limiter,
            model,
        }
    }

    /// Generate a completion for `prompt` at the given temperature.
    pub async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let request = GenerationRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            temperature,
        };
        self.limiter
            .run("generation", || self.client.generate(request.clone()))
            .await
            .map_err(|error| match error {
                RetryError::TimedOut { .. } => GenerationError::Timeout,
                RetryError::Closed => GenerationError::ProviderUnavailable("rate limiter closed".into()),
                RetryError::Exhausted { last_error, .. } | RetryError::Rejected(last_error) => {
                    last_error
                }
            })
    }
}

/// Build a generation client based on configuration.
pub fn build_generation_client(
    config: &Config,
) -> Result<Option<Arc<dyn GenerationClient>>, GenerationError> {
    match config.generation_provider {
        GenerationProvider::None => Ok(None),
        GenerationProvider::Ollama => Ok(Some(Arc::new(OllamaGenerationClient::new(
            config.ollama_url.clone(),
        )?))),
    }
}

/// Generation client for a local Ollama runtime (`POST /api/generate`).
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
}

impl OllamaGenerationClient {
    /// Build a client for the runtime at `base_url`.
    pub fn new(base_url: String) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .user_agent("docsift/generation")
            .build()
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::RateLimited(body));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

/// Extract the first JSON array of strings embedded in free-form model output.
///
/// Models often wrap the array in prose or code fences; anything outside the outermost
/// brackets is ignored. Returns `None` when no parseable array is present.
pub fn parse_string_list(output: &str) -> Option<Vec<String>> {
    let start = output.find('[')?;
    let end = output.rfind(']')?;
    if end <= start {
        return None;
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(&output[start..=end]).ok()?;
    let strings: Vec<String> = items
        .into_iter()
        .filter_map(|item| item.as_str().map(|value| value.trim().to_string()))
        .filter(|value| !value.is_empty())
        .collect();
    Some(strings)
}
