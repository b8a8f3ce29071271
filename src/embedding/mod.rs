//! Embedding providers and the gateway used by the pipelines.
//!
//! Providers implement [`EmbeddingClient`]. The [`EmbeddingGateway`] wraps one provider with the
//! shared rate limiter and degrades to the deterministic [`HashEmbeddingClient`] when the
//! provider cannot be reached.

mod gateway;
mod hash;
mod ollama;
mod openai;

pub use gateway::{Embedded, EmbeddingGateway};
pub use hash::HashEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use crate::throttle::Retryable;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or is not configured.
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),
    /// Provider asked the caller to slow down.
    #[error("Embedding provider rate limited the request: {0}")]
    RateLimited(String),
    /// Provider failed with a transient server-side error.
    #[error("Embedding provider server error: {0}")]
    ServerError(String),
    /// Request did not complete in time.
    #[error("Embedding request timed out")]
    Timeout,
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider returned vectors of an unexpected size.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
}

impl EmbeddingClientError {
    /// Whether the gateway may substitute a deterministic vector for this failure.
    ///
    /// Rate limiting and dimension mismatches are surfaced so the caller skips the item instead
    /// of mixing vector spaces.
    pub fn allows_fallback(&self) -> bool {
        !matches!(
            self,
            Self::RateLimited(_) | Self::DimensionMismatch { .. }
        )
    }
}

impl Retryable for EmbeddingClientError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::ServerError(_) | Self::Timeout)
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Short provider name used in logs.
    fn provider_name(&self) -> &'static str;
}

/// Build the provider client selected by configuration.
///
/// Returns `None` for [`EmbeddingProvider::Hash`], in which case the gateway serves
/// deterministic vectors only.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Option<Box<dyn EmbeddingClient + Send + Sync>>, EmbeddingClientError> {
    match config.embedding_provider {
        EmbeddingProvider::Hash => Ok(None),
        EmbeddingProvider::Ollama => Ok(Some(Box::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
        )?))),
        EmbeddingProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::Unavailable("OPENAI_API_KEY not set".into())
            })?;
            Ok(Some(Box::new(OpenAiEmbeddingClient::new(
                config.openai_url.clone(),
                config.embedding_model.clone(),
                api_key,
            )?)))
        }
    }
}

/// Map a non-success HTTP status to the matching error kind.
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    body: &str,
) -> EmbeddingClientError {
    let message = format!("{provider} returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS {
        EmbeddingClientError::RateLimited(message)
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::SERVICE_UNAVAILABLE {
        EmbeddingClientError::Unavailable(message)
    } else if status.is_server_error() {
        EmbeddingClientError::ServerError(message)
    } else {
        EmbeddingClientError::GenerationFailed(message)
    }
}

/// Map a transport failure to the matching error kind.
pub(crate) fn classify_transport(
    provider: &str,
    base_url: &str,
    error: reqwest::Error,
) -> EmbeddingClientError {
    if error.is_timeout() {
        EmbeddingClientError::Timeout
    } else {
        EmbeddingClientError::Unavailable(format!(
            "failed to reach {provider} at {base_url}: {error}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_retry_policy() {
        let limited = classify_status("ollama", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(limited.is_retryable());
        assert!(!limited.allows_fallback());

        let server = classify_status("ollama", StatusCode::BAD_GATEWAY, "");
        assert!(server.is_retryable());
        assert!(server.allows_fallback());

        let missing = classify_status("ollama", StatusCode::NOT_FOUND, "model not found");
        assert!(matches!(missing, EmbeddingClientError::Unavailable(_)));
        assert!(!missing.is_retryable());

        let bad = classify_status("openai", StatusCode::BAD_REQUEST, "bad input");
        assert!(matches!(bad, EmbeddingClientError::GenerationFailed(message) if message.contains("400")));
    }
}
