//! Embedding gateway: throttled provider calls with a deterministic fallback.

use super::{EmbeddingClient, EmbeddingClientError, HashEmbeddingClient};
use crate::metrics::PipelineMetrics;
use crate::throttle::{RateLimiter, RetryError};
use futures_util::future::join_all;
use std::sync::Arc;

/// Embedding produced by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    /// Unit-length vector with the configured dimension.
    pub vector: Vec<f32>,
    /// Whether the deterministic fallback produced this vector.
    pub fallback: bool,
}

/// Provider access with throttling and deterministic fallback.
pub struct EmbeddingGateway {
    provider: Option<Box<dyn EmbeddingClient + Send + Sync>>,
    fallback: HashEmbeddingClient,
    limiter: Arc<RateLimiter>,
    metrics: Arc<PipelineMetrics>,
}

impl EmbeddingGateway {
    /// Build a gateway. With no provider every vector comes from the hash client.
    pub fn new(
        provider: Option<Box<dyn EmbeddingClient + Send + Sync>>,
        dimension: usize,
        limiter: Arc<RateLimiter>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            provider,
            fallback: HashEmbeddingClient::new(dimension),
            limiter,
            metrics,
        }
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.fallback.dimension()
    }

    /// Name of the active provider.
    pub fn provider_name(&self) -> &'static str {
        self.provider
            .as_ref()
            .map_or("hash", |provider| provider.provider_name())
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Embedded, EmbeddingClientError> {
        self.embed_batch(vec![text.to_string()])
            .await
            .pop()
            .unwrap_or_else(|| {
                Err(EmbeddingClientError::InvalidResponse(
                    "no embedding returned".into(),
                ))
            })
    }

    /// Embed a batch of texts through one provider call.
    ///
    /// Returns one result per input in input order. When the provider fails with an error that
    /// allows fallback, every item receives its deterministic vector. Any other batch failure is
    /// retried one text at a time, so only the texts that fail on their own carry an error.
    /// Vectors of the wrong dimension fail only their own item.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Vec<Result<Embedded, EmbeddingClientError>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let Some(provider) = self.provider.as_ref() else {
            return self.fallback_batch(&texts, false);
        };

        match self.request(provider.as_ref(), &texts).await {
            Ok(vectors) => vectors
                .into_iter()
                .map(|vector| self.accept(provider.provider_name(), vector))
                .collect(),
            Err(error) if error.allows_fallback() => {
                tracing::warn!(
                    provider = provider.provider_name(),
                    batch = texts.len(),
                    %error,
                    "Embedding provider failed; using deterministic vectors"
                );
                self.fallback_batch(&texts, true)
            }
            Err(error) if texts.len() > 1 => {
                tracing::warn!(
                    provider = provider.provider_name(),
                    batch = texts.len(),
                    %error,
                    "Embedding batch failed; retrying texts one at a time"
                );
                join_all(texts.iter().map(|text| self.embed_single(provider.as_ref(), text))).await
            }
            Err(error) => {
                tracing::error!(
                    provider = provider.provider_name(),
                    %error,
                    "Embedding failed; skipping text"
                );
                vec![Err(error)]
            }
        }
    }

    async fn embed_single(
        &self,
        provider: &(dyn EmbeddingClient + Send + Sync),
        text: &str,
    ) -> Result<Embedded, EmbeddingClientError> {
        let texts = [text.to_string()];
        match self.request(provider, &texts).await {
            Ok(mut vectors) => match vectors.pop() {
                Some(vector) => self.accept(provider.provider_name(), vector),
                None => Err(EmbeddingClientError::InvalidResponse(
                    "no embedding returned".into(),
                )),
            },
            Err(error) if error.allows_fallback() => {
                self.metrics.record_fallback_embedding();
                Ok(Embedded {
                    vector: self.fallback.encode(text),
                    fallback: true,
                })
            }
            Err(error) => {
                tracing::error!(
                    provider = provider.provider_name(),
                    %error,
                    "Embedding failed; skipping text"
                );
                Err(error)
            }
        }
    }

    async fn request(
        &self,
        provider: &(dyn EmbeddingClient + Send + Sync),
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let vectors = self
            .limiter
            .run("embedding", || provider.generate_embeddings(texts.to_vec()))
            .await
            .map_err(|error| match error {
                RetryError::TimedOut { .. } => EmbeddingClientError::Timeout,
                RetryError::Closed => EmbeddingClientError::Unavailable("rate limiter closed".into()),
                RetryError::Exhausted { last_error, .. } => last_error,
                RetryError::Rejected(error) => error,
            })?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn accept(&self, provider: &str, vector: Vec<f32>) -> Result<Embedded, EmbeddingClientError> {
        let expected = self.dimension();
        if vector.len() != expected {
            tracing::warn!(provider, expected, actual = vector.len(), "Embedding has the wrong dimension");
            return Err(EmbeddingClientError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(Embedded {
            vector,
            fallback: false,
        })
    }

    fn fallback_batch(
        &self,
        texts: &[String],
        count_fallback: bool,
    ) -> Vec<Result<Embedded, EmbeddingClientError>> {
        texts
            .iter()
            .map(|text| {
                if count_fallback {
                    self.metrics.record_fallback_embedding();
                }
                Ok(Embedded {
                    vector: self.fallback.encode(text),
                    fallback: true,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::ThrottleConfig;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedClient {
        result: Result<Vec<f32>, EmbeddingClientError>,
    }

    #[async_trait]
    impl EmbeddingClient for FixedClient {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            match &self.result {
                Ok(vector) => Ok(texts.iter().map(|_| vector.clone()).collect()),
                Err(error) => Err(error.clone()),
            }
        }

        fn provider_name(&self) -> &'static str {
            "fixed"
        }
    }

    fn gateway(result: Result<Vec<f32>, EmbeddingClientError>) -> (EmbeddingGateway, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let limiter = Arc::new(RateLimiter::new(ThrottleConfig {
            min_delay: Duration::ZERO,
            max_retries: 1,
            initial_backoff: Duration::from_millis(10),
            ..ThrottleConfig::default()
        }));
        let gateway = EmbeddingGateway::new(
            Some(Box::new(FixedClient { result })),
            3,
            limiter,
            Arc::clone(&metrics),
        );
        (gateway, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_provider_vectors() {
        let (gateway, metrics) = gateway(Ok(vec![1.0, 0.0, 0.0]));
        let embedded = gateway.embed("text").await.expect("embedding");
        assert_eq!(embedded.vector, vec![1.0, 0.0, 0.0]);
        assert!(!embedded.fallback);
        assert_eq!(metrics.snapshot().fallback_embeddings, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_provider_degrades_to_hash_vectors() {
        let (gateway, metrics) = gateway(Err(EmbeddingClientError::Unavailable("down".into())));
        let results = gateway
            .embed_batch(vec!["a".into(), "b".into()])
            .await;

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().expect("fallback");
        assert!(first.fallback);
        assert_eq!(first.vector, HashEmbeddingClient::new(3).encode("a"));
        assert_eq!(metrics.snapshot().fallback_embeddings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_batches_are_skipped() {
        let (gateway, _) = gateway(Err(EmbeddingClientError::RateLimited("429".into())));
        let results = gateway.embed_batch(vec!["a".into()]).await;
        assert!(matches!(
            results[0],
            Err(EmbeddingClientError::RateLimited(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_dimension_is_not_mixed_in() {
        let (gateway, _) = gateway(Ok(vec![1.0, 0.0]));
        let error = gateway.embed("text").await.expect_err("mismatch");
        assert!(matches!(
            error,
            EmbeddingClientError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    /// Short vectors for texts containing "bad"; rate limits any call that includes "blocked".
    struct PickyClient;

    #[async_trait]
    impl EmbeddingClient for PickyClient {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            if texts.iter().any(|text| text == "blocked") {
                return Err(EmbeddingClientError::RateLimited("429".into()));
            }
            Ok(texts
                .iter()
                .map(|text| {
                    if text.contains("bad") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 0.0, 1.0]
                    }
                })
                .collect())
        }

        fn provider_name(&self) -> &'static str {
            "picky"
        }
    }

    fn picky_gateway() -> EmbeddingGateway {
        let limiter = Arc::new(RateLimiter::new(ThrottleConfig {
            min_delay: Duration::ZERO,
            max_retries: 1,
            initial_backoff: Duration::from_millis(10),
            ..ThrottleConfig::default()
        }));
        EmbeddingGateway::new(
            Some(Box::new(PickyClient)),
            3,
            limiter,
            Arc::new(PipelineMetrics::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_vector_fails_only_its_text() {
        let results = picky_gateway()
            .embed_batch(vec!["a".into(), "bad".into(), "c".into()])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(EmbeddingClientError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(results[2].is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batches_are_retried_per_text() {
        let results = picky_gateway()
            .embed_batch(vec!["a".into(), "blocked".into(), "c".into()])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().expect("first").vector,
            vec![0.0, 0.0, 1.0]
        );
        assert!(matches!(results[1], Err(EmbeddingClientError::RateLimited(_))));
        assert!(!results[2].as_ref().expect("third").fallback);
    }

    #[tokio::test]
    async fn hash_only_gateway_does_not_count_fallbacks() {
        let metrics = Arc::new(PipelineMetrics::new());
        let gateway = EmbeddingGateway::new(
            None,
            8,
            Arc::new(RateLimiter::new(ThrottleConfig::default())),
            Arc::clone(&metrics),
        );
        let embedded = gateway.embed("text").await.expect("embedding");
        assert!(embedded.fallback);
        assert_eq!(embedded.vector.len(), 8);
        assert_eq!(gateway.provider_name(), "hash");
        assert_eq!(metrics.snapshot().fallback_embeddings, 0);
    }
}
