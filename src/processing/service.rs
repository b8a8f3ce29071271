//! Service wiring the ingestion and retrieval pipelines from configuration.

use crate::{
    config::{Config, VectorBackend},
    embedding::{EmbeddingGateway, build_embedding_client},
    generation::{Generator, build_generation_client},
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        ingest::{IngestLimits, IngestionPipeline},
        types::ServiceError,
    },
    retrieval::{
        ConfidenceAggregator, EvidenceBundle, FieldExtractor, QueryExpander, RetrievalError,
        RetrievalOrchestrator, RetrievalRequest, RetrievalResponse,
    },
    throttle::RateLimiter,
    vector::{FailoverIndex, LocalVectorStore, QdrantIndex, VectorIndex},
};
use std::sync::Arc;

/// Owns the long-lived pipeline components for one process.
///
/// Every outbound model call, embedding or generation, goes through the same [`RateLimiter`].
/// Construct the service once near process start and share it through an `Arc`.
pub struct ProcessingService {
    metrics: Arc<PipelineMetrics>,
    index: Arc<dyn VectorIndex>,
    pipeline: IngestionPipeline,
    orchestrator: Arc<RetrievalOrchestrator>,
    fields: FieldExtractor,
    aggregator: ConfidenceAggregator,
}

impl ProcessingService {
    /// Build every component described by `config`.
    ///
    /// With the Qdrant backend an unreachable server is not fatal: the service starts on the
    /// local store and logs a warning.
    pub async fn from_config(
        config: &Config,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, ServiceError> {
        let limiter = Arc::new(RateLimiter::new(config.throttle.clone()));

        let provider = build_embedding_client(config)?;
        let gateway = Arc::new(EmbeddingGateway::new(
            provider,
            config.embedding_dimension,
            Arc::clone(&limiter),
            Arc::clone(&metrics),
        ));
        tracing::info!(
            provider = gateway.provider_name(),
            dimension = gateway.dimension(),
            "Embedding gateway ready"
        );

        let generator = build_generation_client(config)?.map(|client| {
            Generator::new(client, Arc::clone(&limiter), config.generation_model.clone())
        });

        let index = build_index(config).await;
        tracing::info!(backend = index.backend_name(), "Vector index ready");

        let limits = IngestLimits {
            batch_size: config.throttle.max_batch_size,
            concurrency: config.throttle.max_concurrent,
        };
        let pipeline = IngestionPipeline::new(
            config.chunking,
            limits,
            Arc::clone(&gateway),
            Arc::clone(&index),
            Arc::clone(&metrics),
        );

        let orchestrator = Arc::new(
            RetrievalOrchestrator::new(
                config.retrieval.clone(),
                gateway,
                Arc::clone(&index),
                Arc::clone(&metrics),
            )
            .with_expander(QueryExpander::new(generator.clone()))
            .with_concurrency(config.throttle.max_concurrent),
        );
        let fields = FieldExtractor::new(
            Arc::clone(&orchestrator),
            generator,
            config.throttle.max_batch_size,
        );

        Ok(Self {
            metrics,
            index,
            pipeline,
            orchestrator,
            fields,
            aggregator: ConfidenceAggregator::new(config.retrieval.thresholds),
        })
    }

    /// Ingestion pipeline.
    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    /// Retrieval orchestrator.
    pub fn orchestrator(&self) -> &RetrievalOrchestrator {
        &self.orchestrator
    }

    /// Template field extractor.
    pub fn field_extractor(&self) -> &FieldExtractor {
        &self.fields
    }

    /// Confidence aggregator configured with the retrieval thresholds.
    pub fn aggregator(&self) -> &ConfidenceAggregator {
        &self.aggregator
    }

    /// Name of the active vector backend.
    pub fn backend_name(&self) -> &'static str {
        self.index.backend_name()
    }

    /// Retrieve ranked results and grade them into an evidence bundle.
    pub async fn retrieve_evidence(
        &self,
        request: RetrievalRequest,
    ) -> Result<(RetrievalResponse, EvidenceBundle), RetrievalError> {
        let response = self.orchestrator.retrieve(request).await?;
        let bundle = self.aggregator.aggregate(&response.results);
        Ok((response, bundle))
    }

    /// Current metrics counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

async fn build_index(config: &Config) -> Arc<dyn VectorIndex> {
    let local = LocalVectorStore::new(config.local_store_dir.clone());
    let url = match (config.vector_backend, config.qdrant_url.as_deref()) {
        (VectorBackend::Qdrant, Some(url)) => url,
        (VectorBackend::Qdrant, None) => {
            tracing::warn!("QDRANT_URL not set; using local vector store");
            return Arc::new(local);
        }
        (VectorBackend::Local, _) => return Arc::new(local),
    };

    match QdrantIndex::connect(
        url,
        config.qdrant_api_key.clone(),
        config.qdrant_collection_name.clone(),
        config.embedding_dimension,
    )
    .await
    {
        Ok(primary) => Arc::new(FailoverIndex::new(Box::new(primary), local)),
        Err(error) => {
            tracing::warn!(url, %error, "Qdrant unreachable at startup; using local vector store");
            Arc::new(local)
        }
    }
}
