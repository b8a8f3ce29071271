//! Ingestion pipeline: extract, normalize, chunk, score, embed, and upsert.

use crate::embedding::{EmbeddingGateway, Embedded};
use crate::metrics::PipelineMetrics;
use crate::processing::{
    chunking::{ChunkingConfig, chunk_text},
    extract::{PlainTextExtractor, TextExtractor, document_type_from_filename},
    mappers::{build_chunk, chunk_to_record},
    normalize::normalize_text,
    scoring::ChunkScorer,
    types::{Chunk, Document, IndexStats, IngestError, IngestOutcome},
};
use crate::tenant::TenantId;
use crate::vector::{DeleteSelector, IndexError, VectorIndex, current_timestamp_rfc3339};
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use uuid::Uuid;

/// Batching and concurrency limits for embedding and upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    /// Chunks embedded and upserted together.
    pub batch_size: usize,
    /// Batches processed at the same time.
    pub concurrency: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            batch_size: 16,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    indexed: usize,
    failed: usize,
    fallback: usize,
    index_error: Option<IndexError>,
}

/// Turns documents into indexed chunks for one vector index.
pub struct IngestionPipeline {
    chunking: ChunkingConfig,
    limits: IngestLimits,
    scorer: ChunkScorer,
    extractor: Box<dyn TextExtractor + Send + Sync>,
    gateway: Arc<EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    metrics: Arc<PipelineMetrics>,
}

impl IngestionPipeline {
    /// Build a pipeline with the default scorer and the plain-text extractor.
    pub fn new(
        chunking: ChunkingConfig,
        limits: IngestLimits,
        gateway: Arc<EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            chunking,
            limits: IngestLimits {
                batch_size: limits.batch_size.max(1),
                concurrency: limits.concurrency.max(1),
            },
            scorer: ChunkScorer::default(),
            extractor: Box::new(PlainTextExtractor),
            gateway,
            index,
            metrics,
        }
    }

    /// Replace the chunk scorer.
    pub fn with_scorer(mut self, scorer: ChunkScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Replace the text extractor.
    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor + Send + Sync>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Ingest uploaded bytes. The type defaults to the file extension.
    pub async fn ingest_bytes(
        &self,
        tenant: &TenantId,
        filename: &str,
        bytes: &[u8],
        declared_type: Option<&str>,
    ) -> Result<IngestOutcome, IngestError> {
        let doc_type = declared_type
            .map(|value| value.trim().trim_start_matches('.').to_lowercase())
            .unwrap_or_else(|| document_type_from_filename(filename));
        let text = match self.extractor.extract(bytes, &doc_type) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(tenant = %tenant, filename, doc_type = %doc_type, %error, "Extraction failed");
                return Err(error.into());
            }
        };
        self.ingest_document(tenant, filename, doc_type, bytes.len(), &text)
            .await
    }

    /// Ingest text that is already extracted.
    pub async fn ingest_text(
        &self,
        tenant: &TenantId,
        filename: &str,
        text: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let doc_type = match document_type_from_filename(filename) {
            ext if ext.is_empty() => "txt".to_string(),
            ext => ext,
        };
        self.ingest_document(tenant, filename, doc_type, text.len(), text)
            .await
    }

    /// Remove every vector of `document_id`.
    pub async fn delete_document(
        &self,
        tenant: &TenantId,
        document_id: &str,
    ) -> Result<usize, IndexError> {
        let removed = self
            .index
            .delete(tenant, &DeleteSelector::Document(document_id.to_string()))
            .await?;
        tracing::info!(tenant = %tenant, document_id, removed, "Document vectors deleted");
        Ok(removed)
    }

    /// Remove vectors whose document is not in `valid_document_ids`.
    pub async fn cleanup_orphans(
        &self,
        tenant: &TenantId,
        valid_document_ids: &[String],
    ) -> Result<usize, IndexError> {
        if valid_document_ids.is_empty() {
            tracing::warn!(tenant = %tenant, "No valid documents supplied; every vector is an orphan");
        }
        let removed = self
            .index
            .delete(
                tenant,
                &DeleteSelector::ExceptDocuments(valid_document_ids.to_vec()),
            )
            .await?;
        tracing::info!(tenant = %tenant, removed, "Orphaned vectors removed");
        Ok(removed)
    }

    /// Vector count and backend for `tenant`.
    pub async fn index_stats(&self, tenant: &TenantId) -> Result<IndexStats, IndexError> {
        let vector_count = self.index.count(tenant).await?;
        Ok(IndexStats {
            tenant_id: tenant.clone(),
            vector_count,
            backend: self.index.backend_name(),
        })
    }

    async fn ingest_document(
        &self,
        tenant: &TenantId,
        filename: &str,
        doc_type: String,
        size: usize,
        text: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let document_id = Uuid::new_v4().to_string();
        tracing::info!(tenant = %tenant, filename, document_id = %document_id, size, "Ingesting document");

        let normalized = normalize_text(text);
        let spans = chunk_text(&normalized, &self.chunking)?;
        let chunks_produced = spans.len();

        let mut chunks: Vec<Chunk> = Vec::with_capacity(spans.len());
        for span in spans {
            let assessment = self.scorer.assess(&span.text);
            if assessment.is_valid {
                chunks.push(build_chunk(&document_id, span, assessment));
            } else {
                tracing::debug!(chunk_index = span.index, "Chunk rejected by validation");
            }
        }
        let chunks_rejected = chunks_produced - chunks.len();

        if chunks.is_empty() {
            tracing::warn!(tenant = %tenant, filename, chunks_produced, "No valid chunks produced");
            return Err(IngestError::EmptyResult {
                filename: filename.to_string(),
            });
        }

        let indexed_at = current_timestamp_rfc3339();
        let outcomes: Vec<BatchOutcome> = stream::iter(chunks.chunks(self.limits.batch_size))
            .map(|batch| self.index_batch(tenant, filename, batch, &indexed_at))
            .buffered(self.limits.concurrency)
            .collect()
            .await;

        let mut chunks_indexed = 0;
        let mut chunks_failed = 0;
        let mut fallback_embeddings = 0;
        let mut index_error = None;
        for outcome in outcomes {
            chunks_indexed += outcome.indexed;
            chunks_failed += outcome.failed;
            fallback_embeddings += outcome.fallback;
            if outcome.index_error.is_some() {
                index_error = outcome.index_error;
            }
        }

        if chunks_indexed == 0 {
            return Err(match index_error {
                Some(error) => IngestError::Index(error),
                None => IngestError::EmptyResult {
                    filename: filename.to_string(),
                },
            });
        }

        self.metrics.record_document(
            chunks_indexed as u64,
            chunks_rejected as u64,
            chunks_failed as u64,
        );
        tracing::info!(
            tenant = %tenant,
            document_id = %document_id,
            chunks_produced,
            chunks_rejected,
            chunks_failed,
            chunks_indexed,
            fallback_embeddings,
            backend = self.index.backend_name(),
            "Document indexed"
        );

        Ok(IngestOutcome {
            document: Document {
                id: document_id,
                filename: filename.to_string(),
                doc_type,
                size,
                tenant_id: tenant.clone(),
                chunk_count: chunks_indexed,
                processed: true,
                created_at: indexed_at,
            },
            chunks_produced,
            chunks_rejected,
            chunks_failed,
            chunks_indexed,
            fallback_embeddings,
        })
    }

    async fn index_batch(
        &self,
        tenant: &TenantId,
        filename: &str,
        batch: &[Chunk],
        indexed_at: &str,
    ) -> BatchOutcome {
        let texts = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let embedded = self.gateway.embed_batch(texts).await;

        let mut outcome = BatchOutcome::default();
        let mut records = Vec::with_capacity(batch.len());
        for (chunk, result) in batch.iter().zip(embedded) {
            match result {
                Ok(Embedded { vector, fallback }) => {
                    if fallback {
                        outcome.fallback += 1;
                    }
                    records.push(chunk_to_record(chunk, tenant, filename, vector, indexed_at));
                }
                Err(error) => {
                    tracing::warn!(chunk_id = %chunk.id, %error, "Skipping chunk without embedding");
                    outcome.failed += 1;
                }
            }
        }

        if records.is_empty() {
            return outcome;
        }
        let attempted = records.len();
        let fallback_in_batch = outcome.fallback;
        match self.index.upsert(tenant, records).await {
            Ok(written) => outcome.indexed = written,
            Err(error) => {
                tracing::error!(tenant = %tenant, chunks = attempted, %error, "Vector upsert failed");
                outcome.failed += attempted;
                outcome.fallback -= fallback_in_batch;
                outcome.index_error = Some(error);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::extract::ExtractionError;
    use crate::throttle::{RateLimiter, ThrottleConfig};
    use crate::embedding::{EmbeddingClient, EmbeddingClientError};
    use crate::vector::{LocalVectorStore, MetadataFilter};
    use async_trait::async_trait;
    use std::time::Duration;

    const MANUAL: &str = "The Falcon pump moves clean water through the cooling loop of the plant. \
        Operators should inspect the impeller housing every week for wear and corrosion. \
        Replacement seals are stocked in the maintenance room next to the main valve rack. \
        When the pressure gauge reads above six bar, reduce the inlet flow before restarting. \
        Record every inspection in the maintenance log with the date and the technician name.";

    const MIXED: &str = "Quarterly Maintenance Report\n\n\
        The cooling plant ran without interruption for the whole quarter. Technicians replaced two \
        worn seals on the Falcon pump and recalibrated the pressure gauge in March.\n\n\
        Device Name: Falcon Pump X200\nManufacturer: ACME Industrial\nSerial Number: SN4471B\n\
        Installation Date: 2024-03-14\n\n\
        - Inspect impeller housing weekly\n- Replace seals every 6 months\n- Log gauge readings daily\n\n\
        The operatorâ€™s notes mention â€œminor vibrationâ€ \
        near the inlet valve \u{fffd} during the night shift.\n\n\
        | Part | Quantity | Location |\n| Seal kit | 4 | Rack B |\n| Gasket | 12 | Rack C |\n\n\
        Page 3 of 10\n\n\
        All readings stayed inside the expected range, and no unplanned downtime was recorded.";

    /// Three-component vectors, except a short one for any text mentioning "Poison".
    struct PoisonClient;

    #[async_trait]
    impl EmbeddingClient for PoisonClient {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts
                .iter()
                .map(|text| {
                    if text.contains("Poison") {
                        vec![1.0]
                    } else {
                        vec![0.6, 0.8, 0.0]
                    }
                })
                .collect())
        }

        fn provider_name(&self) -> &'static str {
            "poison"
        }
    }

    fn pipeline(dir: &std::path::Path) -> (IngestionPipeline, Arc<LocalVectorStore>, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let gateway = Arc::new(EmbeddingGateway::new(
            None,
            16,
            Arc::new(RateLimiter::new(ThrottleConfig::default())),
            Arc::clone(&metrics),
        ));
        let store = Arc::new(LocalVectorStore::new(dir));
        let index: Arc<dyn VectorIndex> = store.clone();
        let chunking = ChunkingConfig {
            target_size: 200,
            overlap: 40,
            min_chunk_size: 50,
            min_trailing_chars: 10,
        };
        let limits = IngestLimits {
            batch_size: 2,
            concurrency: 2,
        };
        (
            IngestionPipeline::new(chunking, limits, gateway, index, Arc::clone(&metrics)),
            store,
            metrics,
        )
    }

    #[tokio::test]
    async fn ingests_text_into_the_tenant_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (pipeline, store, metrics) = pipeline(dir.path());
        let acme = TenantId::new("acme").expect("tenant");

        let outcome = pipeline
            .ingest_text(&acme, "falcon.txt", MANUAL)
            .await
            .expect("ingest");

        assert!(outcome.chunks_produced >= 2);
        assert_eq!(
            outcome.chunks_indexed + outcome.chunks_rejected + outcome.chunks_failed,
            outcome.chunks_produced
        );
        assert_eq!(outcome.document.chunk_count, outcome.chunks_indexed);
        assert_eq!(outcome.document.doc_type, "txt");
        assert!(outcome.document.processed);
        assert!(Uuid::parse_str(&outcome.document.id).is_ok());

        let stored = store.count(&acme).await.expect("count");
        assert_eq!(stored, outcome.chunks_indexed);

        let hits = store
            .query(
                &acme,
                &vec![0.25; 16],
                100,
                &MetadataFilter {
                    document_id: Some(outcome.document.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .expect("query");
        let mut starts: Vec<usize> = hits.iter().map(|hit| hit.metadata.start).collect();
        starts.sort_unstable();
        starts.dedup();
        assert_eq!(starts.len(), hits.len());
        assert!(hits.iter().all(|hit| hit.metadata.tenant_id == "acme"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 1);
        assert_eq!(snapshot.chunks_indexed, outcome.chunks_indexed as u64);
    }

    #[tokio::test]
    async fn garbage_only_documents_fail_with_empty_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (pipeline, _, metrics) = pipeline(dir.path());
        let acme = TenantId::new("acme").expect("tenant");

        let error = pipeline
            .ingest_text(&acme, "noise.txt", "#### #### #### #### ####")
            .await
            .expect_err("empty");
        assert!(matches!(error, IngestError::EmptyResult { .. }));
        assert_eq!(metrics.snapshot().documents_ingested, 0);
    }

    #[tokio::test]
    async fn unsupported_bytes_abort_only_that_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (pipeline, _, _) = pipeline(dir.path());
        let acme = TenantId::new("acme").expect("tenant");

        let error = pipeline
            .ingest_bytes(&acme, "scan.pdf", b"%PDF-1.7", None)
            .await
            .expect_err("unsupported");
        assert!(matches!(
            error,
            IngestError::Extraction(ExtractionError::Unsupported(_))
        ));

        let outcome = pipeline
            .ingest_bytes(&acme, "manual", MANUAL.as_bytes(), Some(".MD"))
            .await
            .expect("markdown ingest");
        assert_eq!(outcome.document.doc_type, "md");
        assert_eq!(outcome.document.size, MANUAL.len());
    }

    #[tokio::test]
    async fn delete_and_cleanup_remove_vectors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (pipeline, _, _) = pipeline(dir.path());
        let acme = TenantId::new("acme").expect("tenant");

        let first = pipeline
            .ingest_text(&acme, "a.txt", MANUAL)
            .await
            .expect("first");
        let second = pipeline
            .ingest_text(&acme, "b.txt", MANUAL)
            .await
            .expect("second");

        let removed = pipeline
            .delete_document(&acme, &first.document.id)
            .await
            .expect("delete");
        assert_eq!(removed, first.chunks_indexed);

        let stats = pipeline.index_stats(&acme).await.expect("stats");
        assert_eq!(stats.vector_count, second.chunks_indexed);
        assert_eq!(stats.backend, "local");

        let removed = pipeline.cleanup_orphans(&acme, &[]).await.expect("cleanup");
        assert_eq!(removed, second.chunks_indexed);
        assert_eq!(
            pipeline.index_stats(&acme).await.expect("stats").vector_count,
            0
        );
    }

    #[tokio::test]
    async fn one_bad_embedding_skips_only_its_chunk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let metrics = Arc::new(PipelineMetrics::new());
        let gateway = Arc::new(EmbeddingGateway::new(
            Some(Box::new(PoisonClient)),
            3,
            Arc::new(RateLimiter::new(ThrottleConfig {
                min_delay: Duration::ZERO,
                ..ThrottleConfig::default()
            })),
            Arc::clone(&metrics),
        ));
        let store = Arc::new(LocalVectorStore::new(dir.path()));
        let chunking = ChunkingConfig {
            target_size: 120,
            overlap: 0,
            min_chunk_size: 50,
            min_trailing_chars: 10,
        };
        let limits = IngestLimits {
            batch_size: 16,
            concurrency: 1,
        };
        let pipeline = IngestionPipeline::new(chunking, limits, gateway, store.clone(), metrics);
        let acme = TenantId::new("acme").expect("tenant");

        let text = "The north pump moves clean water through the cooling loop every day, and the flow \
            meter confirms it.\n\nPoison control cabinets hang beside the chemical store near the \
            east door of the main workshop hall.\n\nOperators record the pressure reading in the \
            maintenance book each week before the Monday shift.";
        let outcome = pipeline
            .ingest_text(&acme, "a.txt", text)
            .await
            .expect("the other chunks are indexed");

        assert_eq!(outcome.chunks_produced, 3);
        assert_eq!(outcome.chunks_failed, 1);
        assert_eq!(outcome.chunks_indexed, 2);
        assert_eq!(
            outcome.chunks_indexed + outcome.chunks_rejected + outcome.chunks_failed,
            outcome.chunks_produced
        );
        assert_eq!(store.count(&acme).await.expect("count"), outcome.chunks_indexed);
    }

    #[test]
    fn every_chunk_of_a_mixed_document_stays_in_bounds() {
        let scorer = ChunkScorer::default();
        let chunking = ChunkingConfig {
            target_size: 300,
            overlap: 60,
            min_chunk_size: 50,
            min_trailing_chars: 10,
        };
        let normalized = normalize_text(MIXED);
        let spans = chunk_text(&normalized, &chunking).expect("chunks");
        assert!(spans.len() >= 3);

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .map(|span| {
                let assessment = scorer.assess(&span.text);
                build_chunk("doc", span, assessment)
            })
            .collect();

        for chunk in &chunks {
            for (name, score) in [
                ("quality", chunk.quality_score),
                ("importance", chunk.importance_score),
                ("entity density", chunk.entity_density),
                ("information richness", chunk.information_richness),
            ] {
                assert!(
                    (0.0..=1.0).contains(&score),
                    "{name} score {score} out of range for chunk {}",
                    chunk.index
                );
            }
            assert!(chunk.start < chunk.end);
        }
        assert!(chunks.windows(2).all(|pair| pair[0].start < pair[1].start));
    }

    #[tokio::test]
    async fn stored_scores_of_a_mixed_document_stay_in_bounds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (pipeline, store, _) = pipeline(dir.path());
        let acme = TenantId::new("acme").expect("tenant");

        let outcome = pipeline
            .ingest_text(&acme, "report.txt", MIXED)
            .await
            .expect("ingest");
        let hits = store
            .query(&acme, &vec![0.25; 16], 100, &MetadataFilter::default())
            .await
            .expect("query");

        assert_eq!(hits.len(), outcome.chunks_indexed);
        for hit in &hits {
            let metadata = &hit.metadata;
            for score in [
                metadata.quality_score,
                metadata.importance_score,
                metadata.entity_density,
                metadata.information_richness,
            ] {
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }
}
