//! Core data types and error definitions for the ingestion pipeline.

use crate::embedding::EmbeddingClientError;
use crate::generation::GenerationError;
use crate::processing::{
    chunking::ChunkingError,
    extract::ExtractionError,
    scoring::ContentType,
};
use crate::tenant::TenantId;
use crate::vector::IndexError;
use serde::Serialize;
use thiserror::Error;

/// Errors emitted by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Text could not be extracted from the uploaded bytes.
    #[error("Failed to extract text: {0}")]
    Extraction(#[from] ExtractionError),
    /// Chunking parameters were rejected.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// No chunk survived validation, embedding, and indexing.
    #[error("Document '{filename}' produced no indexable chunks")]
    EmptyResult {
        /// File name of the rejected document.
        filename: String,
    },
    /// The vector index refused a request that does not count as a per-chunk failure.
    #[error("Vector index request failed: {0}")]
    Index(#[from] IndexError),
}

/// Errors raised while assembling the service from configuration.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Embedding provider client could not be built.
    #[error("Failed to initialize embedding provider: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Generation provider client could not be built.
    #[error("Failed to initialize generation provider: {0}")]
    Generation(#[from] GenerationError),
}

/// Document registered by an ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// UUID v4 identifier.
    pub id: String,
    /// Original file name.
    pub filename: String,
    /// Lowercased extension or declared type.
    pub doc_type: String,
    /// Size of the uploaded content in bytes.
    pub size: usize,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Number of chunks written to the index.
    pub chunk_count: usize,
    /// Whether ingestion completed.
    pub processed: bool,
    /// RFC3339 creation time.
    pub created_at: String,
}

/// A scored text unit ready for embedding. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// `{document_id}_{index}`.
    pub id: String,
    /// Parent document.
    pub document_id: String,
    /// Position within the document.
    pub index: usize,
    /// Trimmed chunk text.
    pub text: String,
    /// Character offset of the first character.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
    /// Token count.
    pub word_count: usize,
    /// Layout classification.
    pub content_type: ContentType,
    /// Readability score in `[0, 1]`.
    pub quality_score: f32,
    /// Key-fact likelihood in `[0, 1]`.
    pub importance_score: f32,
    /// Entity share in `[0, 1]`.
    pub entity_density: f32,
    /// Information richness in `[0, 1]`.
    pub information_richness: f32,
    /// Ordered, deduplicated keywords.
    pub semantic_keywords: Vec<String>,
    /// Whether the chunk looks like it holds template fields.
    pub contains_fields: bool,
}

/// Summary of a completed ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    /// The registered document.
    pub document: Document,
    /// Spans produced by the chunker.
    pub chunks_produced: usize,
    /// Spans dropped by validation.
    pub chunks_rejected: usize,
    /// Chunks skipped because embedding or indexing failed.
    pub chunks_failed: usize,
    /// Chunks written to the index.
    pub chunks_indexed: usize,
    /// Indexed chunks whose vector came from the deterministic fallback.
    pub fallback_embeddings: usize,
}

/// Vector count for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Tenant the count belongs to.
    pub tenant_id: TenantId,
    /// Number of stored vectors.
    pub vector_count: usize,
    /// Backend that answered.
    pub backend: &'static str,
}
