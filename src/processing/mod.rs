//! Document processing: extraction, normalization, chunking, scoring, and indexing.

pub mod chunking;
pub mod extract;
pub mod ingest;
mod mappers;
pub mod normalize;
pub mod scoring;
mod service;
pub mod types;

pub use chunking::{ChunkSpan, ChunkingConfig, ChunkingError, chunk_text};
pub use extract::{ExtractionError, PlainTextExtractor, TextExtractor};
pub use ingest::{IngestLimits, IngestionPipeline};
pub use normalize::normalize_text;
pub use scoring::{ChunkAssessment, ChunkScorer, ContentClassifier, ContentType, RuleBasedClassifier};
pub use service::ProcessingService;
pub use types::{Chunk, Document, IndexStats, IngestError, IngestOutcome, ServiceError};
