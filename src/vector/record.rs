//! Vector records, metadata, filters, and content fingerprints.

use crate::processing::scoring::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

const FINGERPRINT_CHARS: usize = 200;

/// Metadata stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Owning tenant.
    pub tenant_id: String,
    /// Source document identifier.
    pub document_id: String,
    /// Source document file name.
    pub filename: String,
    /// Chunk position within the document.
    pub chunk_index: usize,
    /// Character offset where the chunk starts.
    pub start: usize,
    /// Character offset one past the chunk end.
    pub end: usize,
    /// Full chunk text.
    pub text: String,
    /// Leading characters of the chunk for display.
    pub preview: String,
    /// Quality score assigned at ingestion.
    pub quality_score: f32,
    /// Importance score assigned at ingestion.
    pub importance_score: f32,
    /// Entity density assigned at ingestion.
    #[serde(default)]
    pub entity_density: f32,
    /// Information richness assigned at ingestion.
    #[serde(default)]
    pub information_richness: f32,
    /// Layout classification.
    #[serde(default)]
    pub content_type: ContentType,
    /// Most frequent content tokens.
    #[serde(default)]
    pub semantic_keywords: Vec<String>,
    /// Whether the chunk looks like it holds template fields.
    #[serde(default)]
    pub contains_fields: bool,
    /// Token count.
    #[serde(default)]
    pub word_count: usize,
    /// SHA-256 of the leading text, used for deduplication.
    pub fingerprint: String,
    /// RFC3339 time the record was indexed.
    pub indexed_at: String,
    /// Provider-specific passthrough values.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A vector ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk identifier (`{document_id}_{index}`).
    pub id: String,
    /// Embedding.
    pub vector: Vec<f32>,
    /// Stored metadata.
    pub metadata: VectorMetadata,
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// Chunk identifier.
    pub id: String,
    /// Similarity in `[0, 1]`.
    pub score: f32,
    /// Stored metadata.
    pub metadata: VectorMetadata,
}

/// Optional metadata constraints applied in addition to the tenant scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    /// Restrict to one document.
    pub document_id: Option<String>,
    /// Restrict to one content type.
    pub content_type: Option<ContentType>,
    /// Minimum stored quality score.
    pub min_quality: Option<f32>,
}

impl MetadataFilter {
    /// Whether `metadata` satisfies every constraint.
    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        self.document_id
            .as_ref()
            .is_none_or(|id| *id == metadata.document_id)
            && self
                .content_type
                .is_none_or(|kind| kind == metadata.content_type)
            && self
                .min_quality
                .is_none_or(|min| metadata.quality_score >= min)
    }
}

/// Records targeted by a delete call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteSelector {
    /// Specific chunk ids.
    Ids(Vec<String>),
    /// Every record of one document.
    Document(String),
    /// Every record whose document is not listed.
    ExceptDocuments(Vec<String>),
}

impl DeleteSelector {
    /// Whether a record with `id` and `metadata` is selected.
    pub fn selects(&self, id: &str, metadata: &VectorMetadata) -> bool {
        match self {
            Self::Ids(ids) => ids.iter().any(|candidate| candidate == id),
            Self::Document(document_id) => *document_id == metadata.document_id,
            Self::ExceptDocuments(keep) => !keep.contains(&metadata.document_id),
        }
    }
}

/// SHA-256 hex digest of the leading 200 characters of `text`.
pub fn content_fingerprint(text: &str) -> String {
    let leading: String = text.chars().take(FINGERPRINT_CHARS).collect();
    hex::encode(Sha256::digest(leading.as_bytes()))
}

/// Cosine similarity clamped to `[0, 1]`; zero for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a * norm_b);
    if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(0.0, 1.0)
    }
}

/// Current timestamp formatted for payload storage.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn metadata(tenant: &str, document_id: &str, index: usize, text: &str) -> VectorMetadata {
        VectorMetadata {
            tenant_id: tenant.to_string(),
            document_id: document_id.to_string(),
            filename: format!("{document_id}.txt"),
            chunk_index: index,
            start: index * 100,
            end: index * 100 + text.chars().count(),
            text: text.to_string(),
            preview: text.chars().take(80).collect(),
            quality_score: 0.8,
            importance_score: 0.5,
            entity_density: 0.2,
            information_richness: 0.6,
            content_type: ContentType::Text,
            semantic_keywords: Vec::new(),
            contains_fields: false,
            word_count: text.split_whitespace().count(),
            fingerprint: content_fingerprint(text),
            indexed_at: "2025-01-01T00:00:00Z".into(),
            extra: Map::new(),
        }
    }

    pub(crate) fn record(
        tenant: &str,
        document_id: &str,
        index: usize,
        text: &str,
        vector: Vec<f32>,
    ) -> VectorRecord {
        VectorRecord {
            id: format!("{document_id}_{index}"),
            vector,
            metadata: metadata(tenant, document_id, index, text),
        }
    }
}
