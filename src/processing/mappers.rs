//! Mapping helpers between chunker output, chunks, and vector records.

use crate::processing::{chunking::ChunkSpan, scoring::ChunkAssessment, types::Chunk};
use crate::tenant::TenantId;
use crate::vector::{VectorMetadata, VectorRecord, content_fingerprint};
use serde_json::Map;
use std::collections::HashSet;

const PREVIEW_CHARS: usize = 200;

/// Combine a span with its assessment into an immutable chunk.
pub(crate) fn build_chunk(document_id: &str, span: ChunkSpan, assessment: ChunkAssessment) -> Chunk {
    let mut seen = HashSet::new();
    let semantic_keywords = assessment
        .semantic_keywords
        .into_iter()
        .filter(|keyword| seen.insert(keyword.clone()))
        .collect();

    Chunk {
        id: format!("{document_id}_{}", span.index),
        document_id: document_id.to_string(),
        index: span.index,
        text: span.text,
        start: span.start,
        end: span.end,
        word_count: assessment.word_count,
        content_type: assessment.content_type,
        quality_score: assessment.quality_score,
        importance_score: assessment.importance_score,
        entity_density: assessment.entity_density,
        information_richness: assessment.information_richness,
        semantic_keywords,
        contains_fields: assessment.contains_fields,
    }
}

/// Build the record stored for `chunk`.
pub(crate) fn chunk_to_record(
    chunk: &Chunk,
    tenant: &TenantId,
    filename: &str,
    vector: Vec<f32>,
    indexed_at: &str,
) -> VectorRecord {
    VectorRecord {
        id: chunk.id.clone(),
        vector,
        metadata: VectorMetadata {
            tenant_id: tenant.as_str().to_string(),
            document_id: chunk.document_id.clone(),
            filename: filename.to_string(),
            chunk_index: chunk.index,
            start: chunk.start,
            end: chunk.end,
            text: chunk.text.clone(),
            preview: preview(&chunk.text),
            quality_score: chunk.quality_score,
            importance_score: chunk.importance_score,
            entity_density: chunk.entity_density,
            information_richness: chunk.information_richness,
            content_type: chunk.content_type,
            semantic_keywords: chunk.semantic_keywords.clone(),
            contains_fields: chunk.contains_fields,
            word_count: chunk.word_count,
            fingerprint: content_fingerprint(&chunk.text),
            indexed_at: indexed_at.to_string(),
            extra: Map::new(),
        },
    }
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().nth(PREVIEW_CHARS).is_some() {
        preview.push_str("...");
    }
    preview
}
