//! Request, result, and configuration types for retrieval.

use super::confidence::{ConfidenceThresholds, ConfidenceTier, RelevanceTier, TierCounts};
use crate::tenant::TenantId;
use crate::vector::{MetadataFilter, VectorMetadata};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Invalid retrieval parameters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrievalConfigError {
    /// Confidence thresholds out of range or not strictly decreasing.
    #[error("invalid confidence thresholds: {0}")]
    InvalidThresholds(String),
    /// Composite weights negative or summing to zero.
    #[error("invalid ranking weights: {0}")]
    InvalidWeights(String),
    /// A count or score parameter is out of range.
    #[error("invalid retrieval parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Errors surfaced by [`super::RetrievalOrchestrator::retrieve`].
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Query was empty after trimming.
    #[error("query text is empty")]
    EmptyQuery,
    /// The request did not finish within its time budget; no partial results are returned.
    #[error("retrieval timed out after {0:?}")]
    TimedOut(Duration),
    /// Every query variation failed.
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

/// Weights of the composite re-ranking score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompositeWeights {
    /// Weight of the vector similarity (primary signal).
    pub similarity: f32,
    /// Weight of the stored chunk quality.
    pub quality: f32,
    /// Weight of the stored chunk importance.
    pub importance: f32,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            similarity: 0.7,
            quality: 0.15,
            importance: 0.15,
        }
    }
}

impl CompositeWeights {
    /// Weighted sum normalized by the total weight, clamped to `[0, 1]`.
    pub fn score(&self, similarity: f32, quality: f32, importance: f32) -> f32 {
        let total = self.similarity + self.quality + self.importance;
        if total <= 0.0 {
            return similarity.clamp(0.0, 1.0);
        }
        let weighted = self.similarity * similarity.clamp(0.0, 1.0)
            + self.quality * quality.clamp(0.0, 1.0)
            + self.importance * importance.clamp(0.0, 1.0);
        (weighted / total).clamp(0.0, 1.0)
    }

    fn validate(&self) -> Result<(), RetrievalConfigError> {
        let weights = [self.similarity, self.quality, self.importance];
        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
            return Err(RetrievalConfigError::InvalidWeights(
                "weights must be finite and non-negative".into(),
            ));
        }
        if weights.iter().sum::<f32>() <= 0.0 {
            return Err(RetrievalConfigError::InvalidWeights(
                "weights must not all be zero".into(),
            ));
        }
        if self.similarity < self.quality || self.similarity < self.importance {
            return Err(RetrievalConfigError::InvalidWeights(
                "similarity must carry the largest weight".into(),
            ));
        }
        Ok(())
    }
}

/// Retrieval and ranking parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    /// Query variations including the original.
    pub variation_count: usize,
    /// Hits requested from the index per variation.
    pub top_k_per_variation: usize,
    /// Default number of results returned.
    pub final_count: usize,
    /// Minimum similarity kept by the filter stage.
    pub min_similarity: f32,
    /// Keyword overlap ratio a candidate must exceed to count as relevant.
    pub min_keyword_overlap: f32,
    /// Candidates with more words than this are relevant regardless of overlap.
    pub substantial_word_count: usize,
    /// Composite score weights.
    pub weights: CompositeWeights,
    /// Composite score above which the diversity pass always admits a candidate.
    pub always_admit_score: f32,
    /// When set, the diversity pass also treats candidates sharing this many leading words as
    /// duplicates. Off by default, where only content fingerprints collide.
    pub diversity_words: Option<usize>,
    /// Budget for the whole request.
    pub request_timeout: Duration,
    /// Confidence tier thresholds.
    pub thresholds: ConfidenceThresholds,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let thresholds = ConfidenceThresholds::default();
        Self {
            variation_count: 3,
            top_k_per_variation: 15,
            final_count: 10,
            min_similarity: thresholds.acceptable,
            min_keyword_overlap: 0.05,
            substantial_word_count: 50,
            weights: CompositeWeights::default(),
            always_admit_score: 0.85,
            diversity_words: None,
            request_timeout: Duration::from_secs(60),
            thresholds,
        }
    }
}

impl RetrievalConfig {
    /// Check ranges and consistency.
    pub fn validate(&self) -> Result<(), RetrievalConfigError> {
        let positive = [
            ("variation_count", self.variation_count),
            ("top_k_per_variation", self.top_k_per_variation),
            ("final_count", self.final_count),
            ("diversity_words", self.diversity_words.unwrap_or(1)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RetrievalConfigError::InvalidParameter {
                    name,
                    reason: "must be greater than zero",
                });
            }
        }
        let unit = [
            ("min_similarity", self.min_similarity),
            ("min_keyword_overlap", self.min_keyword_overlap),
            ("always_admit_score", self.always_admit_score),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(RetrievalConfigError::InvalidParameter {
                    name,
                    reason: "must lie in [0, 1]",
                });
            }
        }
        if self.request_timeout.is_zero() {
            return Err(RetrievalConfigError::InvalidParameter {
                name: "request_timeout",
                reason: "must be greater than zero",
            });
        }
        self.weights.validate()?;
        ConfidenceThresholds::new(
            self.thresholds.critical,
            self.thresholds.high,
            self.thresholds.acceptable,
        )?;
        Ok(())
    }
}

/// One retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Tenant whose documents are searched.
    pub tenant: TenantId,
    /// User query.
    pub query: String,
    /// Overrides the configured result count.
    pub final_count: Option<usize>,
    /// Additional metadata constraints.
    pub filter: MetadataFilter,
}

impl RetrievalRequest {
    /// Request with default count and no extra filter.
    pub fn new(tenant: TenantId, query: impl Into<String>) -> Self {
        Self {
            tenant,
            query: query.into(),
            final_count: None,
            filter: MetadataFilter::default(),
        }
    }
}

/// A ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Chunk id.
    pub id: String,
    /// Vector similarity in `[0, 1]`.
    pub similarity: f32,
    /// Composite re-ranking score in `[0, 1]`.
    pub composite_score: f32,
    /// Relevance grouping.
    pub relevance_tier: RelevanceTier,
    /// Confidence bucket.
    pub confidence_tier: ConfidenceTier,
    /// Stored chunk metadata.
    pub metadata: VectorMetadata,
}

/// Outcome of one query variation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariationStats {
    /// Variation text.
    pub query: String,
    /// Hits returned by the index.
    pub result_count: usize,
    /// Mean similarity of the hits.
    pub average_score: f32,
    /// Failure message when the variation could not be searched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bookkeeping for one retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalStats {
    /// Query as received.
    pub original_query: String,
    /// Per-variation details in expansion order.
    pub variations: Vec<VariationStats>,
    /// Hits merged from all variations.
    pub total_retrieved: usize,
    /// Candidates left after deduplication.
    pub unique_after_dedupe: usize,
    /// Candidates left after filtering.
    pub total_after_filtering: usize,
    /// Results returned.
    pub final_count: usize,
    /// Whether the unfiltered fallback pass produced the results.
    pub fallback_used: bool,
    /// Results per confidence tier.
    pub confidence_breakdown: TierCounts,
    /// Hits dropped because their tenant did not match.
    pub isolation_violations: usize,
}

/// Results and stats of a retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResponse {
    /// Ranked results, best first.
    pub results: Vec<RetrievalResult>,
    /// Request bookkeeping.
    pub stats: RetrievalStats,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::vector::{
        DeleteSelector, IndexError, ScoredRecord, VectorIndex, VectorMetadata, VectorRecord,
        content_fingerprint,
    };
    use async_trait::async_trait;

    /// Index returning the same hits for every query.
    pub(crate) struct ScriptedIndex {
        pub(crate) hits: Vec<ScoredRecord>,
        pub(crate) fail: bool,
        pub(crate) delay: Duration,
    }

    impl ScriptedIndex {
        pub(crate) fn returning(hits: Vec<ScoredRecord>) -> Self {
            Self {
                hits,
                fail: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl VectorIndex for ScriptedIndex {
        async fn upsert(&self, _: &TenantId, records: Vec<VectorRecord>) -> Result<usize, IndexError> {
            Ok(records.len())
        }

        async fn query(
            &self,
            _: &TenantId,
            _: &[f32],
            top_k: usize,
            _: &MetadataFilter,
        ) -> Result<Vec<ScoredRecord>, IndexError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(IndexError::Unavailable("connection refused".into()));
            }
            Ok(self.hits.iter().take(top_k).cloned().collect())
        }

        async fn delete(&self, _: &TenantId, _: &DeleteSelector) -> Result<usize, IndexError> {
            Ok(0)
        }

        async fn count(&self, _: &TenantId) -> Result<usize, IndexError> {
            Ok(self.hits.len())
        }

        fn backend_name(&self) -> &'static str {
            "scripted"
        }
    }

    pub(crate) fn hit(id: &str, tenant: &str, score: f32, text: &str) -> ScoredRecord {
        let mut metadata = result_with(id, score).metadata;
        metadata.tenant_id = tenant.to_string();
        metadata.word_count = text.split_whitespace().count();
        metadata.text = text.to_string();
        metadata.fingerprint = content_fingerprint(text);
        ScoredRecord {
            id: id.to_string(),
            score,
            metadata,
        }
    }

    pub(crate) fn result_with(id: &str, similarity: f32) -> RetrievalResult {
        let thresholds = ConfidenceThresholds::default();
        let text = format!("Evidence text for {id}");
        RetrievalResult {
            id: id.to_string(),
            similarity,
            composite_score: similarity,
            relevance_tier: thresholds.relevance(similarity),
            confidence_tier: thresholds.classify(similarity),
            metadata: VectorMetadata {
                tenant_id: "acme".into(),
                document_id: format!("doc-{id}"),
                filename: format!("{id}.txt"),
                chunk_index: 0,
                start: 0,
                end: text.chars().count(),
                preview: text.clone(),
                fingerprint: content_fingerprint(&text),
                text,
                quality_score: 0.8,
                importance_score: 0.5,
                entity_density: 0.1,
                information_richness: 0.5,
                content_type: Default::default(),
                semantic_keywords: Vec::new(),
                contains_fields: false,
                word_count: 4,
                indexed_at: "2025-01-01T00:00:00Z".into(),
                extra: Default::default(),
            },
        }
    }
}
