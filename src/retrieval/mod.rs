//! Multi-query retrieval, ranking, and confidence grading.
//!
//! A request is expanded into several query variations, each variation is embedded and searched
//! inside the requesting tenant's scope, and the merged hits are deduplicated, filtered,
//! re-ranked, and diversified. [`ConfidenceAggregator`] turns the ranked results into an
//! [`EvidenceBundle`] for downstream generation, and [`FieldExtractor`] fills template fields
//! from the same evidence.

pub mod confidence;
pub mod expander;
pub mod fields;
pub mod orchestrator;
pub mod ranking;
pub mod types;

pub use confidence::{
    AnalysisQuality, ConfidenceAggregator, ConfidenceThresholds, ConfidenceTier, EvidenceBundle,
    EvidenceStatus, RelevanceTier, ScoreSummary, TierCounts,
};
pub use expander::{QueryExpander, fallback_variations};
pub use fields::{FieldExtractor, FieldSpec, FieldValue, parse_template_fields};
pub use orchestrator::RetrievalOrchestrator;
pub use types::{
    CompositeWeights, RetrievalConfig, RetrievalConfigError, RetrievalError, RetrievalRequest,
    RetrievalResponse, RetrievalResult, RetrievalStats, VariationStats,
};
