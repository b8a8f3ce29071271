use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and retrieval activity.
///
/// Shared through `Arc` by the pipelines that record into it.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_indexed: AtomicU64,
    chunks_rejected: AtomicU64,
    chunks_failed: AtomicU64,
    fallback_embeddings: AtomicU64,
    queries_served: AtomicU64,
    fallback_retrievals: AtomicU64,
    isolation_violations: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document with its per-chunk outcome counts.
    pub fn record_document(&self, indexed: u64, rejected: u64, failed: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(indexed, Ordering::Relaxed);
        self.chunks_rejected.fetch_add(rejected, Ordering::Relaxed);
        self.chunks_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record that a deterministic vector replaced a provider embedding.
    pub fn record_fallback_embedding(&self) {
        self.fallback_embeddings.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed retrieval request.
    pub fn record_query(&self, used_fallback: bool) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        if used_fallback {
            self.fallback_retrievals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record hits dropped because they belonged to another tenant.
    pub fn record_isolation_violations(&self, count: u64) {
        self.isolation_violations.fetch_add(count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            chunks_rejected: self.chunks_rejected.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            fallback_embeddings: self.fallback_embeddings.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            fallback_retrievals: self.fallback_retrievals.load(Ordering::Relaxed),
            isolation_violations: self.isolation_violations.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that completed ingestion.
    pub documents_ingested: u64,
    /// Chunks written to the vector index.
    pub chunks_indexed: u64,
    /// Chunks dropped by validation.
    pub chunks_rejected: u64,
    /// Chunks skipped because embedding or indexing failed.
    pub chunks_failed: u64,
    /// Embeddings served by the deterministic fallback.
    pub fallback_embeddings: u64,
    /// Retrieval requests answered.
    pub queries_served: u64,
    /// Retrieval requests answered through the unfiltered fallback pass.
    pub fallback_retrievals: u64,
    /// Cross-tenant hits dropped during merging.
    pub isolation_violations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_document(2, 1, 0);
        metrics.record_document(3, 0, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
        assert_eq!(snapshot.chunks_rejected, 1);
        assert_eq!(snapshot.chunks_failed, 1);
    }

    #[test]
    fn records_queries_and_fallbacks() {
        let metrics = PipelineMetrics::new();
        metrics.record_query(false);
        metrics.record_query(true);
        metrics.record_isolation_violations(2);
        metrics.record_fallback_embedding();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_served, 2);
        assert_eq!(snapshot.fallback_retrievals, 1);
        assert_eq!(snapshot.isolation_violations, 2);
        assert_eq!(snapshot.fallback_embeddings, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot().documents_ingested, 0);
        assert_eq!(metrics.snapshot().queries_served, 0);
    }
}
