//! Multi-query retrieval: expand, search, merge, and rank.

use super::confidence::TierCounts;
use super::expander::QueryExpander;
use super::ranking::{Ranker, dedupe};
use super::types::{
    RetrievalConfig, RetrievalError, RetrievalRequest, RetrievalResponse, RetrievalStats,
    VariationStats,
};
use crate::embedding::EmbeddingGateway;
use crate::metrics::PipelineMetrics;
use crate::processing::scoring::ChunkScorer;
use crate::tenant::TenantId;
use crate::vector::{ScoredRecord, VectorIndex};
use futures_util::{StreamExt, stream};
use std::sync::Arc;

const DEFAULT_CONCURRENCY: usize = 4;

struct VariationSearch {
    query: String,
    hits: Result<Vec<ScoredRecord>, String>,
}

impl VariationSearch {
    fn stats(&self) -> VariationStats {
        match &self.hits {
            Ok(hits) => VariationStats {
                query: self.query.clone(),
                result_count: hits.len(),
                average_score: if hits.is_empty() {
                    0.0
                } else {
                    hits.iter().map(|hit| hit.score).sum::<f32>() / hits.len() as f32
                },
                error: None,
            },
            Err(error) => VariationStats {
                query: self.query.clone(),
                result_count: 0,
                average_score: 0.0,
                error: Some(error.clone()),
            },
        }
    }
}

/// Coordinates query expansion, per-variation search, and ranking for one index.
pub struct RetrievalOrchestrator {
    config: RetrievalConfig,
    expander: QueryExpander,
    scorer: ChunkScorer,
    gateway: Arc<EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    metrics: Arc<PipelineMetrics>,
    concurrency: usize,
}

impl RetrievalOrchestrator {
    /// Build an orchestrator using rule-based query expansion.
    pub fn new(
        config: RetrievalConfig,
        gateway: Arc<EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            config,
            expander: QueryExpander::default(),
            scorer: ChunkScorer::default(),
            gateway,
            index,
            metrics,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Replace the query expander.
    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = expander;
        self
    }

    /// Number of variations searched at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Active retrieval parameters.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve ranked evidence for `request`.
    ///
    /// The whole request runs under the configured timeout; on expiry in-flight searches are
    /// dropped and no partial results are returned.
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<RetrievalResponse, RetrievalError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        let budget = self.config.request_timeout;
        match tokio::time::timeout(budget, self.run(&request, query)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tenant = %request.tenant, query, ?budget, "Retrieval timed out");
                Err(RetrievalError::TimedOut(budget))
            }
        }
    }

    async fn run(&self, request: &RetrievalRequest, query: &str) -> Result<RetrievalResponse, RetrievalError> {
        let tenant = &request.tenant;
        let final_count = request.final_count.unwrap_or(self.config.final_count).max(1);

        let variations = self.expander.expand(query, self.config.variation_count).await;
        let searches: Vec<VariationSearch> = stream::iter(variations)
            .map(|variation| self.search(request, variation))
            .buffered(self.concurrency)
            .collect()
            .await;

        let variation_stats: Vec<VariationStats> = searches.iter().map(VariationSearch::stats).collect();
        if searches.iter().all(|search| search.hits.is_err()) {
            let reason = searches
                .iter()
                .filter_map(|search| search.hits.as_ref().err())
                .next_back()
                .cloned()
                .unwrap_or_else(|| "no query variations".to_string());
            tracing::error!(tenant = %tenant, query, reason = %reason, "Every query variation failed");
            return Err(RetrievalError::Unavailable(reason));
        }

        let mut original_hits = None;
        let mut merged = Vec::new();
        let mut isolation_violations = 0;
        for (position, search) in searches.into_iter().enumerate() {
            if let Ok(hits) = search.hits {
                let (kept, dropped) = scope_to_tenant(tenant, hits);
                isolation_violations += dropped;
                if position == 0 {
                    original_hits = Some(kept.clone());
                }
                merged.extend(kept);
            }
        }
        if isolation_violations > 0 {
            self.metrics.record_isolation_violations(isolation_violations as u64);
        }

        let total_retrieved = merged.len();
        let unique = dedupe(merged);
        let unique_after_dedupe = unique.len();

        let ranker = Ranker::new(&self.config, &self.scorer);
        let filtered = ranker.filter(unique, query);
        let total_after_filtering = filtered.len();

        let mut fallback_used = false;
        let results = if !filtered.is_empty() || unique_after_dedupe == 0 {
            ranker.rank(filtered, final_count)
        } else {
            fallback_used = true;
            let kept = match original_hits {
                Some(hits) => hits,
                None => self.requery_original(request, query).await,
            };
            tracing::info!(
                tenant = %tenant,
                query,
                candidates = kept.len(),
                "Filtering removed every candidate; ranking unfiltered results"
            );
            ranker.rank(dedupe(kept), final_count)
        };

        self.metrics.record_query(fallback_used);
        let stats = RetrievalStats {
            original_query: query.to_string(),
            variations: variation_stats,
            total_retrieved,
            unique_after_dedupe,
            total_after_filtering,
            final_count: results.len(),
            fallback_used,
            confidence_breakdown: TierCounts::from_results(&results),
            isolation_violations,
        };
        tracing::info!(
            tenant = %tenant,
            query,
            total_retrieved,
            unique_after_dedupe,
            total_after_filtering,
            returned = results.len(),
            fallback_used,
            "Retrieval completed"
        );
        Ok(RetrievalResponse { results, stats })
    }

    async fn requery_original(&self, request: &RetrievalRequest, query: &str) -> Vec<ScoredRecord> {
        match self.search(request, query.to_string()).await.hits {
            Ok(hits) => {
                let (kept, dropped) = scope_to_tenant(&request.tenant, hits);
                if dropped > 0 {
                    self.metrics.record_isolation_violations(dropped as u64);
                }
                kept
            }
            Err(error) => {
                tracing::warn!(tenant = %request.tenant, query, %error, "Fallback re-query failed");
                Vec::new()
            }
        }
    }

    async fn search(&self, request: &RetrievalRequest, variation: String) -> VariationSearch {
        let embedded = match self.gateway.embed(&variation).await {
            Ok(embedded) => embedded,
            Err(error) => {
                tracing::warn!(query = %variation, %error, "Query embedding failed");
                return VariationSearch {
                    query: variation,
                    hits: Err(error.to_string()),
                };
            }
        };
        let hits = self
            .index
            .query(
                &request.tenant,
                &embedded.vector,
                self.config.top_k_per_variation,
                &request.filter,
            )
            .await
            .map_err(|error| {
                tracing::warn!(query = %variation, %error, "Variation search failed");
                error.to_string()
            });
        VariationSearch {
            query: variation,
            hits,
        }
    }
}

/// Split `hits` into those owned by `tenant` and the number dropped.
fn scope_to_tenant(tenant: &TenantId, hits: Vec<ScoredRecord>) -> (Vec<ScoredRecord>, usize) {
    let total = hits.len();
    let kept: Vec<ScoredRecord> = hits
        .into_iter()
        .filter(|hit| {
            let owned = hit.metadata.tenant_id == tenant.as_str();
            if !owned {
                tracing::error!(
                    tenant = %tenant,
                    found = %hit.metadata.tenant_id,
                    id = %hit.id,
                    "Tenant isolation violation; dropping hit"
                );
            }
            owned
        })
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::types::fixtures::{ScriptedIndex, hit};
    use crate::throttle::{RateLimiter, ThrottleConfig};
    use crate::vector::LocalVectorStore;
    use std::time::Duration;

    const PUMP: &str = "The Falcon pump runs at 220 volts and needs maintenance every six months.";
    const VALVE: &str = "The relief valve opens at four bar and must be inspected after each season.";

    fn orchestrator(
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> (RetrievalOrchestrator, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let gateway = Arc::new(EmbeddingGateway::new(
            None,
            16,
            Arc::new(RateLimiter::new(ThrottleConfig::default())),
            Arc::clone(&metrics),
        ));
        (
            RetrievalOrchestrator::new(config, gateway, index, Arc::clone(&metrics)),
            metrics,
        )
    }

    fn acme() -> TenantId {
        TenantId::new("acme").expect("tenant")
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (orchestrator, _) = orchestrator(
            Arc::new(ScriptedIndex::returning(Vec::new())),
            RetrievalConfig::default(),
        );
        let error = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "   "))
            .await
            .expect_err("empty query");
        assert!(matches!(error, RetrievalError::EmptyQuery));
    }

    #[tokio::test]
    async fn empty_tenant_returns_no_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (orchestrator, metrics) = orchestrator(
            Arc::new(LocalVectorStore::new(dir.path())),
            RetrievalConfig::default(),
        );
        let response = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "What is the pump voltage?"))
            .await
            .expect("retrieve");
        assert!(response.results.is_empty());
        assert_eq!(response.stats.total_retrieved, 0);
        assert!(!response.stats.fallback_used);
        assert_eq!(response.stats.variations.len(), 3);
        assert_eq!(metrics.snapshot().queries_served, 1);
    }

    #[tokio::test]
    async fn merges_variations_and_deduplicates() {
        let index = ScriptedIndex::returning(vec![
            hit("pump-0", "acme", 0.9, PUMP),
            hit("pump-copy", "acme", 0.8, PUMP),
        ]);
        let (orchestrator, _) = orchestrator(Arc::new(index), RetrievalConfig::default());
        let response = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "pump maintenance"))
            .await
            .expect("retrieve");

        assert_eq!(response.stats.total_retrieved, 6);
        assert_eq!(response.stats.unique_after_dedupe, 1);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "pump-0");
        assert!(!response.stats.fallback_used);
    }

    #[tokio::test]
    async fn stats_report_the_trimmed_query() {
        let index = ScriptedIndex::returning(vec![hit("pump-0", "acme", 0.9, PUMP)]);
        let (orchestrator, _) = orchestrator(Arc::new(index), RetrievalConfig::default());
        let response = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "  pump maintenance \n"))
            .await
            .expect("retrieve");

        assert_eq!(response.stats.original_query, "pump maintenance");
        assert_eq!(response.stats.variations[0].query, "pump maintenance");
    }

    #[tokio::test]
    async fn drops_hits_from_other_tenants() {
        let index = ScriptedIndex::returning(vec![
            hit("ours", "acme", 0.9, PUMP),
            hit("theirs", "globex", 0.95, "The Falcon pump manual for another customer with maintenance notes."),
        ]);
        let (orchestrator, metrics) = orchestrator(Arc::new(index), RetrievalConfig::default());
        let response = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "pump maintenance"))
            .await
            .expect("retrieve");

        assert!(response.results.iter().all(|result| result.metadata.tenant_id == "acme"));
        assert_eq!(response.stats.isolation_violations, 3);
        assert_eq!(metrics.snapshot().isolation_violations, 3);
    }

    #[tokio::test]
    async fn falls_back_to_unfiltered_original_results() {
        let index = ScriptedIndex::returning(vec![
            hit("weak-pump", "acme", 0.3, PUMP),
            hit("weak-valve", "acme", 0.2, VALVE),
        ]);
        let (orchestrator, metrics) = orchestrator(Arc::new(index), RetrievalConfig::default());
        let response = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "pump maintenance"))
            .await
            .expect("retrieve");

        assert!(response.stats.fallback_used);
        assert_eq!(response.stats.total_after_filtering, 0);
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].id, "weak-pump");
        assert_eq!(metrics.snapshot().fallback_retrievals, 1);
    }

    #[tokio::test]
    async fn respects_requested_result_count() {
        let index = ScriptedIndex::returning(vec![
            hit("pump", "acme", 0.9, PUMP),
            hit("pump-log", "acme", 0.85, "Pump maintenance log entries list every inspection with dates."),
            hit("pump-seal", "acme", 0.8, "Pump seal maintenance uses the kit stored near the valve rack."),
        ]);
        let (orchestrator, _) = orchestrator(Arc::new(index), RetrievalConfig::default());
        let mut request = RetrievalRequest::new(acme(), "pump maintenance");
        request.final_count = Some(2);
        let response = orchestrator.retrieve(request).await.expect("retrieve");
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.stats.final_count, 2);
    }

    #[tokio::test]
    async fn all_variations_failing_is_unavailable() {
        let index = ScriptedIndex {
            hits: Vec::new(),
            fail: true,
            delay: Duration::ZERO,
        };
        let (orchestrator, _) = orchestrator(Arc::new(index), RetrievalConfig::default());
        let error = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "pump maintenance"))
            .await
            .expect_err("unavailable");
        assert!(matches!(error, RetrievalError::Unavailable(reason) if reason.contains("connection refused")));
    }

    #[tokio::test]
    async fn slow_searches_time_out_without_partial_results() {
        let index = ScriptedIndex {
            hits: vec![hit("pump", "acme", 0.9, PUMP)],
            fail: false,
            delay: Duration::from_secs(5),
        };
        let config = RetrievalConfig {
            request_timeout: Duration::from_millis(50),
            ..RetrievalConfig::default()
        };
        let (orchestrator, metrics) = orchestrator(Arc::new(index), config);
        let error = orchestrator
            .retrieve(RetrievalRequest::new(acme(), "pump maintenance"))
            .await
            .expect_err("timeout");
        assert!(matches!(error, RetrievalError::TimedOut(_)));
        assert_eq!(metrics.snapshot().queries_served, 0);
    }
}
