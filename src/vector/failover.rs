//! Primary index with a local fallback.

use super::{
    DeleteSelector, IndexError, LocalVectorStore, MetadataFilter, ScoredRecord, VectorIndex,
    VectorRecord,
};
use crate::tenant::TenantId;
use async_trait::async_trait;

/// Routes calls to `primary` and falls back to a [`LocalVectorStore`] whenever the primary
/// reports [`IndexError::Unavailable`].
///
/// Records written to the fallback during an outage are not copied back to the primary.
pub struct FailoverIndex {
    primary: Box<dyn VectorIndex>,
    fallback: LocalVectorStore,
}

impl FailoverIndex {
    /// Combine a primary index with a local fallback store.
    pub fn new(primary: Box<dyn VectorIndex>, fallback: LocalVectorStore) -> Self {
        Self { primary, fallback }
    }

    fn log_failover(&self, operation: &str, tenant: &TenantId, error: &IndexError) {
        tracing::warn!(
            operation,
            tenant = %tenant,
            primary = self.primary.backend_name(),
            error = %error,
            "Primary vector index unavailable; using local store"
        );
    }
}

#[async_trait]
impl VectorIndex for FailoverIndex {
    async fn upsert(
        &self,
        tenant: &TenantId,
        records: Vec<VectorRecord>,
    ) -> Result<usize, IndexError> {
        match self.primary.upsert(tenant, records.clone()).await {
            Err(error) if error.is_unavailable() => {
                self.log_failover("upsert", tenant, &error);
                self.fallback.upsert(tenant, records).await
            }
            other => other,
        }
    }

    async fn query(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        match self.primary.query(tenant, embedding, top_k, filter).await {
            Err(error) if error.is_unavailable() => {
                self.log_failover("query", tenant, &error);
                self.fallback.query(tenant, embedding, top_k, filter).await
            }
            other => other,
        }
    }

    async fn delete(
        &self,
        tenant: &TenantId,
        selector: &DeleteSelector,
    ) -> Result<usize, IndexError> {
        let local = match self.fallback.delete(tenant, selector).await {
            Ok(removed) => removed,
            Err(error) => {
                tracing::warn!(tenant = %tenant, error = %error, "Local fallback delete failed");
                0
            }
        };
        match self.primary.delete(tenant, selector).await {
            Ok(removed) => Ok(removed + local),
            Err(error) if error.is_unavailable() => {
                self.log_failover("delete", tenant, &error);
                Ok(local)
            }
            Err(error) => Err(error),
        }
    }

    async fn count(&self, tenant: &TenantId) -> Result<usize, IndexError> {
        match self.primary.count(tenant).await {
            Err(error) if error.is_unavailable() => {
                self.log_failover("count", tenant, &error);
                self.fallback.count(tenant).await
            }
            other => other,
        }
    }

    fn backend_name(&self) -> &'static str {
        "qdrant+local"
    }
}
