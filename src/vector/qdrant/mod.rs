//! Qdrant adapter for the [`VectorIndex`] contract.
//!
//! All tenants share one collection. The `tenant_id` payload field is part of every filter this
//! adapter sends and is overwritten on every upserted point.

pub mod client;
pub mod filters;
pub mod payload;
pub mod types;

pub use client::QdrantService;
pub use filters::{build_delete_filter, build_tenant_filter};
pub use payload::point_id;
pub use types::QdrantError;

use super::{
    DeleteSelector, IndexError, MetadataFilter, ScoredRecord, VectorIndex, VectorRecord,
};
use crate::tenant::TenantId;
use async_trait::async_trait;

/// Vector index backed by a Qdrant collection.
pub struct QdrantIndex {
    service: QdrantService,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Connect to Qdrant and make sure the collection and payload indexes exist.
    pub async fn connect(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, IndexError> {
        let service = QdrantService::new(url, api_key)?;
        let index = Self::with_service(service, collection, dimension);
        index
            .service
            .create_collection_if_not_exists(&index.collection, index.dimension as u64)
            .await?;
        index
            .service
            .ensure_payload_indexes(&index.collection)
            .await?;
        tracing::info!(
            collection = %index.collection,
            dimension,
            "Qdrant index ready"
        );
        Ok(index)
    }

    /// Wrap an existing client without touching the server.
    pub fn with_service(
        service: QdrantService,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            service,
            collection: collection.into(),
            dimension,
        }
    }

    /// Collection holding the vectors.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(
        &self,
        tenant: &TenantId,
        records: Vec<VectorRecord>,
    ) -> Result<usize, IndexError> {
        let mut points = Vec::with_capacity(records.len());
        for mut record in records {
            if record.vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.vector.len(),
                });
            }
            record.metadata.tenant_id = tenant.as_str().to_string();
            points.push(payload::build_point(&record)?);
        }
        let written = self.service.upsert_points(&self.collection, points).await?;
        tracing::debug!(tenant = %tenant, written, "Qdrant vectors upserted");
        Ok(written)
    }

    async fn query(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let points = self
            .service
            .query_points(
                &self.collection,
                embedding,
                build_tenant_filter(tenant, filter),
                top_k,
            )
            .await?;

        let mut results = Vec::with_capacity(points.len());
        for point in points {
            let point_id = client::stringify_point_id(point.id);
            let Some(payload) = point.payload else {
                tracing::warn!(point_id = %point_id, "Qdrant point returned without payload");
                continue;
            };
            match payload::parse_payload(payload) {
                Ok((id, metadata)) => results.push(ScoredRecord {
                    id,
                    score: if point.score.is_nan() {
                        0.0
                    } else {
                        point.score.clamp(0.0, 1.0)
                    },
                    metadata,
                }),
                Err(error) => {
                    tracing::warn!(point_id = %point_id, error = %error, "Skipping unreadable Qdrant payload");
                }
            }
        }
        Ok(results)
    }

    async fn delete(
        &self,
        tenant: &TenantId,
        selector: &DeleteSelector,
    ) -> Result<usize, IndexError> {
        let filter = build_delete_filter(tenant, selector);
        let matching = self
            .service
            .count_points(&self.collection, filter.clone())
            .await?;
        if matching == 0 {
            return Ok(0);
        }
        self.service.delete_points(&self.collection, filter).await?;
        tracing::debug!(tenant = %tenant, removed = matching, "Qdrant vectors deleted");
        Ok(matching)
    }

    async fn count(&self, tenant: &TenantId) -> Result<usize, IndexError> {
        let filter = build_tenant_filter(tenant, &MetadataFilter::default());
        Ok(self.service.count_points(&self.collection, filter).await?)
    }

    fn backend_name(&self) -> &'static str {
        "qdrant"
    }
}
