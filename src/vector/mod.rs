//! Tenant-scoped vector storage.
//!
//! Every call takes the [`TenantId`] it operates on and adapters must never return or touch
//! another tenant's records. [`QdrantIndex`] talks to a Qdrant server over REST,
//! [`LocalVectorStore`] keeps one JSON file per tenant, and [`FailoverIndex`] routes to the local
//! store while the primary is unreachable.

pub mod failover;
pub mod local;
pub mod qdrant;
mod record;

pub use failover::FailoverIndex;
pub use local::LocalVectorStore;
pub use qdrant::QdrantIndex;
pub use record::{
    DeleteSelector, MetadataFilter, ScoredRecord, VectorMetadata, VectorRecord,
    content_fingerprint, cosine_similarity, current_timestamp_rfc3339,
};

use crate::tenant::TenantId;
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by vector index adapters.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Backend could not be reached or answered with a server-side failure.
    #[error("Vector index unavailable: {0}")]
    Unavailable(String),
    /// Backend refused the request.
    #[error("Vector index rejected the request: {0}")]
    Rejected(String),
    /// Local storage failed.
    #[error("Vector storage I/O failed: {0}")]
    Storage(#[from] std::io::Error),
    /// Stored or returned data could not be (de)serialized.
    #[error("Vector payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Record vector size differs from the index dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension already used by the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
}

impl IndexError {
    /// Whether a fallback backend should be tried.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Call contract shared by all vector index adapters.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records (keyed by chunk id). Returns the number written.
    async fn upsert(&self, tenant: &TenantId, records: Vec<VectorRecord>)
    -> Result<usize, IndexError>;

    /// Return up to `top_k` records of `tenant` most similar to `embedding`, best first.
    ///
    /// The filter is applied before truncation.
    async fn query(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError>;

    /// Delete the selected records of `tenant`. Returns the number removed when known.
    async fn delete(&self, tenant: &TenantId, selector: &DeleteSelector)
    -> Result<usize, IndexError>;

    /// Number of records stored for `tenant`.
    async fn count(&self, tenant: &TenantId) -> Result<usize, IndexError>;

    /// Short backend name used in logs and stats.
    fn backend_name(&self) -> &'static str;
}
