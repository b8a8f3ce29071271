//! File-backed vector store.
//!
//! Each tenant owns `tenant_{id}_vectors.json` under the store directory. Queries are a
//! brute-force cosine scan, which is fine for the fallback role this store plays. Files are
//! rewritten through a temporary file and an atomic rename.

use super::{
    DeleteSelector, IndexError, MetadataFilter, ScoredRecord, VectorIndex, VectorRecord,
    cosine_similarity,
};
use crate::tenant::TenantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct StoreFile {
    version: u32,
    records: Vec<VectorRecord>,
}

/// Per-tenant JSON vector store.
#[derive(Debug)]
pub struct LocalVectorStore {
    root: PathBuf,
    tenants: Mutex<HashMap<TenantId, Vec<VectorRecord>>>,
}

impl LocalVectorStore {
    /// Open (or lazily create) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the tenant files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_path(&self, tenant: &TenantId) -> PathBuf {
        self.root.join(format!("tenant_{}_vectors.json", tenant.as_str()))
    }

    async fn load<'a>(
        &self,
        cache: &'a mut HashMap<TenantId, Vec<VectorRecord>>,
        tenant: &TenantId,
    ) -> Result<&'a mut Vec<VectorRecord>, IndexError> {
        if !cache.contains_key(tenant) {
            let path = self.tenant_path(tenant);
            let records = match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let file: StoreFile = serde_json::from_slice(&bytes)?;
                    if file.version != STORE_VERSION {
                        tracing::warn!(
                            tenant = %tenant,
                            version = file.version,
                            "Local vector file has an unexpected version"
                        );
                    }
                    tracing::debug!(
                        tenant = %tenant,
                        records = file.records.len(),
                        path = %path.display(),
                        "Loaded local vector file"
                    );
                    file.records
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(error) => return Err(error.into()),
            };
            cache.insert(tenant.clone(), records);
        }
        Ok(cache.entry(tenant.clone()).or_default())
    }

    async fn persist(&self, tenant: &TenantId, records: &[VectorRecord]) -> Result<(), IndexError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.tenant_path(tenant);
        let temp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(&StoreFileRef {
            version: STORE_VERSION,
            records,
        })?;
        tokio::fs::write(&temp, body).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    records: &'a [VectorRecord],
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn upsert(
        &self,
        tenant: &TenantId,
        records: Vec<VectorRecord>,
    ) -> Result<usize, IndexError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut cache = self.tenants.lock().await;
        let stored = self.load(&mut cache, tenant).await?;

        let expected = stored
            .first()
            .map(|record| record.vector.len())
            .unwrap_or_else(|| records[0].vector.len());
        if let Some(bad) = records.iter().find(|record| record.vector.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }

        let written = records.len();
        let mut updated = stored.clone();
        for mut record in records {
            record.metadata.tenant_id = tenant.as_str().to_string();
            match updated.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record,
                None => updated.push(record),
            }
        }
        // The cache only changes once the file holds the new records.
        self.persist(tenant, &updated).await?;
        *stored = updated;
        tracing::debug!(tenant = %tenant, written, total = stored.len(), "Local vectors upserted");
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
        let mut cache = self.tenants.lock().await;
        let stored = self.load(&mut cache, tenant).await?;

        let mut scored: Vec<ScoredRecord> = stored
            .iter()
            .filter(|record| record.vector.len() == embedding.len())
            .filter(|record| filter.matches(&record.metadata))
            .map(|record| ScoredRecord {
                id: record.id.clone(),
                score: cosine_similarity(embedding, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(
        &self,
        tenant: &TenantId,
        selector: &DeleteSelector,
    ) -> Result<usize, IndexError> {
        let mut cache = self.tenants.lock().await;
        let stored = self.load(&mut cache, tenant).await?;
        let remaining: Vec<VectorRecord> = stored
            .iter()
            .filter(|record| !selector.selects(&record.id, &record.metadata))
            .cloned()
            .collect();
        let removed = stored.len() - remaining.len();
        if removed > 0 {
            self.persist(tenant, &remaining).await?;
            *stored = remaining;
        }
        tracing::debug!(tenant = %tenant, removed, "Local vectors deleted");
        Ok(removed)
    }

    async fn count(&self, tenant: &TenantId) -> Result<usize, IndexError> {
        let mut cache = self.tenants.lock().await;
        Ok(self.load(&mut cache, tenant).await?.len())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::record::fixtures::record;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).expect("tenant")
    }

    #[tokio::test]
    async fn upsert_query_and_persist_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::new(dir.path());
        let acme = tenant("acme");

        let written = store
            .upsert(
                &acme,
                vec![
                    record("acme", "doc", 0, "pump", vec![1.0, 0.0]),
                    record("acme", "doc", 1, "valve", vec![0.0, 1.0]),
                ],
            )
            .await
            .expect("upsert");
        assert_eq!(written, 2);
        assert!(dir.path().join("tenant_acme_vectors.json").exists());

        let reopened = LocalVectorStore::new(dir.path());
        let hits = reopened
            .query(&acme, &[0.9, 0.1], 1, &MetadataFilter::default())
            .await
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc_0");
        assert!(hits[0].score > 0.9);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::new(dir.path());
        store
            .upsert(&tenant("a"), vec![record("a", "doc", 0, "secret", vec![1.0, 0.0])])
            .await
            .expect("upsert");

        let hits = store
            .query(&tenant("b"), &[1.0, 0.0], 10, &MetadataFilter::default())
            .await
            .expect("query");
        assert!(hits.is_empty());
        assert_eq!(store.count(&tenant("b")).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id_and_stamps_tenant() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::new(dir.path());
        let acme = tenant("acme");
        store
            .upsert(&acme, vec![record("other", "doc", 0, "v1", vec![1.0, 0.0])])
            .await
            .expect("first");
        store
            .upsert(&acme, vec![record("acme", "doc", 0, "v2", vec![0.0, 1.0])])
            .await
            .expect("second");

        assert_eq!(store.count(&acme).await.expect("count"), 1);
        let hits = store
            .query(&acme, &[0.0, 1.0], 5, &MetadataFilter::default())
            .await
            .expect("query");
        assert_eq!(hits[0].metadata.text, "v2");
        assert_eq!(hits[0].metadata.tenant_id, "acme");
    }

    #[tokio::test]
    async fn filter_applies_before_truncation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::new(dir.path());
        let acme = tenant("acme");
        store
            .upsert(
                &acme,
                vec![
                    record("acme", "best", 0, "close", vec![1.0, 0.0]),
                    record("acme", "other", 0, "far", vec![0.6, 0.8]),
                ],
            )
            .await
            .expect("upsert");

        let filter = MetadataFilter {
            document_id: Some("other".into()),
            ..Default::default()
        };
        let hits = store.query(&acme, &[1.0, 0.0], 1, &filter).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.document_id, "other");
    }

    #[tokio::test]
    async fn delete_by_document_and_orphans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::new(dir.path());
        let acme = tenant("acme");
        store
            .upsert(
                &acme,
                vec![
                    record("acme", "keep", 0, "a", vec![1.0, 0.0]),
                    record("acme", "drop", 0, "b", vec![1.0, 0.0]),
                    record("acme", "orphan", 0, "c", vec![1.0, 0.0]),
                ],
            )
            .await
            .expect("upsert");

        let removed = store
            .delete(&acme, &DeleteSelector::Document("drop".into()))
            .await
            .expect("delete");
        assert_eq!(removed, 1);

        let removed = store
            .delete(&acme, &DeleteSelector::ExceptDocuments(vec!["keep".into()]))
            .await
            .expect("cleanup");
        assert_eq!(removed, 1);
        assert_eq!(store.count(&acme).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn failed_writes_leave_the_cache_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::new(dir.path());
        let acme = tenant("acme");
        store
            .upsert(&acme, vec![record("acme", "keep", 0, "a", vec![1.0, 0.0])])
            .await
            .expect("upsert");

        // A directory where the temp file goes makes every rewrite fail.
        let blocker = dir.path().join("tenant_acme_vectors.json.tmp");
        std::fs::create_dir(&blocker).expect("blocker");

        let error = store
            .upsert(&acme, vec![record("acme", "new", 0, "b", vec![0.0, 1.0])])
            .await
            .expect_err("write fails");
        assert!(matches!(error, IndexError::Storage(_)));
        assert_eq!(store.count(&acme).await.expect("count"), 1);
        let hits = store
            .query(&acme, &[0.0, 1.0], 5, &MetadataFilter::default())
            .await
            .expect("query");
        assert!(hits.iter().all(|hit| hit.metadata.document_id == "keep"));

        store
            .delete(&acme, &DeleteSelector::Document("keep".into()))
            .await
            .expect_err("write fails");
        assert_eq!(store.count(&acme).await.expect("count"), 1);

        std::fs::remove_dir(&blocker).expect("unblock");
        let removed = store
            .delete(&acme, &DeleteSelector::Document("keep".into()))
            .await
            .expect("delete");
        assert_eq!(removed, 1);
        assert_eq!(store.count(&acme).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn rejects_mixed_dimensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::new(dir.path());
        let acme = tenant("acme");
        store
            .upsert(&acme, vec![record("acme", "doc", 0, "a", vec![1.0, 0.0])])
            .await
            .expect("upsert");
        let error = store
            .upsert(&acme, vec![record("acme", "doc", 1, "b", vec![1.0, 0.0, 0.0])])
            .await
            .expect_err("mismatch");
        assert!(matches!(
            error,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }
}
