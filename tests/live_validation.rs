use std::{collections::HashMap, env, sync::Arc};

use docsift::{
    config::Config,
    embedding::{EmbeddingClient, OllamaEmbeddingClient},
    metrics::PipelineMetrics,
    processing::ProcessingService,
    retrieval::RetrievalRequest,
    tenant::TenantId,
    vector::{
        DeleteSelector, MetadataFilter, QdrantIndex, VectorIndex, VectorMetadata, VectorRecord,
        content_fingerprint,
    },
};

/// Process environment layered over defaults for a local Qdrant and Ollama.
fn live_config(dir: &std::path::Path) -> Config {
    let defaults: HashMap<&str, String> = HashMap::from([
        ("VECTOR_BACKEND", "qdrant".to_string()),
        ("QDRANT_URL", "http://127.0.0.1:6333".to_string()),
        ("QDRANT_COLLECTION_NAME", "docsift-live".to_string()),
        ("EMBEDDING_PROVIDER", "ollama".to_string()),
        ("EMBEDDING_MODEL", "nomic-embed-text".to_string()),
        ("EMBEDDING_DIMENSION", "768".to_string()),
        ("OLLAMA_URL", "http://127.0.0.1:11434".to_string()),
        ("LOCAL_VECTOR_DIR", dir.display().to_string()),
    ]);
    Config::from_lookup(|key| {
        env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| defaults.get(key).cloned())
    })
    .expect("live configuration")
}

#[tokio::test]
#[ignore = "Requires live Qdrant"]
async fn live_qdrant_tenant_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = live_config(dir.path());
    let url = config.qdrant_url.clone().expect("QDRANT_URL");
    let index = QdrantIndex::connect(&url, config.qdrant_api_key.clone(), "docsift-live-index", 4)
        .await
        .expect("Qdrant should be reachable");

    let tenant = TenantId::new("live-tenant").expect("tenant");
    let text = "Live validation chunk for the docsift Qdrant adapter.";
    let record = VectorRecord {
        id: "live-doc_0".into(),
        vector: vec![0.5, 0.5, 0.5, 0.5],
        metadata: VectorMetadata {
            tenant_id: tenant.as_str().to_string(),
            document_id: "live-doc".into(),
            filename: "live.txt".into(),
            chunk_index: 0,
            start: 0,
            end: text.chars().count(),
            text: text.into(),
            preview: text.into(),
            quality_score: 0.8,
            importance_score: 0.4,
            entity_density: 0.1,
            information_richness: 0.6,
            content_type: Default::default(),
            semantic_keywords: vec!["docsift".into()],
            contains_fields: false,
            word_count: 8,
            fingerprint: content_fingerprint(text),
            indexed_at: "2025-01-01T00:00:00Z".into(),
            extra: Default::default(),
        },
    };
    index.upsert(&tenant, vec![record]).await.expect("upsert");

    let hits = index
        .query(&tenant, &[0.5, 0.5, 0.5, 0.5], 5, &MetadataFilter::default())
        .await
        .expect("query");
    assert!(hits.iter().any(|hit| hit.id == "live-doc_0"));

    let other = TenantId::new("live-other").expect("tenant");
    let foreign = index
        .query(&other, &[0.5, 0.5, 0.5, 0.5], 5, &MetadataFilter::default())
        .await
        .expect("query");
    assert!(foreign.is_empty(), "other tenants must not see the record");

    index
        .delete(&tenant, &DeleteSelector::Document("live-doc".into()))
        .await
        .expect("delete");
    assert_eq!(index.count(&tenant).await.expect("count"), 0);
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_ollama_embedding_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = live_config(dir.path());
    let client = OllamaEmbeddingClient::new(config.ollama_url.clone(), config.embedding_model.clone())
        .expect("client");
    let vectors = client
        .generate_embeddings(vec!["docsift live embedding".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected embedding per input chunk");
    assert_eq!(vectors[0].len(), config.embedding_dimension, "embedding dimension mismatch");
}

#[tokio::test]
#[ignore = "Requires live Qdrant and Ollama"]
async fn live_service_ingest_and_retrieve() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = live_config(dir.path());
    let service = ProcessingService::from_config(&config, Arc::new(PipelineMetrics::new()))
        .await
        .expect("service");
    let tenant = TenantId::new("live-service").expect("tenant");

    let outcome = service
        .pipeline()
        .ingest_text(
            &tenant,
            "falcon.txt",
            "The Falcon pump moves clean water through the cooling loop. Operators inspect the \
             impeller housing every week and log the pressure reading in the maintenance book.",
        )
        .await
        .expect("ingest");
    assert!(outcome.chunks_indexed >= 1);

    let (response, bundle) = service
        .retrieve_evidence(RetrievalRequest::new(tenant.clone(), "How often is the impeller inspected?"))
        .await
        .expect("retrieve");
    assert!(!response.results.is_empty());
    assert!(!bundle.render_context().is_empty());

    service
        .pipeline()
        .delete_document(&tenant, &outcome.document.id)
        .await
        .expect("cleanup");
}
