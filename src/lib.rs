#![deny(missing_docs)]

//! Core library for docsift: tenant-scoped document chunking and multi-query evidence retrieval.

/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction, adapters, and the fallback gateway.
pub mod embedding;
/// Text-generation client used for query expansion and field questions.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Document ingestion pipeline.
pub mod processing;
/// Query expansion, retrieval, ranking, and confidence grading.
pub mod retrieval;
/// Tenant identifiers.
pub mod tenant;
/// Shared rate limiting and retry discipline for outbound calls.
pub mod throttle;
/// Vector index contract and its Qdrant, local, and failover adapters.
pub mod vector;
