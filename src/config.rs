use crate::{
    processing::chunking::ChunkingConfig,
    retrieval::{CompositeWeights, ConfidenceThresholds, RetrievalConfig},
    throttle::ThrottleConfig,
};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Values parsed individually but are inconsistent with each other.
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Runtime configuration for the ingestion and retrieval pipelines.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage backend used for vectors.
    pub vector_backend: VectorBackend,
    /// Base URL of the Qdrant instance (required for the Qdrant backend).
    pub qdrant_url: Option<String>,
    /// Name of the Qdrant collection shared by all tenants.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Directory holding per-tenant vector files for the local store.
    pub local_store_dir: PathBuf,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Base URL of the OpenAI-compatible embeddings API.
    pub openai_url: String,
    /// API key for the OpenAI-compatible embeddings API.
    pub openai_api_key: Option<String>,
    /// Generation backend used for query expansion and field questions.
    pub generation_provider: GenerationProvider,
    /// Generation model identifier.
    pub generation_model: String,
    /// Chunk sizing.
    pub chunking: ChunkingConfig,
    /// Retrieval and ranking parameters.
    pub retrieval: RetrievalConfig,
    /// Shared throttling discipline for outbound model calls.
    pub throttle: ThrottleConfig,
}

/// Supported vector storage backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorBackend {
    /// Qdrant over HTTP, failing over to the local store when unreachable.
    Qdrant,
    /// Per-tenant JSON files with brute-force similarity search.
    Local,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic hash vectors only (no provider).
    Hash,
}

/// Supported text-generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationProvider {
    /// No generation backend; rule-based fallbacks are used.
    None,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    ///
    /// A `.env` file in the working directory is honoured when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (used by tests and embedders).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Lookup(lookup);

        let vector_backend = vars
            .optional("VECTOR_BACKEND")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("VECTOR_BACKEND".into()))
            })
            .transpose()?
            .unwrap_or(VectorBackend::Local);
        let qdrant_url = vars.optional("QDRANT_URL");
        if vector_backend == VectorBackend::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }

        let embedding_provider = vars
            .optional("EMBEDDING_PROVIDER")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))
            })
            .transpose()?
            .unwrap_or(EmbeddingProvider::Hash);
        let openai_api_key = vars.optional("OPENAI_API_KEY");
        if embedding_provider == EmbeddingProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        let generation_provider = vars
            .optional("GENERATION_PROVIDER")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("GENERATION_PROVIDER".into()))
            })
            .transpose()?
            .unwrap_or(GenerationProvider::None);

        let embedding_dimension: usize = vars.parsed("EMBEDDING_DIMENSION", 768)?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }

        let chunking = ChunkingConfig {
            target_size: vars.parsed("CHUNK_TARGET_SIZE", 1000)?,
            overlap: vars.parsed("CHUNK_OVERLAP", 200)?,
            min_chunk_size: vars.parsed("CHUNK_MIN_SIZE", 100)?,
            ..ChunkingConfig::default()
        };
        chunking
            .validate()
            .map_err(|error| ConfigError::Inconsistent(error.to_string()))?;

        let defaults = RetrievalConfig::default();
        let thresholds = ConfidenceThresholds::new(
            vars.parsed("CONFIDENCE_CRITICAL", defaults.thresholds.critical)?,
            vars.parsed("CONFIDENCE_HIGH", defaults.thresholds.high)?,
            vars.parsed("CONFIDENCE_ACCEPTABLE", defaults.thresholds.acceptable)?,
        )
        .map_err(|error| ConfigError::Inconsistent(error.to_string()))?;
        let retrieval = RetrievalConfig {
            variation_count: vars.parsed("RETRIEVAL_VARIATIONS", defaults.variation_count)?,
            top_k_per_variation: vars.parsed("RETRIEVAL_TOP_K", defaults.top_k_per_variation)?,
            final_count: vars.parsed("RETRIEVAL_FINAL_COUNT", defaults.final_count)?,
            min_similarity: vars.parsed("RETRIEVAL_MIN_SIMILARITY", thresholds.acceptable)?,
            weights: CompositeWeights {
                similarity: vars.parsed("RANK_WEIGHT_SIMILARITY", defaults.weights.similarity)?,
                quality: vars.parsed("RANK_WEIGHT_QUALITY", defaults.weights.quality)?,
                importance: vars.parsed("RANK_WEIGHT_IMPORTANCE", defaults.weights.importance)?,
            },
            always_admit_score: vars.parsed("RANK_ALWAYS_ADMIT", defaults.always_admit_score)?,
            diversity_words: vars
                .optional("RANK_DIVERSITY_WORDS")
                .map(|raw| {
                    raw.parse::<usize>()
                        .map_err(|_| ConfigError::InvalidValue("RANK_DIVERSITY_WORDS".into()))
                })
                .transpose()?,
            request_timeout: Duration::from_secs(
                vars.parsed("RETRIEVAL_TIMEOUT_SECS", defaults.request_timeout.as_secs())?,
            ),
            thresholds,
            ..defaults
        };
        retrieval
            .validate()
            .map_err(|error| ConfigError::Inconsistent(error.to_string()))?;

        let throttle_defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            max_concurrent: vars.parsed("MAX_CONCURRENT_CALLS", throttle_defaults.max_concurrent)?,
            min_delay: Duration::from_millis(vars.parsed(
                "MIN_CALL_DELAY_MS",
                throttle_defaults.min_delay.as_millis() as u64,
            )?),
            max_batch_size: vars.parsed("MAX_BATCH_SIZE", throttle_defaults.max_batch_size)?,
            call_timeout: Duration::from_secs(vars.parsed(
                "CALL_TIMEOUT_SECS",
                throttle_defaults.call_timeout.as_secs(),
            )?),
            max_retries: vars.parsed("MAX_RETRIES", throttle_defaults.max_retries)?,
            ..throttle_defaults
        };
        if throttle.max_concurrent == 0 || throttle.max_batch_size == 0 {
            return Err(ConfigError::Inconsistent(
                "MAX_CONCURRENT_CALLS and MAX_BATCH_SIZE must be greater than zero".into(),
            ));
        }

        Ok(Self {
            vector_backend,
            qdrant_url,
            qdrant_collection_name: vars
                .optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "docsift".to_string()),
            qdrant_api_key: vars.optional("QDRANT_API_KEY"),
            local_store_dir: vars
                .optional("LOCAL_VECTOR_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./local_vector_storage")),
            embedding_provider,
            embedding_model: vars
                .optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            embedding_dimension,
            ollama_url: vars
                .optional("OLLAMA_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            openai_url: vars
                .optional("OPENAI_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            openai_api_key,
            generation_provider,
            generation_model: vars
                .optional("GENERATION_MODEL")
                .unwrap_or_else(|| "llama3.1".to_string()),
            chunking,
            retrieval,
            throttle,
        })
    }

    /// Log the effective configuration without secrets.
    pub fn log_summary(&self) {
        tracing::debug!(
            vector_backend = ?self.vector_backend,
            qdrant_url = ?self.qdrant_url,
            collection = %self.qdrant_collection_name,
            local_store_dir = %self.local_store_dir.display(),
            embedding_provider = ?self.embedding_provider,
            embedding_model = %self.embedding_model,
            embedding_dimension = self.embedding_dimension,
            generation_provider = ?self.generation_provider,
            chunk_target = self.chunking.target_size,
            chunk_overlap = self.chunking.overlap,
            variations = self.retrieval.variation_count,
            max_concurrent = self.throttle.max_concurrent,
            "Loaded configuration"
        );
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string())),
            None => Ok(default),
        }
    }
}

impl std::str::FromStr for VectorBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" | "none" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}
