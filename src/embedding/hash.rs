//! Deterministic hash-seeded embedding client used as the fallback provider.

use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic embedding client seeded from the SHA-256 of the input text.
///
/// Vectors are unit-length samples from a standard normal distribution, so identical text always
/// maps to the identical vector while unrelated text lands near-orthogonal. They carry no
/// semantics; they keep ingestion and retrieval running when no provider is reachable.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a client producing vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Dimension of produced vectors.
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode a single text.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        if self.dimension == 0 {
            return Vec::new();
        }

        let digest = Sha256::digest(text.as_bytes());
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let mut rng = SplitMix64(u64::from_le_bytes(seed_bytes));

        let mut embedding = Vec::with_capacity(self.dimension);
        while embedding.len() < self.dimension {
            let (first, second) = rng.next_normal_pair();
            embedding.push(first as f32);
            if embedding.len() < self.dimension {
                embedding.push(second as f32);
            }
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }

    fn provider_name(&self) -> &'static str {
        "hash"
    }
}

struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform sample in (0, 1].
    fn next_unit(&mut self) -> f64 {
        ((self.next_u64() >> 11) as f64 + 1.0) / (1u64 << 53) as f64
    }

    /// Box–Muller transform.
    fn next_normal_pair(&mut self) -> (f64, f64) {
        let u1 = self.next_unit();
        let u2 = self.next_unit();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = std::f64::consts::TAU * u2;
        (radius * angle.cos(), radius * angle.sin())
    }
}
