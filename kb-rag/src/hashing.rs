//! In-process embedding model based on feature hashing.
//!
//! [`HashingEmbeddingProvider`] needs no network and no model files: every
//! lower-cased alphanumeric token is hashed with FNV-1a into one of
//! `dimensions` buckets with a hash-derived sign, and the term-frequency
//! vector is L2-normalised. Texts sharing words end up close under cosine
//! distance; texts sharing none are orthogonal unless their tokens collide.
//!
//! The similarity is purely lexical: paraphrases without shared words are
//! unrelated. Use it for offline runs and tests (model tag `hashing` or
//! `hashing-N`); semantic retrieval needs the `bert` model.

use async_trait::async_trait;
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// The default dimensionality, matching common sentence-embedding models.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Model tag prefix; the reported name is always `hashing-{dimensions}`.
pub const MODEL_PREFIX: &str = "hashing";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A deterministic, offline [`EmbeddingProvider`].
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::HashingEmbeddingProvider;
///
/// let provider = HashingEmbeddingProvider::new(384)?;
/// let vector = provider.embed("Taipei 101").await?;
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model_name: String,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing vectors of the given dimension.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::ConfigError(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimensions, model_name: format!("{MODEL_PREFIX}-{dimensions}") })
    }

    /// Parse a model tag naming this provider: `hashing` (using
    /// `default_dimensions`) or `hashing-N`.
    ///
    /// Returns `None` for any other model name.
    pub fn parse_model_name(name: &str, default_dimensions: usize) -> Option<Result<Self>> {
        let rest = name.trim().strip_prefix(MODEL_PREFIX)?;
        if rest.is_empty() {
            return Some(Self::new(default_dimensions));
        }
        let dimensions = rest.strip_prefix('-')?;
        let parsed = dimensions
            .parse::<usize>()
            .map_err(|e| RagError::ConfigError(format!("invalid hashing model '{name}': {e}")));
        Some(parsed.and_then(Self::new))
    }

    /// Embed one text synchronously.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            let hash = fnv1a(&token);
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            model_name: format!("{MODEL_PREFIX}-{DEFAULT_DIMENSIONS}"),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!(provider = %self.model_name, batch_size = texts.len(), "embedding batch");
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    #[test]
    fn embeddings_are_deterministic_and_normalised() {
        let provider = HashingEmbeddingProvider::default();
        let a = provider.embed_sync("Taipei has the 101 Tower");
        let b = provider.embed_sync("Taipei has the 101 Tower");
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSIONS);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn case_and_punctuation_are_ignored() {
        let provider = HashingEmbeddingProvider::default();
        assert_eq!(provider.embed_sync("Lotus Pond!"), provider.embed_sync("lotus, pond"));
    }

    #[test]
    fn shared_words_are_closer_than_disjoint_ones() {
        let provider = HashingEmbeddingProvider::default();
        let query = provider.embed_sync("Taipei attractions");
        let near = provider.embed_sync("Taipei has the 101 Tower");
        let far = provider.embed_sync("Kaohsiung has Lotus Pond");
        let metric = DistanceMetric::Cosine;
        assert!(metric.distance(&query, &near) < metric.distance(&query, &far));
    }

    #[test]
    fn model_tags_parse() {
        let default = HashingEmbeddingProvider::parse_model_name("hashing", 64).unwrap().unwrap();
        assert_eq!(default.model_name(), "hashing-64");
        let sized = HashingEmbeddingProvider::parse_model_name("hashing-128", 64).unwrap().unwrap();
        assert_eq!(sized.dimensions(), 128);
        assert!(HashingEmbeddingProvider::parse_model_name("hashing-x", 64).unwrap().is_err());
        assert!(HashingEmbeddingProvider::parse_model_name("hashingfoo", 64).is_none());
        assert!(HashingEmbeddingProvider::parse_model_name("all-MiniLM-L6-v2", 64).is_none());
    }

    #[test]
    fn zero_dimensions_is_rejected() {
        assert!(HashingEmbeddingProvider::new(0).is_err());
    }

    #[test]
    fn fnv1a_matches_reference_vector() {
        assert_eq!(fnv1a(""), FNV_OFFSET);
        assert_eq!(fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }
}
