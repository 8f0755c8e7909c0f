//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::{ProviderErrorKind, RagError, Result};

/// A provider that maps text to fixed-dimension vectors.
///
/// Implementations wrap a specific embedding backend (in-process model,
/// remote API) behind a unified async interface. Batch embedding is the
/// primary operation: it returns one vector per input text, in input order,
/// or fails as a whole. Implementations must never substitute placeholder
/// vectors for texts they could not embed.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::EmbeddingProvider;
///
/// let vectors = provider.embed_batch(&["Taipei 101", "Lotus Pond"]).await?;
/// assert_eq!(vectors[0].len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] carrying the index of the
    /// offending text if any item cannot be embedded.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| RagError::EmbeddingError {
            provider: self.model_name().to_string(),
            index: Some(0),
            kind: ProviderErrorKind::Provider,
            message: "provider returned no embedding".to_string(),
        })
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Return the name of the underlying model.
    fn model_name(&self) -> &str;
}
