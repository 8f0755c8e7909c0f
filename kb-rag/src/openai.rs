//! Remote embedding provider for OpenAI-compatible `/embeddings` endpoints.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::{DEFAULT_API_URL, DEFAULT_EMBEDDING_MODEL};
use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderErrorKind, RagError, Result};
use crate::provider::{self, ProviderFailure};

const PROVIDER: &str = "OpenAI";

/// Default number of texts sent per request.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Output dimension of well-known OpenAI embedding models.
pub fn known_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// Connection and model settings for [`OpenAIEmbeddingProvider`].
#[derive(Clone)]
pub struct OpenAIEmbeddingConfig {
    /// Bearer token sent with every request.
    pub api_key: String,
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Embedding model name.
    pub model: String,
    /// Expected output dimension. Sent to the API only if set explicitly.
    pub dimensions: Option<usize>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum number of texts per request.
    pub batch_size: usize,
}

impl std::fmt::Debug for OpenAIEmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIEmbeddingConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("timeout", &self.timeout)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl OpenAIEmbeddingConfig {
    /// Create a configuration with the default endpoint and model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: None,
            timeout: Duration::from_secs(30),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request vectors of a specific dimension (Matryoshka truncation).
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of texts per request. Use `1` for one call per text.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// Texts are sent in batches of at most `batch_size`. If any request fails,
/// or a response does not contain exactly one vector of the expected
/// dimension per text, the whole call fails with
/// [`RagError::EmbeddingError`]; nothing is padded or zero-filled.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::openai::{OpenAIEmbeddingConfig, OpenAIEmbeddingProvider};
///
/// let provider = OpenAIEmbeddingProvider::new(OpenAIEmbeddingConfig::new("sk-..."))?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    config: OpenAIEmbeddingConfig,
    dimensions: usize,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty, the batch
    /// size is zero, or the output dimension of an unknown model was not set.
    pub fn new(config: OpenAIEmbeddingConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::ConfigError("embedding API key must not be empty".to_string()));
        }
        if config.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        let dimensions =
            config.dimensions.or_else(|| known_dimensions(&config.model)).ok_or_else(|| {
                RagError::ConfigError(format!(
                    "unknown output dimension for embedding model '{}'",
                    config.model
                ))
            })?;
        let client = provider::build_client(config.timeout)?;
        Ok(Self { client, config, dimensions })
    }

    /// Create a provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::ConfigError("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Self::new(OpenAIEmbeddingConfig::new(api_key))
    }

    fn error(&self, index: usize, kind: ProviderErrorKind, message: String) -> RagError {
        RagError::EmbeddingError {
            provider: PROVIDER.to_string(),
            index: Some(index),
            kind,
            message,
        }
    }

    async fn request(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, ProviderFailure> {
        let request_body = EmbeddingRequest {
            model: &self.config.model,
            input: texts.to_vec(),
            dimensions: self.config.dimensions,
        };

        let response = self
            .client
            .post(provider::endpoint(&self.config.base_url, "embeddings"))
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| provider::transport_failure(&e))?;
        let response = provider::check_status(response).await?;

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| ProviderFailure {
            kind: if e.is_timeout() {
                ProviderErrorKind::Timeout
            } else {
                ProviderErrorKind::Provider
            },
            message: format!("failed to parse response: {e}"),
        })?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.config.model,
            "embedding batch"
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.config.batch_size).enumerate() {
            let offset = batch_no * self.config.batch_size;

            let embedded = self.request(batch).await.map_err(|failure| {
                error!(
                    provider = PROVIDER,
                    index = offset,
                    kind = %failure.kind,
                    error = %failure.message,
                    "embedding request failed"
                );
                self.error(offset, failure.kind, failure.message)
            })?;

            if embedded.len() != batch.len() {
                let index = offset + embedded.len().min(batch.len());
                error!(
                    provider = PROVIDER,
                    index,
                    expected = batch.len(),
                    got = embedded.len(),
                    "embedding count mismatch"
                );
                return Err(self.error(
                    index,
                    ProviderErrorKind::Provider,
                    format!("expected {} embeddings, got {}", batch.len(), embedded.len()),
                ));
            }

            if let Some(pos) = embedded.iter().position(|v| v.len() != self.dimensions) {
                return Err(self.error(
                    offset + pos,
                    ProviderErrorKind::Provider,
                    format!(
                        "expected dimension {}, got {}",
                        self.dimensions,
                        embedded[pos].len()
                    ),
                ));
            }

            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
