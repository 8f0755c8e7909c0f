//! In-process sentence embeddings with a BERT-family model.
//!
//! [`BertEmbeddingProvider`] loads a sentence-transformers checkpoint
//! (`model.safetensors`, `tokenizer.json`, `config.json`) with `candle`,
//! mean-pools the last hidden state over the attention mask and
//! L2-normalises the result. With `all-MiniLM-L6-v2` the vectors have 384
//! dimensions.
//!
//! This module is only available when the `bert` feature is enabled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, error, info};

use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderErrorKind, RagError, Result};

/// Weights file expected inside a model directory.
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// Tokenizer file expected inside a model directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// Model configuration file expected inside a model directory.
pub const CONFIG_FILE: &str = "config.json";

/// Default number of texts run through the model at once.
pub const DEFAULT_BATCH_SIZE: usize = 32;

const MAX_SEQUENCE_LENGTH: usize = 512;

/// Where to find a checkpoint and how to run it.
#[derive(Debug, Clone)]
pub struct BertEmbeddingConfig {
    /// Name reported by [`EmbeddingProvider::model_name`] and bound to collections.
    pub model_name: String,
    /// Path of the safetensors weights.
    pub model_path: PathBuf,
    /// Path of the HuggingFace tokenizer definition.
    pub tokenizer_path: PathBuf,
    /// Path of the BERT `config.json`.
    pub config_path: PathBuf,
    /// `cpu`, `cuda`, `metal` or `auto`.
    pub device: String,
    /// Texts per forward pass.
    pub batch_size: usize,
}

impl BertEmbeddingConfig {
    /// Describe the checkpoint stored in `dir` under the standard file names.
    pub fn from_dir(model_name: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            model_name: model_name.into(),
            model_path: dir.join(WEIGHTS_FILE),
            tokenizer_path: dir.join(TOKENIZER_FILE),
            config_path: dir.join(CONFIG_FILE),
            device: "auto".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Select the device (`cpu`, `cuda`, `metal` or `auto`).
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Set the number of texts per forward pass.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

struct BertRuntime {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// An [`EmbeddingProvider`] running a BERT sentence-embedding model in process.
///
/// Inference runs on the blocking thread pool so async callers are not
/// stalled by the forward pass.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::bert::{BertEmbeddingConfig, BertEmbeddingProvider};
///
/// let config = BertEmbeddingConfig::from_dir("all-MiniLM-L6-v2", "models/all-MiniLM-L6-v2");
/// let provider = BertEmbeddingProvider::new(config)?;
/// assert_eq!(provider.dimensions(), 384);
/// ```
pub struct BertEmbeddingProvider {
    runtime: Arc<BertRuntime>,
    model_name: String,
    dimensions: usize,
    batch_size: usize,
}

impl std::fmt::Debug for BertEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbeddingProvider")
            .field("model_name", &self.model_name)
            .field("dimensions", &self.dimensions)
            .field("device", &self.runtime.device)
            .finish_non_exhaustive()
    }
}

impl BertEmbeddingProvider {
    /// Load the checkpoint described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a file is missing or unreadable,
    /// the device is unknown or unavailable, or the weights do not match the
    /// configuration.
    pub fn new(config: BertEmbeddingConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        for path in [&config.model_path, &config.tokenizer_path, &config.config_path] {
            if !path.is_file() {
                return Err(RagError::ConfigError(format!(
                    "embedding model '{}' is missing {}",
                    config.model_name,
                    path.display()
                )));
            }
        }

        let device = select_device(&config.device)?;
        let load_err = |what: &str, e: &dyn std::fmt::Display| {
            RagError::ConfigError(format!("failed to load {what} of '{}': {e}", config.model_name))
        };

        let raw_config = std::fs::read_to_string(&config.config_path)
            .map_err(|e| load_err("config", &e))?;
        let bert_config: Config =
            serde_json::from_str(&raw_config).map_err(|e| load_err("config", &e))?;

        let tensors = candle_core::safetensors::load(&config.model_path, &device)
            .map_err(|e| load_err("weights", &e))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = BertModel::load(vb, &bert_config).map_err(|e| load_err("model", &e))?;

        let mut tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| load_err("tokenizer", &e))?;
        match tokenizer.get_padding_mut() {
            Some(padding) => padding.strategy = PaddingStrategy::BatchLongest,
            None => {
                tokenizer.with_padding(Some(PaddingParams {
                    strategy: PaddingStrategy::BatchLongest,
                    ..Default::default()
                }));
            }
        }
        if tokenizer.get_truncation().is_none() {
            tokenizer
                .with_truncation(Some(TruncationParams {
                    max_length: MAX_SEQUENCE_LENGTH,
                    ..Default::default()
                }))
                .map_err(|e| load_err("tokenizer", &e))?;
        }

        let dimensions = bert_config.hidden_size;
        info!(model = %config.model_name, dimensions, device = ?device, "loaded embedding model");

        Ok(Self {
            runtime: Arc::new(BertRuntime { model, tokenizer, device }),
            model_name: config.model_name,
            dimensions,
            batch_size: config.batch_size,
        })
    }

    fn error(&self, index: usize, message: String) -> RagError {
        RagError::EmbeddingError {
            provider: self.model_name.clone(),
            index: Some(index),
            kind: ProviderErrorKind::Provider,
            message,
        }
    }
}

fn select_device(name: &str) -> Result<Device> {
    let unavailable =
        |e: candle_core::Error| RagError::ConfigError(format!("device '{name}' unavailable: {e}"));
    match name.to_ascii_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).map_err(unavailable),
        "metal" => Device::new_metal(0).map_err(unavailable),
        "auto" | "" => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0).map_err(unavailable)
            } else if candle_core::utils::metal_is_available() {
                Device::new_metal(0).map_err(unavailable)
            } else {
                Ok(Device::Cpu)
            }
        }
        other => Err(RagError::ConfigError(format!("unknown device '{other}'"))),
    }
}

impl BertRuntime {
    /// Embed every text, one forward pass per batch. On failure returns the
    /// index of the first text of the failing batch.
    fn embed_all(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> std::result::Result<Vec<Vec<f32>>, (usize, String)> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            let embedded = self.embed_batch(batch).map_err(|message| (offset, message))?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, String> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.iter().map(String::as_str).collect::<Vec<_>>(), true)
            .map_err(|e| format!("tokenization failed: {e}"))?;

        let tensor_err = |e: candle_core::Error| format!("inference failed: {e}");
        let ids = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_ids(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()
            .map_err(tensor_err)?;
        let masks = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()
            .map_err(tensor_err)?;

        let token_ids = Tensor::stack(&ids, 0).map_err(tensor_err)?;
        let attention_mask = Tensor::stack(&masks, 0).map_err(tensor_err)?;
        let token_type_ids = token_ids.zeros_like().map_err(tensor_err)?;

        let hidden = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))
            .map_err(tensor_err)?;
        mean_pool_normalized(&hidden, &attention_mask)
            .and_then(|pooled| pooled.to_vec2::<f32>())
            .map_err(tensor_err)
    }
}

/// Average `hidden` (batch, seq, hidden) over the positions where `mask`
/// (batch, seq) is set, then scale each row to unit length.
pub(crate) fn mean_pool_normalized(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9f32, f32::MAX)?;
    let pooled = summed.broadcast_div(&counts)?;
    let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12f32, f32::MAX)?;
    pooled.broadcast_div(&norms)
}

#[async_trait]
impl EmbeddingProvider for BertEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model_name, batch_size = texts.len(), "embedding batch");

        let runtime = Arc::clone(&self.runtime);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let batch_size = self.batch_size;

        let result = tokio::task::spawn_blocking(move || runtime.embed_all(&owned, batch_size))
            .await
            .map_err(|e| self.error(0, format!("embedding task failed: {e}")))?;

        result.map_err(|(index, message)| {
            error!(model = %self.model_name, index, error = %message, "embedding failed");
            self.error(index, message)
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    #[test]
    fn mean_pooling_skips_padding_and_normalises() {
        let hidden =
            Tensor::new(&[[[1f32, 0.0], [3.0, 0.0], [100.0, 100.0]]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();

        let pooled = mean_pool_normalized(&hidden, &mask).unwrap().to_vec2::<f32>().unwrap();

        assert_eq!(pooled.len(), 1);
        assert!((pooled[0][0] - 1.0).abs() < 1e-6);
        assert!(pooled[0][1].abs() < 1e-6);
    }

    #[test]
    fn missing_checkpoint_is_a_config_error() {
        let dir = std::env::temp_dir().join("kb-rag-no-such-model");
        let err = BertEmbeddingProvider::new(BertEmbeddingConfig::from_dir("all-MiniLM-L6-v2", dir))
            .unwrap_err();
        assert!(matches!(err, RagError::ConfigError(ref msg) if msg.contains(WEIGHTS_FILE)));
    }

    #[test]
    fn unknown_device_is_rejected() {
        assert!(select_device("tpu").is_err());
        assert!(matches!(select_device("cpu"), Ok(Device::Cpu)));
    }

    // Needs the checkpoint in models/all-MiniLM-L6-v2.
    // Run with: cargo test --features bert -- --ignored
    #[tokio::test]
    #[ignore]
    async fn paraphrases_are_closer_than_unrelated_text() {
        let config =
            BertEmbeddingConfig::from_dir("all-MiniLM-L6-v2", "models/all-MiniLM-L6-v2")
                .with_device("cpu");
        let provider = BertEmbeddingProvider::new(config).unwrap();
        assert_eq!(provider.dimensions(), 384);

        let vectors = provider
            .embed_batch(&[
                "Taipei has the 101 Tower and Ximending shopping district.",
                "skyscraper",
                "Kaohsiung has Lotus Pond and the Pier-2 Art Center.",
            ])
            .await
            .unwrap();

        let metric = DistanceMetric::Cosine;
        let near = metric.distance(&vectors[1], &vectors[0]);
        assert!(near < 1.0, "paraphrase distance {near}");
        assert!(near < metric.distance(&vectors[1], &vectors[2]));
    }
}
