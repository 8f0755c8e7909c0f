//! Configuration for the RAG pipeline.
//!
//! [`RagConfig`] holds the chunking and retrieval parameters and is validated
//! by its builder. [`Settings`] is the whole environment surface of a
//! deployment: credentials, endpoints, model choices, storage location and a
//! [`RagConfig`]. It is built once at startup and passed by reference into
//! [`RagServiceFactory`](crate::RagServiceFactory).

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingStrategy;
use crate::distance::DistanceMetric;
use crate::error::{RagError, Result};

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Default number of nearest neighbours to fetch from the store.
    pub top_k: usize,
    /// Default maximum distance for a result to count as relevant.
    ///
    /// Lower distance means more similar; results with a distance above this
    /// value are dropped.
    pub distance_threshold: f32,
    /// How documents are split.
    #[serde(default)]
    pub chunking: ChunkingStrategy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 5,
            distance_threshold: 0.5,
            chunking: ChunkingStrategy::Recursive,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `distance_threshold` is negative or not finite
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if !self.distance_threshold.is_finite() || self.distance_threshold < 0.0 {
            return Err(RagError::ConfigError(format!(
                "distance_threshold ({}) must be a finite, non-negative number",
                self.distance_threshold
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of results to fetch from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the default maximum distance for filtering results.
    pub fn distance_threshold(mut self, threshold: f32) -> Self {
        self.config.distance_threshold = threshold;
        self
    }

    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Default OpenAI-compatible API base URL.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// Default chat model used for answer generation.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Default remote embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Default in-process embedding model, loaded from `{model_dir}/{name}/`.
pub const DEFAULT_LOCAL_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// Deployment settings, sourced from the environment.
///
/// | variable | default |
/// |---|---|
/// | `OPENAI_API_KEY` | required |
/// | `OPENAI_API_URL` | `https://api.openai.com/v1` |
/// | `KBRAG_EMBEDDING_API_KEY` | `OPENAI_API_KEY` |
/// | `KBRAG_EMBEDDING_API_URL` | `OPENAI_API_URL` |
/// | `KBRAG_USE_LOCAL_EMBEDDINGS` | `true` |
/// | `KBRAG_EMBEDDING_DIMENSIONS` | `384` |
/// | `KBRAG_MODEL_DIR` | `models` |
/// | `KBRAG_DEVICE` | `auto` |
/// | `KBRAG_CHAT_MODEL` | `gpt-3.5-turbo` |
/// | `KBRAG_TEMPERATURE` | `0.3` |
/// | `KBRAG_TIMEOUT_SECS` | `30` |
/// | `KBRAG_CHUNK_SIZE` / `KBRAG_CHUNK_OVERLAP` | `500` / `50` |
/// | `KBRAG_TOP_K` / `KBRAG_THRESHOLD` | `5` / `0.5` |
/// | `KBRAG_CHUNKER` | `recursive` |
/// | `KBRAG_DATA_DIR` | `.` |
/// | `KBRAG_DISTANCE` | `cosine` |
#[derive(Clone, PartialEq)]
pub struct Settings {
    /// API key of the generation provider.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible generation API.
    pub api_url: String,
    /// API key of the remote embedding provider.
    pub embedding_api_key: String,
    /// Base URL of the remote embedding provider.
    pub embedding_api_url: String,
    /// Use the in-process embedding model instead of the remote endpoint.
    pub use_local_embeddings: bool,
    /// Output dimension of the `hashing` embedding model, and of remote
    /// models whose dimension is not known.
    pub embedding_dimensions: usize,
    /// Directory holding one sub-directory per in-process model
    /// (`{model_dir}/{model_name}/model.safetensors`, ...).
    pub model_dir: PathBuf,
    /// Device for in-process models: `cpu`, `cuda`, `metal` or `auto`.
    pub device: String,
    /// Model used for answer generation.
    pub chat_model: String,
    /// Sampling temperature used for answer generation.
    pub temperature: f32,
    /// Timeout applied to every remote call.
    pub timeout: Duration,
    /// Root directory under which persistent collections are stored.
    pub data_dir: PathBuf,
    /// Distance metric of newly created collections.
    pub distance: DistanceMetric,
    /// Chunking and retrieval defaults.
    pub rag: RagConfig,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("embedding_api_key", &"<redacted>")
            .field("embedding_api_url", &self.embedding_api_url)
            .field("use_local_embeddings", &self.use_local_embeddings)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("model_dir", &self.model_dir)
            .field("device", &self.device)
            .field("chat_model", &self.chat_model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("data_dir", &self.data_dir)
            .field("distance", &self.distance)
            .field("rag", &self.rag)
            .finish()
    }
}

impl Settings {
    /// Settings with every default applied and the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            embedding_api_key: api_key.clone(),
            api_key,
            api_url: DEFAULT_API_URL.to_string(),
            embedding_api_url: DEFAULT_API_URL.to_string(),
            use_local_embeddings: true,
            embedding_dimensions: 384,
            model_dir: PathBuf::from("models"),
            device: "auto".to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.3,
            timeout: Duration::from_secs(30),
            data_dir: PathBuf::from("."),
            distance: DistanceMetric::Cosine,
            rag: RagConfig::default(),
        }
    }

    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `OPENAI_API_KEY` is missing or
    /// empty, or if any variable holds a value that cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("OPENAI_API_KEY").ok_or_else(|| {
            RagError::ConfigError("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let api_url = get("OPENAI_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let defaults = Self::new(api_key.clone());
        let rag = RagConfig {
            chunk_size: parse_var(&get, "KBRAG_CHUNK_SIZE", defaults.rag.chunk_size)?,
            chunk_overlap: parse_var(&get, "KBRAG_CHUNK_OVERLAP", defaults.rag.chunk_overlap)?,
            top_k: parse_var(&get, "KBRAG_TOP_K", defaults.rag.top_k)?,
            distance_threshold: parse_var(
                &get,
                "KBRAG_THRESHOLD",
                defaults.rag.distance_threshold,
            )?,
            chunking: parse_var(&get, "KBRAG_CHUNKER", defaults.rag.chunking)?,
        };
        rag.validate()?;

        let timeout_secs: u64 =
            parse_var(&get, "KBRAG_TIMEOUT_SECS", defaults.timeout.as_secs())?;
        if timeout_secs == 0 {
            return Err(RagError::ConfigError(
                "KBRAG_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let embedding_dimensions =
            parse_var(&get, "KBRAG_EMBEDDING_DIMENSIONS", defaults.embedding_dimensions)?;
        if embedding_dimensions == 0 {
            return Err(RagError::ConfigError(
                "KBRAG_EMBEDDING_DIMENSIONS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            embedding_api_key: get("KBRAG_EMBEDDING_API_KEY").unwrap_or_else(|| api_key.clone()),
            embedding_api_url: get("KBRAG_EMBEDDING_API_URL").unwrap_or_else(|| api_url.clone()),
            api_key,
            api_url,
            use_local_embeddings: match get("KBRAG_USE_LOCAL_EMBEDDINGS") {
                Some(raw) => parse_bool("KBRAG_USE_LOCAL_EMBEDDINGS", &raw)?,
                None => defaults.use_local_embeddings,
            },
            embedding_dimensions,
            model_dir: get("KBRAG_MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir),
            device: get("KBRAG_DEVICE").unwrap_or(defaults.device),
            chat_model: get("KBRAG_CHAT_MODEL").unwrap_or(defaults.chat_model),
            temperature: parse_var(&get, "KBRAG_TEMPERATURE", defaults.temperature)?,
            timeout: Duration::from_secs(timeout_secs),
            data_dir: get("KBRAG_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            distance: parse_var(&get, "KBRAG_DISTANCE", defaults.distance)?,
            rag,
        })
    }
}

fn parse_var<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| RagError::ConfigError(format!("invalid value '{raw}' for {name}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::ConfigError(format!("invalid boolean '{raw}' for {name}"))),
    }
}
