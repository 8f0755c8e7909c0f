//! Backend selection and eager service construction.
//!
//! [`RagServiceFactory`] turns a knowledge base name, a backend tag and an
//! embedding model name into a ready [`KnowledgeBase`]. Backends are looked
//! up in a registry of [`BackendOpener`]s keyed by [`BackendKind`], so tests
//! and embedders of this crate can plug in their own stores.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{RagServiceFactory, RagService, Settings};
//!
//! let factory = RagServiceFactory::new(Settings::from_env()?);
//! let kb = factory.create("travel", "sqlite", "all-MiniLM-L6-v2").await?;
//! println!("{} records", kb.count().await?);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Settings;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::GenerationProvider;
use crate::hashing::HashingEmbeddingProvider;
use crate::inmemory::InMemoryVectorStore;
use crate::retriever::Retriever;
use crate::service::KnowledgeBase;
use crate::vectorstore::{CollectionHandle, CollectionInfo, VectorStore};

/// The closed set of vector store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Persistent SQLite store under `{data_dir}/{kb_name}_vs/`.
    Sqlite,
    /// Process-local store; nothing survives a restart.
    InMemory,
}

impl BackendKind {
    /// Every backend kind.
    pub const ALL: [BackendKind; 2] = [BackendKind::Sqlite, BackendKind::InMemory];

    /// Canonical tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::InMemory => "in-memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "chromadb" | "persistent" => Ok(Self::Sqlite),
            "memory" | "in-memory" | "inmemory" => Ok(Self::InMemory),
            _ => Err(RagError::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Opens the vector store behind one [`BackendKind`].
#[async_trait]
pub trait BackendOpener: Send + Sync {
    /// Open (or create) the store holding knowledge base `kb_name`.
    async fn open(&self, kb_name: &str, settings: &Settings) -> Result<Arc<dyn VectorStore>>;
}

/// Opens a fresh [`InMemoryVectorStore`] per service.
#[derive(Debug, Default)]
pub struct InMemoryOpener;

#[async_trait]
impl BackendOpener for InMemoryOpener {
    async fn open(&self, _kb_name: &str, _settings: &Settings) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(InMemoryVectorStore::new()))
    }
}

/// Opens a [`SqliteVectorStore`](crate::sqlite::SqliteVectorStore) in
/// `{data_dir}/{kb_name}_vs/`.
#[cfg(feature = "sqlite")]
#[derive(Debug, Default)]
pub struct SqliteOpener;

#[cfg(feature = "sqlite")]
#[async_trait]
impl BackendOpener for SqliteOpener {
    async fn open(&self, kb_name: &str, settings: &Settings) -> Result<Arc<dyn VectorStore>> {
        let dir = settings.data_dir.join(format!("{kb_name}_vs"));
        let store = crate::sqlite::SqliteVectorStore::open_in_dir(dir).await?;
        Ok(Arc::new(store))
    }
}

/// Builds [`KnowledgeBase`] services from [`Settings`].
///
/// The embedder is chosen once per service from the model name:
///
/// - `hashing` or `hashing-{dims}`: the lexical [`HashingEmbeddingProvider`]
/// - anything else with `use_local_embeddings`: a BERT checkpoint loaded from
///   `{model_dir}/{model_name}/` (feature `bert`)
/// - anything else: the remote OpenAI-compatible endpoint
///
/// The model name and dimension are bound to the collection on first use, and
/// reopening it with another model fails. The embedder can be replaced with
/// [`with_embedder`](Self::with_embedder), and the generator with
/// [`with_generator`](Self::with_generator).
pub struct RagServiceFactory {
    settings: Settings,
    openers: HashMap<BackendKind, Arc<dyn BackendOpener>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerationProvider>>,
}

impl fmt::Debug for RagServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut backends: Vec<&BackendKind> = self.openers.keys().collect();
        backends.sort_by_key(|kind| kind.as_str());
        f.debug_struct("RagServiceFactory")
            .field("settings", &self.settings)
            .field("backends", &backends)
            .finish_non_exhaustive()
    }
}

impl RagServiceFactory {
    /// Create a factory with the built-in backends registered.
    pub fn new(settings: Settings) -> Self {
        let mut openers: HashMap<BackendKind, Arc<dyn BackendOpener>> = HashMap::new();
        openers.insert(BackendKind::InMemory, Arc::new(InMemoryOpener));
        #[cfg(feature = "sqlite")]
        openers.insert(BackendKind::Sqlite, Arc::new(SqliteOpener));

        Self { settings, openers, embedder: None, generator: None }
    }

    /// Register (or replace) the opener of a backend kind.
    pub fn register(mut self, kind: BackendKind, opener: Arc<dyn BackendOpener>) -> Self {
        self.openers.insert(kind, opener);
        self
    }

    /// Use this embedder instead of the one described by the settings.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use this generator instead of the one described by the settings.
    pub fn with_generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The settings services are built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build a ready knowledge base for a backend named by tag.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnsupportedBackend`] for an unknown tag, before
    /// any directory or collection is touched.
    pub async fn create(
        &self,
        kb_name: &str,
        backend: &str,
        embed_model: &str,
    ) -> Result<KnowledgeBase> {
        let kind: BackendKind = backend.parse().map_err(|e| {
            error!(kb_name, backend, "unsupported backend");
            e
        })?;
        self.create_with_kind(kb_name, kind, embed_model).await
    }

    /// Build a ready knowledge base: open the store, get or create the
    /// collection `kb_name` and bind embedder, chunker and generator to it.
    pub async fn create_with_kind(
        &self,
        kb_name: &str,
        kind: BackendKind,
        embed_model: &str,
    ) -> Result<KnowledgeBase> {
        validate_name(kb_name)?;
        let opener = self
            .openers
            .get(&kind)
            .ok_or_else(|| RagError::UnsupportedBackend(kind.as_str().to_string()))?;

        let embedder = self.embedder(embed_model)?;
        let generator = self.generator()?;

        let store = opener.open(kb_name, &self.settings).await?;
        let requested =
            CollectionInfo::for_embedder(kb_name, embedder.as_ref(), self.settings.distance);
        let collection = CollectionHandle::open(store, requested).await?;
        let chunker = self.settings.rag.chunking.build(&self.settings.rag);
        let retriever = Retriever::new(collection, embedder, chunker)?;

        let kb = KnowledgeBase::new(kb_name, retriever, generator, self.settings.rag.clone());
        let records = kb.retriever().count().await?;
        info!(
            kb_name,
            backend = %kind,
            embed_model = kb.retriever().embedder().model_name(),
            chunking = %self.settings.rag.chunking,
            records,
            "knowledge base ready"
        );
        Ok(kb)
    }

    fn embedder(&self, embed_model: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        if let Some(embedder) = &self.embedder {
            return Ok(Arc::clone(embedder));
        }

        let embed_model = embed_model.trim();
        let dimensions = self.settings.embedding_dimensions;
        if let Some(hashing) = HashingEmbeddingProvider::parse_model_name(embed_model, dimensions) {
            return Ok(Arc::new(hashing?));
        }

        if self.settings.use_local_embeddings {
            return self.local_embedder(embed_model);
        }

        self.remote_embedder(embed_model)
    }

    #[cfg(feature = "bert")]
    fn local_embedder(&self, embed_model: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        use crate::bert::{BertEmbeddingConfig, BertEmbeddingProvider};
        use crate::config::DEFAULT_LOCAL_EMBEDDING_MODEL;

        let model =
            if embed_model.is_empty() { DEFAULT_LOCAL_EMBEDDING_MODEL } else { embed_model };
        let config = BertEmbeddingConfig::from_dir(model, self.settings.model_dir.join(model))
            .with_device(self.settings.device.clone());
        Ok(Arc::new(BertEmbeddingProvider::new(config)?))
    }

    #[cfg(not(feature = "bert"))]
    fn local_embedder(&self, embed_model: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(RagError::ConfigError(format!(
            "local embedding model '{embed_model}' requires the `bert` feature; \
             use `hashing` for the built-in lexical model"
        )))
    }

    #[cfg(feature = "openai")]
    fn remote_embedder(&self, embed_model: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        use crate::config::DEFAULT_EMBEDDING_MODEL;
        use crate::openai::{OpenAIEmbeddingConfig, OpenAIEmbeddingProvider, known_dimensions};

        let model = if embed_model.is_empty() { DEFAULT_EMBEDDING_MODEL } else { embed_model };
        let mut config = OpenAIEmbeddingConfig::new(self.settings.embedding_api_key.clone())
            .with_base_url(self.settings.embedding_api_url.clone())
            .with_model(model)
            .with_timeout(self.settings.timeout);
        if known_dimensions(model).is_none() {
            config = config.with_dimensions(self.settings.embedding_dimensions);
        }
        Ok(Arc::new(OpenAIEmbeddingProvider::new(config)?))
    }

    #[cfg(not(feature = "openai"))]
    fn remote_embedder(&self, _embed_model: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(RagError::ConfigError(
            "remote embeddings require the `openai` feature".to_string(),
        ))
    }

    #[cfg(feature = "openai")]
    fn generator(&self) -> Result<Arc<dyn GenerationProvider>> {
        use crate::generation::{OpenAIChatConfig, OpenAIChatProvider};

        if let Some(generator) = &self.generator {
            return Ok(Arc::clone(generator));
        }
        let config = OpenAIChatConfig::from_settings(&self.settings);
        Ok(Arc::new(OpenAIChatProvider::new(config)?))
    }

    #[cfg(not(feature = "openai"))]
    fn generator(&self) -> Result<Arc<dyn GenerationProvider>> {
        self.generator.clone().ok_or_else(|| {
            RagError::ConfigError(
                "no generation provider configured; enable the `openai` feature".to_string(),
            )
        })
    }
}

fn validate_name(kb_name: &str) -> Result<()> {
    let invalid = kb_name.trim().is_empty()
        || kb_name.contains(['/', '\\'])
        || kb_name == "."
        || kb_name == "..";
    if invalid {
        return Err(RagError::ConfigError(format!("invalid knowledge base name '{kb_name}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tags_parse() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("ChromaDB".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!(" memory ".parse::<BackendKind>().unwrap(), BackendKind::InMemory);
        assert!(matches!(
            "unknown-backend".parse::<BackendKind>(),
            Err(RagError::UnsupportedBackend(tag)) if tag == "unknown-backend"
        ));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn names_with_separators_are_rejected() {
        assert!(validate_name("travel").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("..").is_err());
    }
}
