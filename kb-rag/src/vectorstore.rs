//! Vector store trait for storing and searching vector embeddings.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::distance::DistanceMetric;
use crate::document::{Chunk, IndexEntry, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Identity of a collection: its name, the embedding model that fills it,
/// the model's dimension and the distance metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name, unique within a store.
    pub name: String,
    /// Dimension every stored and queried vector must have.
    pub dimensions: usize,
    /// Metric results are ranked by.
    pub metric: DistanceMetric,
    /// Name of the embedding model whose vectors the collection holds.
    pub model: String,
}

impl CollectionInfo {
    /// Describe a collection.
    pub fn new(
        name: impl Into<String>,
        dimensions: usize,
        metric: DistanceMetric,
        model: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), dimensions, metric, model: model.into() }
    }

    /// Describe a collection filled by `embedder`.
    pub fn for_embedder(
        name: impl Into<String>,
        embedder: &dyn EmbeddingProvider,
        metric: DistanceMetric,
    ) -> Self {
        Self::new(name, embedder.dimensions(), metric, embedder.model_name())
    }
}

/// A storage backend for vector embeddings with similarity search.
///
/// Implementations manage named collections of [`IndexEntry`]s. Each
/// collection is bound to one dimension and one metric when it is created.
///
/// Contract shared by all backends:
/// - [`get_or_create_collection`](VectorStore::get_or_create_collection) is
///   idempotent but fails if the existing collection has another dimension
///   or was filled by another embedding model. The stored metric wins.
/// - [`add`](VectorStore::add) overwrites entries with an existing id, and
///   the entries of one call become visible together.
/// - [`query`](VectorStore::query) returns at most `k` results ordered by
///   ascending distance, or every entry if the collection holds fewer.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{CollectionInfo, DistanceMetric, InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// let info = CollectionInfo::new("docs", 384, DistanceMetric::Cosine, "all-MiniLM-L6-v2");
/// store.get_or_create_collection(&info).await?;
/// store.add("docs", &entries).await?;
/// let results = store.query("docs", &query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name used in errors and logs.
    fn backend(&self) -> &str;

    /// Open the collection `requested.name`, creating it as described if it
    /// does not exist. Returns the stored description.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::VectorStoreError`] if a collection of that name
    /// exists with a different dimension or embedding model.
    async fn get_or_create_collection(&self, requested: &CollectionInfo)
    -> Result<CollectionInfo>;

    /// Delete a named collection and all its entries. No-op if it does not exist.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// List the collections of this store.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Add entries to a collection, replacing entries with the same id.
    async fn add(&self, collection: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Return the `k` entries nearest to `embedding`, ascending by distance.
    async fn query(&self, collection: &str, embedding: &[f32], k: usize)
    -> Result<Vec<SearchResult>>;

    /// Number of entries currently stored in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// An open collection bound to its store.
///
/// Returned by [`CollectionHandle::open`]; the holder owns the collection for
/// its lifetime and never needs to repeat the name or dimension.
#[derive(Clone)]
pub struct CollectionHandle {
    store: Arc<dyn VectorStore>,
    info: CollectionInfo,
}

impl std::fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("backend", &self.store.backend())
            .field("info", &self.info)
            .finish()
    }
}

impl CollectionHandle {
    /// Get or create the collection in `store` and bind a handle to it.
    ///
    /// An existing collection keeps its metric; a different requested
    /// metric is logged and ignored.
    pub async fn open(store: Arc<dyn VectorStore>, requested: CollectionInfo) -> Result<Self> {
        let info = store.get_or_create_collection(&requested).await?;
        if info.metric != requested.metric {
            warn!(
                collection = %info.name,
                stored = %info.metric,
                requested = %requested.metric,
                "collection keeps its stored distance metric"
            );
        }
        Ok(Self { store, info })
    }

    /// The collection's identity.
    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The store holding this collection.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// See [`VectorStore::add`].
    pub async fn add(&self, entries: &[IndexEntry]) -> Result<()> {
        self.store.add(&self.info.name, entries).await
    }

    /// See [`VectorStore::query`].
    pub async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.store.query(&self.info.name, embedding, k).await
    }

    /// See [`VectorStore::count`].
    pub async fn count(&self) -> Result<usize> {
        self.store.count(&self.info.name).await
    }
}

/// Reject a reopen that would mix embedding spaces within one collection.
pub(crate) fn ensure_compatible(
    backend: &str,
    existing: &CollectionInfo,
    requested: &CollectionInfo,
) -> Result<()> {
    if existing.dimensions != requested.dimensions {
        return Err(RagError::store(
            backend,
            format!(
                "dimension mismatch for collection '{}': stored {}, requested {}",
                existing.name, existing.dimensions, requested.dimensions
            ),
        ));
    }
    if existing.model != requested.model {
        return Err(RagError::store(
            backend,
            format!(
                "embedding model mismatch for collection '{}': stored '{}', requested '{}'",
                existing.name, existing.model, requested.model
            ),
        ));
    }
    Ok(())
}

/// Check a collection description before it is created.
pub(crate) fn validate_info(backend: &str, info: &CollectionInfo) -> Result<()> {
    if info.dimensions == 0 {
        return Err(RagError::store(backend, "dimensions must be greater than zero"));
    }
    if info.model.trim().is_empty() {
        return Err(RagError::store(backend, "embedding model name must not be empty"));
    }
    Ok(())
}

/// Check that every vector of an `add` call has the collection's dimension.
pub(crate) fn validate_entries(
    backend: &str,
    info: &CollectionInfo,
    entries: &[IndexEntry],
) -> Result<()> {
    for entry in entries {
        if entry.id.is_empty() {
            return Err(RagError::store(backend, "entry id must not be empty"));
        }
        if entry.embedding.len() != info.dimensions {
            return Err(RagError::store(
                backend,
                format!(
                    "entry '{}' has dimension {}, collection '{}' expects {}",
                    entry.id,
                    entry.embedding.len(),
                    info.name,
                    info.dimensions
                ),
            ));
        }
    }
    Ok(())
}

/// Check the arguments of a `query` call.
pub(crate) fn validate_query(
    backend: &str,
    info: &CollectionInfo,
    embedding: &[f32],
    k: usize,
) -> Result<()> {
    if k == 0 {
        return Err(RagError::store(backend, "k must be at least 1"));
    }
    if embedding.len() != info.dimensions {
        return Err(RagError::store(
            backend,
            format!(
                "query has dimension {}, collection '{}' expects {}",
                embedding.len(),
                info.name,
                info.dimensions
            ),
        ));
    }
    Ok(())
}

/// Brute-force nearest neighbours: score every candidate, keep the `k` closest.
///
/// Ties are broken by document id and chunk ordinal so equal inputs always rank the same way.
pub(crate) fn nearest<'a, I>(
    metric: DistanceMetric,
    query: &[f32],
    candidates: I,
    k: usize,
) -> Vec<SearchResult>
where
    I: IntoIterator<Item = (Chunk, &'a [f32])>,
{
    let mut scored: Vec<SearchResult> = candidates
        .into_iter()
        .map(|(chunk, embedding)| {
            SearchResult { distance: metric.distance(query, embedding), chunk }
        })
        .collect();

    scored.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
            .then_with(|| a.chunk.index.cmp(&b.chunk.index))
    });
    scored.truncate(k);
    scored
}

/// Order two results by distance for callers that merge result lists.
pub(crate) fn by_distance(a: &SearchResult, b: &SearchResult) -> Ordering {
    a.distance.total_cmp(&b.distance)
}
