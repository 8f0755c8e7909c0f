//! In-memory vector store.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `HashMap` protected by a `tokio::sync::RwLock`. Nothing survives the
//! process; it is suitable for development, testing, and small-scale use.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{IndexEntry, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{
    CollectionInfo, VectorStore, ensure_compatible, nearest, validate_entries, validate_info,
    validate_query,
};

const BACKEND: &str = "InMemory";

#[derive(Debug)]
struct Collection {
    info: CollectionInfo,
    entries: HashMap<String, IndexEntry>,
}

/// An in-memory vector store using brute-force search.
///
/// Collections are stored as nested `HashMap`s: collection name → entry ID → entry.
/// An `add` holds the write lock for the whole batch, so readers see either
/// none or all of its entries.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{CollectionInfo, DistanceMetric, InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// let docs = CollectionInfo::new("docs", 384, DistanceMetric::Cosine, "hashing-384");
/// store.get_or_create_collection(&docs).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(collection: &str) -> RagError {
    RagError::store(BACKEND, format!("collection '{collection}' does not exist"))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn get_or_create_collection(
        &self,
        requested: &CollectionInfo,
    ) -> Result<CollectionInfo> {
        validate_info(BACKEND, requested)?;
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(&requested.name) {
            ensure_compatible(BACKEND, &existing.info, requested)?;
            return Ok(existing.info.clone());
        }

        let collection = Collection { info: requested.clone(), entries: HashMap::new() };
        collections.insert(requested.name.clone(), collection);
        Ok(requested.clone())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name);
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let collections = self.collections.read().await;
        let mut infos: Vec<CollectionInfo> = collections.values().map(|c| c.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn add(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        validate_entries(BACKEND, &store.info, entries)?;
        for entry in entries {
            store.entries.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| missing(collection))?;
        validate_query(BACKEND, &store.info, embedding, k)?;

        let candidates =
            store.entries.values().map(|entry| (entry.chunk.clone(), entry.embedding.as_slice()));
        Ok(nearest(store.info.metric, embedding, candidates, k))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(store.entries.len())
    }
}
