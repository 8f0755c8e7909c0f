//! Ingest and similarity retrieval over one collection.
//!
//! The [`Retriever`] coordinates the two request flows of a knowledge base
//! by composing a [`Chunker`], an [`EmbeddingProvider`] and an open
//! [`CollectionHandle`]:
//!
//! - ingest: chunk → embed (one batch per document) → add
//! - retrieve: embed query → query store → filter by distance threshold
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{CollectionHandle, CollectionInfo, Document, DistanceMetric, Retriever};
//!
//! let info = CollectionInfo::for_embedder("travel", embedder.as_ref(), DistanceMetric::Cosine);
//! let collection = CollectionHandle::open(store, info).await?;
//! let retriever = Retriever::new(collection, embedder, Arc::new(RecursiveChunker::new(500, 50)))?;
//!
//! retriever.ingest(&[Document::new("taipei", "Taipei has the 101 Tower.")]).await?;
//! let hits = retriever.retrieve("Taipei attractions", 5, 0.5).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chunking::Chunker;
use crate::document::{Document, IndexEntry, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderErrorKind, RagError, Result};
use crate::vectorstore::{CollectionHandle, by_distance};

/// Outcome of a successful [`Retriever::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Documents processed, including empty ones that produced no chunks.
    pub documents: usize,
    /// Chunks written to the store.
    pub chunks: usize,
}

/// Chunks, embeds and indexes documents, and answers similarity queries
/// against a single collection.
///
/// The embedder is bound to the collection at construction: its output
/// dimension must equal the collection's, so vectors of different models
/// never meet in one index.
pub struct Retriever {
    collection: CollectionHandle,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("collection", &self.collection)
            .field("embedder", &self.embedder.model_name())
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Bind an embedder and a chunker to an open collection.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the embedder's dimension or model
    /// name differs from the collection's.
    pub fn new(
        collection: CollectionHandle,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Arc<dyn Chunker>,
    ) -> Result<Self> {
        let expected = collection.info().dimensions;
        if embedder.dimensions() != expected {
            return Err(RagError::ConfigError(format!(
                "embedding model '{}' produces {} dimensions, collection '{}' stores {expected}",
                embedder.model_name(),
                embedder.dimensions(),
                collection.name(),
            )));
        }
        let bound = &collection.info().model;
        if embedder.model_name() != bound {
            return Err(RagError::ConfigError(format!(
                "collection '{}' holds vectors of model '{bound}', not '{}'",
                collection.name(),
                embedder.model_name(),
            )));
        }
        Ok(Self { collection, embedder, chunker })
    }

    /// The collection this retriever reads and writes.
    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    /// The chunker applied on ingest.
    pub fn chunker(&self) -> &Arc<dyn Chunker> {
        &self.chunker
    }

    /// The embedding provider bound to the collection.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Number of entries currently in the collection.
    pub async fn count(&self) -> Result<usize> {
        self.collection.count().await
    }

    /// Ingest documents one at a time: chunk → embed → add.
    ///
    /// Chunk ids are `{document_id}_{ordinal}`, so ingesting the same
    /// document again overwrites its entries instead of duplicating them.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IngestError`] for the first document whose chunks
    /// could not be embedded or stored. Documents before it remain committed;
    /// the error reports how many chunks they contributed.
    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for document in documents {
            let chunks = self.chunker.chunk(document);
            if chunks.is_empty() {
                warn!(document.id = %document.id, "document produced no chunks, skipping");
                report.documents += 1;
                continue;
            }

            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await.map_err(|e| {
                error!(document.id = %document.id, error = %e, "embedding failed during ingestion");
                ingest_error(document, report.chunks, e)
            })?;

            if embeddings.len() != chunks.len() {
                let e = RagError::EmbeddingError {
                    provider: self.embedder.model_name().to_string(),
                    index: Some(embeddings.len().min(chunks.len())),
                    kind: ProviderErrorKind::Provider,
                    message: format!(
                        "expected {} embeddings, got {}",
                        chunks.len(),
                        embeddings.len()
                    ),
                };
                error!(document.id = %document.id, error = %e, "embedding count mismatch");
                return Err(ingest_error(document, report.chunks, e));
            }

            let entries: Vec<IndexEntry> =
                chunks.into_iter().zip(embeddings).map(|(c, e)| IndexEntry::new(c, e)).collect();

            self.collection.add(&entries).await.map_err(|e| {
                error!(
                    document.id = %document.id,
                    error = %e,
                    "store write failed during ingestion"
                );
                ingest_error(document, report.chunks, e)
            })?;

            let chunk_count = entries.len();
            report.documents += 1;
            report.chunks += chunk_count;
            info!(document.id = %document.id, chunk_count, "ingested document");
        }

        info!(
            collection = self.collection.name(),
            documents = report.documents,
            chunks = report.chunks,
            "ingest completed"
        );
        Ok(report)
    }

    /// Retrieve the chunks nearest to `query`, keeping only those with
    /// `distance <= threshold`.
    ///
    /// Results are ordered by ascending distance. An empty result is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Embedding failures propagate as [`RagError::EmbeddingError`]; store
    /// failures (including `k == 0`) are wrapped in [`RagError::RetrievalError`].
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.embedder.embed(query).await.map_err(|e| {
            error!(error = %e, "embedding failed during query");
            e
        })?;

        let results = self.search(&embedding, k).await?;
        let total = results.len();
        let filtered: Vec<SearchResult> =
            results.into_iter().filter(|r| r.distance <= threshold).collect();

        info!(
            collection = self.collection.name(),
            k,
            threshold,
            candidates = total,
            result_count = filtered.len(),
            "query completed"
        );
        Ok(filtered)
    }

    /// Retrieve for several queries and merge the hits.
    ///
    /// Each chunk appears once, with the smallest distance any query gave
    /// it; the merged list is ordered by ascending distance.
    pub async fn retrieve_many(
        &self,
        queries: &[&str],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_batch(queries).await.map_err(|e| {
            error!(query_count = queries.len(), error = %e, "embedding failed during query");
            e
        })?;

        let mut merged: HashMap<String, SearchResult> = HashMap::new();
        for embedding in &embeddings {
            for hit in self.search(embedding, k).await? {
                if hit.distance > threshold {
                    continue;
                }
                let id = hit.chunk.id();
                match merged.get(&id) {
                    Some(existing) if existing.distance <= hit.distance => {}
                    _ => {
                        merged.insert(id, hit);
                    }
                }
            }
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| {
            by_distance(a, b)
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
                .then_with(|| a.chunk.index.cmp(&b.chunk.index))
        });

        info!(
            collection = self.collection.name(),
            query_count = queries.len(),
            result_count = results.len(),
            "multi-query completed"
        );
        Ok(results)
    }

    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.collection.query(embedding, k).await.map_err(|e| {
            error!(collection = self.collection.name(), error = %e, "vector store search failed");
            RagError::RetrievalError {
                collection: self.collection.name().to_string(),
                source: Box::new(e),
            }
        })
    }
}

fn ingest_error(document: &Document, stored_chunks: usize, source: RagError) -> RagError {
    RagError::IngestError {
        document_id: document.id.clone(),
        stored_chunks,
        source: Box::new(source),
    }
}
