//! The composed RAG service.
//!
//! [`RagService`] is the capability set callers program against; the
//! [`KnowledgeBase`] is its implementation over one open collection.
//! Services are normally built by [`RagServiceFactory`](crate::RagServiceFactory),
//! which opens the collection eagerly so a returned service is ready to use.

use std::sync::Arc;

use async_trait::async_trait;

use crate::answer::{Answer, Answerer, PromptTemplate};
use crate::config::RagConfig;
use crate::document::{Document, SearchResult};
use crate::error::Result;
use crate::generation::GenerationProvider;
use crate::retriever::{IngestReport, Retriever};

/// A retrieval-augmented knowledge base.
#[async_trait]
pub trait RagService: Send + Sync {
    /// Knowledge base name.
    fn name(&self) -> &str;

    /// Number of indexed chunks.
    async fn count(&self) -> Result<usize>;

    /// Chunk, embed and index documents. See [`Retriever::ingest`].
    async fn ingest(&self, documents: &[Document]) -> Result<IngestReport>;

    /// Chunks within `threshold` of `query`, ascending by distance.
    async fn retrieve(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<SearchResult>>;

    /// Answer `query` grounded on the retrieved chunks.
    async fn answer(&self, query: &str, k: usize, threshold: f32) -> Result<String>;
}

/// A knowledge base over a single collection.
///
/// Holds the retriever, the answerer and the configured retrieval defaults
/// (`top_k`, `distance_threshold`) for callers without their own.
pub struct KnowledgeBase {
    name: String,
    retriever: Arc<Retriever>,
    answerer: Answerer,
    defaults: RagConfig,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("name", &self.name)
            .field("retriever", &self.retriever)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl KnowledgeBase {
    /// Assemble a knowledge base from an open retriever and a generator.
    pub fn new(
        name: impl Into<String>,
        retriever: Retriever,
        generator: Arc<dyn GenerationProvider>,
        defaults: RagConfig,
    ) -> Self {
        let retriever = Arc::new(retriever);
        let answerer = Answerer::new(Arc::clone(&retriever), generator);
        Self { name: name.into(), retriever, answerer, defaults }
    }

    /// Replace the answer prompt template.
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.answerer = self.answerer.with_template(template);
        self
    }

    /// The retrieval defaults this knowledge base was configured with.
    pub fn defaults(&self) -> &RagConfig {
        &self.defaults
    }

    /// The underlying retriever.
    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// See [`Retriever::retrieve_many`].
    pub async fn retrieve_many(
        &self,
        queries: &[&str],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        self.retriever.retrieve_many(queries, k, threshold).await
    }

    /// See [`Answerer::answer_with_sources`].
    pub async fn answer_with_sources(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Answer> {
        self.answerer.answer_with_sources(query, k, threshold).await
    }
}

#[async_trait]
impl RagService for KnowledgeBase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<usize> {
        self.retriever.count().await
    }

    async fn ingest(&self, documents: &[Document]) -> Result<IngestReport> {
        self.retriever.ingest(documents).await
    }

    async fn retrieve(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<SearchResult>> {
        self.retriever.retrieve(query, k, threshold).await
    }

    async fn answer(&self, query: &str, k: usize, threshold: f32) -> Result<String> {
        self.answerer.answer(query, k, threshold).await
    }
}
