//! # kb-rag
//!
//! Retrieval-augmented generation over a persistent knowledge base.
//!
//! Documents are split into overlapping chunks, embedded, and stored in a
//! named collection; queries are embedded the same way, matched by vector
//! distance, filtered by a maximum-distance threshold, and handed to a
//! language model as grounding context.
//!
//! ## Components
//!
//! - [`Chunker`]: splits document text at natural boundaries ([`RecursiveChunker`])
//!   or at fixed offsets ([`FixedSizeChunker`])
//! - [`EmbeddingProvider`]: in-process BERT (`bert`), remote (`openai`), or the
//!   lexical [`HashingEmbeddingProvider`] for offline use
//! - [`VectorStore`]: [`InMemoryVectorStore`] or the persistent `sqlite` backend
//! - [`Retriever`]: ingest and threshold-filtered retrieval over one collection
//! - [`Answerer`]: prompt composition and generation
//! - [`RagServiceFactory`]: builds a ready [`KnowledgeBase`] from a backend tag
//!
//! ## Feature Flags
//!
//! | Feature | Enables |
//! |---------|---------|
//! | `openai` (default) | `OpenAIEmbeddingProvider`, `OpenAIChatProvider` |
//! | `sqlite` (default) | `SqliteVectorStore` |
//! | `bert` (default) | `BertEmbeddingProvider` (candle, safetensors checkpoints) |
//! | `cuda` / `metal` | GPU devices for `bert` |
//!
//! ## Distance polarity
//!
//! Every distance in this crate is "lower is closer". Results are ordered
//! ascending and the threshold is the largest distance still accepted.

pub mod answer;
#[cfg(feature = "bert")]
pub mod bert;
pub mod chunking;
pub mod config;
pub mod distance;
pub mod document;
pub mod embedding;
pub mod error;
pub mod factory;
pub mod generation;
pub mod hashing;
pub mod inmemory;
pub mod retriever;
pub mod service;
pub mod telemetry;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "openai")]
mod provider;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use answer::{Answer, Answerer, NO_CONTEXT_MARKER, PromptTemplate};
pub use chunking::{Chunker, ChunkingStrategy, FixedSizeChunker, RecursiveChunker, split_text};
pub use config::{RagConfig, RagConfigBuilder, Settings};
pub use distance::DistanceMetric;
pub use document::{Chunk, Document, IndexEntry, Metadata, MetadataValue, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{ProviderErrorKind, RagError, Result};
pub use factory::{BackendKind, BackendOpener, InMemoryOpener, RagServiceFactory};
pub use generation::GenerationProvider;
pub use hashing::HashingEmbeddingProvider;
pub use inmemory::InMemoryVectorStore;
pub use retriever::{IngestReport, Retriever};
pub use service::{KnowledgeBase, RagService};
pub use vectorstore::{CollectionHandle, CollectionInfo, VectorStore};

#[cfg(feature = "bert")]
pub use bert::{BertEmbeddingConfig, BertEmbeddingProvider};
#[cfg(feature = "sqlite")]
pub use factory::SqliteOpener;
#[cfg(feature = "openai")]
pub use generation::{OpenAIChatConfig, OpenAIChatProvider};
#[cfg(feature = "openai")]
pub use openai::{OpenAIEmbeddingConfig, OpenAIEmbeddingProvider};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVectorStore;
