//! Error types for the `kb-rag` crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalised failure classes of a remote provider (embedding or generation).
///
/// Every HTTP status code and transport failure is folded into one of these
/// four kinds so callers can decide on retries without knowing the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Missing, invalid or revoked credentials (401, 403).
    Auth,
    /// The provider throttled the request (429).
    RateLimit,
    /// The request did not finish within the configured timeout (408, 504, client timeout).
    Timeout,
    /// Any other provider or transport failure, including malformed responses.
    Provider,
}

impl ProviderErrorKind {
    /// Classify an HTTP status code returned by a provider.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            429 => Self::RateLimit,
            408 | 504 => Self::Timeout,
            _ => Self::Provider,
        }
    }

    /// Classify a transport-level failure reported by `reqwest`.
    #[cfg(feature = "openai")]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        match err.status() {
            Some(status) => Self::from_status(status.as_u16()),
            None => Self::Provider,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate limit",
            Self::Timeout => "timeout",
            Self::Provider => "provider",
        };
        f.write_str(name)
    }
}

fn index_suffix(index: &Option<usize>) -> String {
    index.map(|i| format!(" at text {i}")).unwrap_or_default()
}

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An embedding provider or model failed.
    ///
    /// `index` points at the offending input text; for a failed batched
    /// request it is the first text of that batch.
    #[error("Embedding error ({provider}, {kind}){}: {message}", index_suffix(.index))]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// Position of the offending text in the input slice, when known.
        index: Option<usize>,
        /// Normalised failure class.
        kind: ProviderErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Ingest of a document failed.
    ///
    /// Chunks of earlier documents in the same call stay committed;
    /// `stored_chunks` reports how many.
    #[error(
        "Ingest of document '{document_id}' failed after {stored_chunks} stored chunk(s): {source}"
    )]
    IngestError {
        /// The document whose chunks could not be embedded or stored.
        document_id: String,
        /// Number of chunks committed by the same call before the failure.
        stored_chunks: usize,
        /// The underlying embedding or store failure.
        #[source]
        source: Box<RagError>,
    },

    /// The store could not answer a similarity query.
    #[error("Retrieval error in collection '{collection}': {source}")]
    RetrievalError {
        /// The collection that was queried.
        collection: String,
        /// The underlying store failure.
        #[source]
        source: Box<RagError>,
    },

    /// The generation provider failed while synthesising an answer.
    #[error("Generation error ({provider}, {kind}): {message}")]
    GenerationError {
        /// The generation provider that produced the error.
        provider: String,
        /// Normalised failure class.
        kind: ProviderErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// The factory was asked for a backend it does not know.
    #[error("Unsupported backend: '{0}'")]
    UnsupportedBackend(String),
}

impl RagError {
    /// Return the normalised provider failure class, looking through
    /// ingest and retrieval wrappers.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::EmbeddingError { kind, .. } | Self::GenerationError { kind, .. } => Some(*kind),
            Self::IngestError { source, .. } | Self::RetrievalError { source, .. } => {
                source.provider_kind()
            }
            _ => None,
        }
    }

    /// Whether the failure was a provider timeout.
    pub fn is_timeout(&self) -> bool {
        self.provider_kind() == Some(ProviderErrorKind::Timeout)
    }

    pub(crate) fn store(backend: &str, message: impl Into<String>) -> Self {
        Self::VectorStoreError { backend: backend.to_string(), message: message.into() }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
