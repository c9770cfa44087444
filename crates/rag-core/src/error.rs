//! Error types for the retrieval engine.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the retrieval engine.
///
/// Only `Config` is fatal, and only at load time. Every other variant is
/// absorbed by the query pipeline as a degraded mode or a dropped candidate.
#[derive(Error, Debug)]
pub enum RagError {
    /// Vector index or embedding service unavailable.
    #[error("Semantic retrieval unavailable: {message}")]
    SemanticUnavailable { message: String },

    /// Lexical index unavailable.
    #[error("Lexical retrieval unavailable: {message}")]
    LexicalUnavailable { message: String },

    /// Neither retrieval path could search.
    #[error("No retrieval path available: {message}")]
    RetrievalUnavailable { message: String },

    /// Cross-encoder reranker failed or timed out.
    #[error("Rerank failed: {message}")]
    RerankFailure { message: String },

    /// Candidate id no longer resolves to a chunk.
    #[error("Chunk not found: {id}")]
    ChunkNotFound { id: String },

    /// Query has no terms and no embedding after normalization.
    #[error("Empty query: nothing to search for")]
    EmptyQuery,

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// External provider (embedding or rerank service) error.
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a semantic-unavailable error.
    pub fn semantic_unavailable(message: impl Into<String>) -> Self {
        Self::SemanticUnavailable {
            message: message.into(),
        }
    }

    /// Create a lexical-unavailable error.
    pub fn lexical_unavailable(message: impl Into<String>) -> Self {
        Self::LexicalUnavailable {
            message: message.into(),
        }
    }

    /// Create an error for a query where both retrieval paths are down.
    pub fn retrieval_unavailable(message: impl Into<String>) -> Self {
        Self::RetrievalUnavailable {
            message: message.into(),
        }
    }

    /// Create a rerank failure.
    pub fn rerank_failure(message: impl Into<String>) -> Self {
        Self::RerankFailure {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable error code for logs and JSON output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SemanticUnavailable { .. } => "SEMANTIC_UNAVAILABLE",
            Self::LexicalUnavailable { .. } => "LEXICAL_UNAVAILABLE",
            Self::RetrievalUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
            Self::RerankFailure { .. } => "RERANK_FAILURE",
            Self::ChunkNotFound { .. } => "CHUNK_NOT_FOUND",
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
