//! Error types for the vector store and embedding pipeline.

use thiserror::Error;

/// Errors surfaced by `VectorStore`, `EmbeddingGenerator` implementations,
/// and the hybrid ranker. The MCP dispatcher maps these onto the error
/// taxonomy's `embedding_unavailable` / `provider_error` / `storage_conflict`
/// values.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("vector store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("provider authentication failed: {0}")]
    Auth(String),

    #[error("provider rate limited, retry after {retry_after:?} seconds")]
    RateLimit { retry_after: Option<u64> },

    #[error("provider request timed out")]
    Timeout,

    #[error("provider model not found: {0}")]
    InvalidModel(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;
