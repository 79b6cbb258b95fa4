//! Error types for the persistent graph store and its traversal layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize entity metadata: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("storage conflict: {0}")]
    StorageConflict(String),

    #[error("invalid pagination cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
