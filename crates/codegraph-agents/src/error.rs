//! Error types for the coordination fabric: bus, governor, agents, conductor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent {agent_id} is busy: {queue_length} tasks queued, retry after {retry_after_ms}ms")]
    Busy {
        agent_id: String,
        queue_length: usize,
        retry_after_ms: u64,
    },

    #[error("agent {0} cannot handle this task kind")]
    CannotHandle(String),

    #[error("agent {0} has shut down")]
    ShutDown(String),

    #[error("resource request denied: {0}")]
    ResourceDenied(String),

    #[error("approval required for this task")]
    ApprovalRequired,

    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(String),

    #[error("task timed out")]
    Timeout,

    #[error("task cancelled")]
    Cancelled,

    #[error("graph store error: {0}")]
    Graph(#[from] codegraph_graph::GraphError),

    #[error("vector store error: {0}")]
    Vector(#[from] codegraph_vector::SearchError),

    #[error("parser error: {0}")]
    Parser(#[from] codegraph_core::ParserError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
