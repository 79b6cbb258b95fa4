//! Maps the lower layers' error enums onto the tool-facing `errorType`
//! taxonomy. Every dispatch failure passes through here exactly once, on
//! its way into a [`crate::envelope::ToolEnvelope::Failure`].

use codegraph_agents::AgentError;
use codegraph_graph::GraphError;
use codegraph_vector::SearchError;
use serde_json::{json, Value};
use thiserror::Error;

use crate::envelope::ToolEnvelope;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("invalid tool payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("init error: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, McpError>;

/// `(errorType, message, details)` for one `AgentError`, following the
/// component-boundary translation policy: transient, retryable outcomes
/// (busy, rate-limited) carry `details` the caller can act on; everything
/// else carries just a message.
pub fn classify_agent_error(err: &AgentError) -> (&'static str, String, Option<Value>) {
    match err {
        AgentError::Busy { agent_id, queue_length, retry_after_ms } => (
            "agent_busy",
            format!("agent '{agent_id}' is at capacity"),
            Some(json!({ "agentId": agent_id, "queueLength": queue_length, "retryAfterMs": retry_after_ms })),
        ),
        AgentError::CannotHandle(kind) => ("validation_error", format!("no agent registered for tool '{kind}'"), None),
        AgentError::ShutDown(agent_id) => ("tool_error", format!("agent '{agent_id}' has shut down"), None),
        AgentError::ResourceDenied(reason) => ("resource_exhausted", reason.clone(), None),
        AgentError::ApprovalRequired => {
            ("approval_required", "this operation requires an approval token".to_string(), None)
        }
        AgentError::InvalidPattern(pattern) => ("validation_error", format!("invalid pattern: {pattern}"), None),
        AgentError::Timeout => ("timeout", "operation exceeded its deadline".to_string(), None),
        AgentError::Cancelled => ("cancelled", "operation was cancelled".to_string(), None),
        AgentError::Graph(e) => classify_graph_error(e),
        AgentError::Vector(e) => classify_search_error(e),
        AgentError::Parser(e) => ("tool_error", e.to_string(), None),
        AgentError::Serialization(e) => ("validation_error", format!("malformed payload: {e}"), None),
        AgentError::Io(e) => ("tool_error", e.to_string(), None),
    }
}

fn classify_graph_error(err: &GraphError) -> (&'static str, String, Option<Value>) {
    match err {
        GraphError::EntityNotFound(id) => ("not_found", format!("entity '{id}' not found"), None),
        GraphError::StorageConflict(reason) => ("storage_conflict", reason.clone(), None),
        GraphError::InvalidCursor(reason) => ("validation_error", format!("invalid cursor: {reason}"), None),
        GraphError::InvalidQuery(reason) => ("validation_error", reason.clone(), None),
        GraphError::Sqlite(e) => ("tool_error", e.to_string(), None),
        GraphError::Serialization(e) => ("tool_error", e.to_string(), None),
    }
}

fn classify_search_error(err: &SearchError) -> (&'static str, String, Option<Value>) {
    match err {
        SearchError::Store(reason) => ("tool_error", reason.clone(), None),
        SearchError::InvalidConfig(reason) => ("validation_error", reason.clone(), None),
        SearchError::ProviderUnavailable(reason) => ("embedding_unavailable", reason.clone(), None),
        SearchError::DimensionMismatch { expected, actual } => (
            "embedding_unavailable",
            format!("embedding dimension mismatch: expected {expected}, got {actual}"),
            Some(json!({ "expected": expected, "actual": actual })),
        ),
        SearchError::Auth(reason) => ("provider_error", reason.clone(), None),
        SearchError::RateLimit { retry_after } => (
            "provider_error",
            "embedding provider rate limit exceeded".to_string(),
            retry_after.map(|r| json!({ "retryAfterMs": r * 1000 })),
        ),
        SearchError::Timeout => ("timeout", "embedding provider request timed out".to_string(), None),
        SearchError::InvalidModel(model) => ("validation_error", format!("unknown embedding model '{model}'"), None),
        SearchError::EntityNotFound(id) => ("not_found", format!("entity '{id}' not found"), None),
        SearchError::Sqlite(e) => ("tool_error", e.to_string(), None),
        SearchError::Serialization(e) => ("tool_error", e.to_string(), None),
        SearchError::Io(e) => ("tool_error", e.to_string(), None),
    }
}

impl From<&AgentError> for ToolEnvelope {
    fn from(err: &AgentError) -> Self {
        let (error_type, message, details) = classify_agent_error(err);
        ToolEnvelope::failure(error_type, message, details)
    }
}

impl From<AgentError> for ToolEnvelope {
    fn from(err: AgentError) -> Self {
        ToolEnvelope::from(&err)
    }
}

impl From<McpError> for ToolEnvelope {
    fn from(err: McpError) -> Self {
        match err {
            McpError::InvalidPayload(msg) => ToolEnvelope::failure("validation_error", msg, None),
            McpError::Agent(e) => ToolEnvelope::from(e),
            McpError::Transport(msg) => ToolEnvelope::failure("tool_error", msg, None),
            McpError::Init(msg) => ToolEnvelope::failure("tool_error", msg, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_agent_busy_with_retry_hint() {
        let err = AgentError::Busy { agent_id: "query-1".into(), queue_length: 3, retry_after_ms: 200 };
        let (error_type, _, details) = classify_agent_error(&err);
        assert_eq!(error_type, "agent_busy");
        assert_eq!(details.unwrap()["retryAfterMs"], 200);
    }

    #[test]
    fn approval_required_maps_through() {
        let (error_type, _, _) = classify_agent_error(&AgentError::ApprovalRequired);
        assert_eq!(error_type, "approval_required");
    }

    #[test]
    fn entity_not_found_maps_to_not_found() {
        let err = AgentError::Graph(GraphError::EntityNotFound("x".into()));
        let (error_type, _, _) = classify_agent_error(&err);
        assert_eq!(error_type, "not_found");
    }
}
