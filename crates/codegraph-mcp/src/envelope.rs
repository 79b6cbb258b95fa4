//! `ToolEnvelope` response shape and cursor encoding shared by every tool.
//!
//! Every dispatched call ends up as one of these two shapes on the wire;
//! callers never see a raw agent/store error or a bare JSON blob.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub success: bool,
    pub error_type: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolEnvelope {
    Success(SuccessEnvelope),
    Failure(FailureEnvelope),
}

impl ToolEnvelope {
    pub fn success(data: Value) -> Self {
        ToolEnvelope::Success(SuccessEnvelope { success: true, data, meta: None, warnings: None })
    }

    pub fn success_with_meta(data: Value, meta: Value) -> Self {
        ToolEnvelope::Success(SuccessEnvelope { success: true, data, meta: Some(meta), warnings: None })
    }

    pub fn failure(error_type: impl Into<String>, error: impl Into<String>, details: Option<Value>) -> Self {
        ToolEnvelope::Failure(FailureEnvelope {
            success: false,
            error_type: error_type.into(),
            error: error.into(),
            details,
            meta: None,
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "success": false, "errorType": "tool_error", "error": "failed to serialize envelope" })
        })
    }

    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_default()
    }
}

/// A paging cursor: offset into a stable ordering, plus enough of the
/// originating query to catch a caller replaying a cursor against a
/// different query than the one that minted it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CursorPayload {
    pub o: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f: Option<Value>,
}

pub fn encode_cursor(offset: usize, query: Option<&str>, filters: Option<Value>) -> String {
    let payload = CursorPayload { o: offset, q: query.map(str::to_string), f: filters };
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_cursor(cursor: &str) -> Result<CursorPayload, String> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|e| format!("invalid cursor: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid cursor payload: {e}"))
}

/// Wraps a page of items taken from offset `offset` with a `nextCursor` iff
/// the page was full — a partial page is, by construction, the last one.
pub fn next_cursor_if_full(items_len: usize, limit: usize, offset: usize, query: Option<&str>, filters: Option<Value>) -> Option<String> {
    if items_len < limit || limit == 0 {
        None
    } else {
        Some(encode_cursor(offset + items_len, query, filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let encoded = encode_cursor(20, Some("add"), Some(serde_json::json!({"entityType": "function"})));
        let decoded = decode_cursor(&encoded).unwrap();
        assert_eq!(decoded.o, 20);
        assert_eq!(decoded.q.as_deref(), Some("add"));
    }

    #[test]
    fn full_page_gets_next_cursor_partial_page_does_not() {
        assert!(next_cursor_if_full(20, 20, 0, None, None).is_some());
        assert!(next_cursor_if_full(5, 20, 0, None, None).is_none());
    }
}
