//! Embedding provider contract.
//!
//! A single capability abstracts every backend the service can talk to:
//! local in-process inference, two flavors of remote HTTP, and a
//! deterministic stub for tests. Variants carry their own configuration and
//! map their own error conditions onto [`crate::error::SearchError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which embedding backend a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProviderType {
    #[default]
    LocalRuntime,
    HttpRemoteOpenaiCompatible,
    HttpRemoteVendor,
    InMemoryStub,
}

impl std::fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProviderType::LocalRuntime => write!(f, "local-runtime"),
            EmbeddingProviderType::HttpRemoteOpenaiCompatible => {
                write!(f, "http-remote-openai-compatible")
            }
            EmbeddingProviderType::HttpRemoteVendor => write!(f, "http-remote-vendor"),
            EmbeddingProviderType::InMemoryStub => write!(f, "in-memory-stub"),
        }
    }
}

/// The full set of configuration keys any provider variant may recognize.
/// Each variant reads only the fields relevant to it; the rest are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_pull: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_server: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

impl EmbeddingConfig {
    pub fn local_runtime() -> Self {
        Self {
            provider: EmbeddingProviderType::LocalRuntime,
            ..Default::default()
        }
    }

    pub fn stub() -> Self {
        Self {
            provider: EmbeddingProviderType::InMemoryStub,
            dimension: Some(256),
            ..Default::default()
        }
    }

    pub fn max_batch_size_or_default(&self) -> usize {
        self.max_batch_size.unwrap_or(32).max(1)
    }

    pub fn concurrency_or_default(&self) -> usize {
        self.concurrency.unwrap_or(4).max(1)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.unwrap_or(30_000))
    }
}

/// Health/capability snapshot returned by `check_status`, surfaced through
/// `get_graph_health`/`get_metrics` tools.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub available: bool,
    pub provider_type: EmbeddingProviderType,
    pub device: String,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl ProviderStatus {
    pub fn healthy(provider_type: EmbeddingProviderType, device: impl Into<String>) -> Self {
        Self {
            available: true,
            provider_type,
            device: device.into(),
            latency_ms: None,
            error: None,
        }
    }

    pub fn unavailable(provider_type: EmbeddingProviderType, error: impl Into<String>) -> Self {
        Self {
            available: false,
            provider_type,
            device: "n/a".into(),
            latency_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Provider-agnostic text-to-vector contract. Every backend implements this
/// one trait; callers never see the difference between local inference and
/// a remote HTTP round trip.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Batched embedding generation, the primary entry point. Implementations
    /// internally respect their configured `maxBatchSize` by chunking.
    async fn generate_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Single-text convenience wrapper most callers reach for when embedding
    /// one code entity's source range.
    async fn generate_code_embedding(&self, code: &str) -> Result<Vec<f32>> {
        let mut vecs = self.generate_batch(vec![code.to_string()]).await?;
        Ok(vecs.pop().unwrap_or_default())
    }

    /// Preload models / establish connections; safe to call more than once.
    async fn warmup(&self) -> Result<()>;

    /// Connectivity/capability probe for `get_graph_health`.
    async fn check_status(&self) -> Result<ProviderStatus>;

    fn dimension(&self) -> usize;

    fn provider_type(&self) -> EmbeddingProviderType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_display_matches_spec_enumeration() {
        assert_eq!(EmbeddingProviderType::LocalRuntime.to_string(), "local-runtime");
        assert_eq!(
            EmbeddingProviderType::HttpRemoteOpenaiCompatible.to_string(),
            "http-remote-openai-compatible"
        );
        assert_eq!(EmbeddingProviderType::HttpRemoteVendor.to_string(), "http-remote-vendor");
        assert_eq!(EmbeddingProviderType::InMemoryStub.to_string(), "in-memory-stub");
    }

    #[test]
    fn config_defaults_are_sane() {
        let cfg = EmbeddingConfig::local_runtime();
        assert_eq!(cfg.max_batch_size_or_default(), 32);
        assert_eq!(cfg.concurrency_or_default(), 4);
    }
}
