//! `http-remote-openai-compatible` provider.
//!
//! Talks to any server that implements the OpenAI `/v1/embeddings` shape:
//! OpenAI itself, Azure OpenAI, Ollama, vLLM, and similar. Request/response
//! bodies follow `{"model", "input"} -> {"data": [{"embedding", "index"}]}`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::provider::{EmbeddingConfig, EmbeddingProvider, EmbeddingProviderType, ProviderStatus};
use super::retry::jitter_ms;
use crate::error::{Result, SearchError};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

/// `http-remote-openai-compatible` provider implementation.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_batch_size: usize,
    headers: Vec<(String, String)>,
    dimension: AtomicUsize,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SearchError::ProviderUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            model: DEFAULT_MODEL.to_string(),
            max_batch_size: config.max_batch_size_or_default(),
            headers: config.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            dimension: AtomicUsize::new(config.dimension.unwrap_or(0)),
        })
    }

    fn embeddings_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/embeddings")
        } else {
            format!("{base}/v1/embeddings")
        }
    }

    async fn send_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.embeddings_url();
        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };
        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout
            } else {
                SearchError::ProviderUnavailable(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::OK => {
                let parsed: EmbeddingsResponse = response
                    .json()
                    .await
                    .map_err(|e| SearchError::ProviderUnavailable(format!("bad response body: {e}")))?;
                let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
                if let Some(first) = vectors.first() {
                    self.dimension.store(first.len(), Ordering::Relaxed);
                }
                Ok(vectors)
            }
            StatusCode::UNAUTHORIZED => Err(SearchError::Auth("invalid api key".into())),
            StatusCode::NOT_FOUND => Err(SearchError::InvalidModel(self.model.clone())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                Err(SearchError::RateLimit { retry_after })
            }
            status => Err(SearchError::ProviderUnavailable(format!("status {status}"))),
        }
    }

    async fn send_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.send_batch(texts).await {
                Ok(v) => return Ok(v),
                Err(e @ (SearchError::Auth(_) | SearchError::InvalidModel(_))) => return Err(e),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(delay + Duration::from_millis(jitter_ms(100))).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(SearchError::Timeout))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn generate_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch_size) {
            out.extend(self.send_with_retry(chunk).await?);
        }
        Ok(out)
    }

    async fn warmup(&self) -> Result<()> {
        self.generate_batch(vec!["warmup".to_string()]).await.map(|_| ())
    }

    async fn check_status(&self) -> Result<ProviderStatus> {
        let start = std::time::Instant::now();
        match self.generate_batch(vec!["health check".to_string()]).await {
            Ok(_) => Ok(ProviderStatus::healthy(
                EmbeddingProviderType::HttpRemoteOpenaiCompatible,
                &self.base_url,
            )
            .with_latency(start.elapsed().as_millis() as u64)),
            Err(e) => Ok(ProviderStatus::unavailable(
                EmbeddingProviderType::HttpRemoteOpenaiCompatible,
                e.to_string(),
            )),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::HttpRemoteOpenaiCompatible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_url_handles_v1_suffix() {
        let config = EmbeddingConfig {
            base_url: Some("http://localhost:11434/v1".to_string()),
            ..EmbeddingConfig::local_runtime()
        };
        let provider = OpenAiProvider::new(&config).unwrap();
        assert_eq!(provider.embeddings_url(), "http://localhost:11434/v1/embeddings");
    }

    #[test]
    fn embeddings_url_appends_v1_when_missing() {
        let config = EmbeddingConfig {
            base_url: Some("http://localhost:8080".to_string()),
            ..EmbeddingConfig::local_runtime()
        };
        let provider = OpenAiProvider::new(&config).unwrap();
        assert_eq!(provider.embeddings_url(), "http://localhost:8080/v1/embeddings");
    }
}
