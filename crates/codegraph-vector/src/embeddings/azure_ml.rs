//! `http-remote-vendor` provider.
//!
//! Grounded in Azure ML Online Endpoint's `/score` contract: a single POST
//! with `{"inputs": [...]}` returning `{"embeddings": [[...]], "dimension"}`.
//! Generalized here to "any vendor HTTP endpoint with this inputs/embeddings
//! shape", since the spec treats vendor wire protocols as pluggable and
//! out of scope to enumerate individually.

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

#[derive(Debug, Serialize)]
struct VendorRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct VendorResponse {
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    dimension: Option<usize>,
}

/// `http-remote-vendor` provider implementation.
pub struct VendorProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_batch_size: usize,
    headers: Vec<(String, String)>,
    dimension: AtomicUsize,
}

impl VendorProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = config
            .base_url
            .clone()
            .ok_or_else(|| SearchError::InvalidConfig("http-remote-vendor requires baseUrl".into()))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SearchError::ProviderUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            max_batch_size: config.max_batch_size_or_default(),
            headers: config.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            dimension: AtomicUsize::new(config.dimension.unwrap_or(0)),
        })
    }

    async fn send_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.endpoint).json(&VendorRequest { inputs: texts });
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
                let parsed: VendorResponse = response
                    .json()
                    .await
                    .map_err(|e| SearchError::ProviderUnavailable(format!("bad response body: {e}")))?;
                if let Some(dim) = parsed.dimension.or_else(|| parsed.embeddings.first().map(Vec::len)) {
                    self.dimension.store(dim, Ordering::Relaxed);
                }
                Ok(parsed.embeddings)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SearchError::Auth("vendor endpoint rejected credentials".into()))
            }
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
                Err(e @ SearchError::Auth(_)) => return Err(e),
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
impl EmbeddingProvider for VendorProvider {
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
            Ok(_) => Ok(
                ProviderStatus::healthy(EmbeddingProviderType::HttpRemoteVendor, &self.endpoint)
                    .with_latency(start.elapsed().as_millis() as u64),
            ),
            Err(e) => {
                Ok(ProviderStatus::unavailable(EmbeddingProviderType::HttpRemoteVendor, e.to_string()))
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::HttpRemoteVendor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_base_url() {
        let config = EmbeddingConfig::default();
        assert!(VendorProvider::new(&config).is_err());
    }
}
