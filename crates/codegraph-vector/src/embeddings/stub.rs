//! Deterministic, network-free provider used in tests and whenever no
//! model/network dependency is available. Hashes each text with SHA-256 and
//! expands the digest into a unit vector — not semantically meaningful, but
//! stable across runs, which is what cache-hit-rate and determinism tests
//! actually need.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::provider::{EmbeddingProvider, EmbeddingProviderType, ProviderStatus};
use crate::error::Result;

pub struct StubProvider {
    dimension: usize,
}

impl StubProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while out.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks(4) {
                if out.len() == self.dimension {
                    break;
                }
                let mut buf = [0u8; 4];
                buf[..chunk.len()].copy_from_slice(chunk);
                let v = u32::from_le_bytes(buf) as f32 / u32::MAX as f32;
                out.push(v * 2.0 - 1.0);
            }
            counter += 1;
        }
        out
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn generate_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn warmup(&self) -> Result<()> {
        Ok(())
    }

    async fn check_status(&self) -> Result<ProviderStatus> {
        Ok(ProviderStatus::healthy(EmbeddingProviderType::InMemoryStub, "stub"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::InMemoryStub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_yields_same_vector() {
        let provider = StubProvider::new(16);
        let a = provider.generate_code_embedding("fn add(a, b) {}").await.unwrap();
        let b = provider.generate_code_embedding("fn add(a, b) {}").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn different_text_yields_different_vector() {
        let provider = StubProvider::new(16);
        let a = provider.generate_code_embedding("alpha").await.unwrap();
        let b = provider.generate_code_embedding("beta").await.unwrap();
        assert_ne!(a, b);
    }
}
