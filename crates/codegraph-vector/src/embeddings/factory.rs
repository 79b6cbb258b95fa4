//! Builds an [`EmbeddingProvider`] trait object from an [`EmbeddingConfig`].

use std::sync::Arc;

use super::azure_ml::VendorProvider;
use super::local::LocalProvider;
use super::openai::OpenAiProvider;
use super::provider::{EmbeddingConfig, EmbeddingProvider, EmbeddingProviderType};
use super::stub::StubProvider;
use crate::error::Result;

pub fn create(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingProviderType::LocalRuntime => Arc::new(LocalProvider::new(config)?),
        EmbeddingProviderType::HttpRemoteOpenaiCompatible => Arc::new(OpenAiProvider::new(config)?),
        EmbeddingProviderType::HttpRemoteVendor => Arc::new(VendorProvider::new(config)?),
        EmbeddingProviderType::InMemoryStub => Arc::new(StubProvider::new(config.dimension.unwrap_or(256))),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_stub_provider_from_config() {
        let provider = create(&EmbeddingConfig::stub()).unwrap();
        assert_eq!(provider.provider_type(), EmbeddingProviderType::InMemoryStub);
    }
}
