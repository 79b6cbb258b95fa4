//! Embedding generation: a single provider-agnostic contract with four
//! backend variants (local-runtime, two HTTP remotes, and an in-memory
//! stub). See [`provider::EmbeddingProvider`] for the trait every variant
//! implements.

mod azure_ml;
mod factory;
mod local;
mod openai;
mod provider;
mod retry;
mod stub;

pub use factory::create as create_provider;
pub use provider::{EmbeddingConfig, EmbeddingProvider, EmbeddingProviderType, ProviderStatus};
