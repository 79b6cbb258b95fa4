//! Vector Store, Embedding Generator, Semantic Cache, and Hybrid Ranker.
//!
//! Dense-vector persistence lives alongside the Graph Store's SQLite file
//! (one process, one writer, concurrent readers); embeddings are produced by
//! a pluggable provider behind one contract; query results are cached with
//! TTL + LRU eviction; and the ranker fuses semantic hits with structural
//! signal from a prior graph query.

pub mod embeddings;
pub mod error;
pub mod hybrid;
pub mod semantic_cache;
pub mod vector_store;

pub use embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider, EmbeddingProviderType, ProviderStatus};
pub use error::{Result, SearchError};
pub use hybrid::{rerank_semantic_hits, HybridHit, STRUCTURAL_BOOST};
pub use semantic_cache::SemanticCache;
pub use vector_store::{VectorFilter, VectorHit, VectorMetadata, VectorMetrics, VectorRecord, VectorStore};
