//! The four task-executing units: Parser, Indexer, Query, Semantic.

pub mod indexer_agent;
pub mod parser_agent;
pub mod query_agent;
pub mod semantic_agent;

pub use indexer_agent::IndexerAgent;
pub use parser_agent::ParserAgent;
pub use query_agent::QueryAgent;
pub use semantic_agent::SemanticAgent;
