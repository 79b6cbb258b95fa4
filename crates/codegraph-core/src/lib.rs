//! Entity/relationship data model and tree-sitter parsing engine.
//!
//! This crate owns the shared vocabulary every other component in the
//! service speaks: [`model::Entity`] and [`model::Relationship`], produced by
//! walking source files with [`parser::CodeParser`] and kept fresh across
//! edits via content hashing ([`merkle`]) and a hash-keyed result cache
//! ([`cache`]). Manifest files ([`manifest`]) contribute `DependsOn` edges
//! between components that source-level parsing can't see.

pub mod cache;
pub mod error;
pub mod manifest;
pub mod merkle;
pub mod model;
pub mod parser;

pub use cache::{CacheMetrics, ParseCache};
pub use error::{ParserError as CoreError, Result as CoreResult};
pub use manifest::{
    DependencyType, LocalDependency, ManifestError, ManifestInfo, ManifestLanguage, ManifestParser,
};
pub use merkle::{hash_content, ChangeSet, ExclusionFilter, MerkleTree, MerkleTreeManager, TreeStats};
pub use model::{
    ChangeKind, Entity, EntityType, FileChange, Location, ParseError, ParseResult, Point,
    Relationship, RelationshipMetadata, RelationshipType,
};
pub use parser::{CodeParser, ExtractOutput, SupportedLanguage};
