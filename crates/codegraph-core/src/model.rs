//! Entity/relationship data model shared by every component that touches the
//! code graph. Mirrors the schema in the system specification: entities are
//! addressable by a stable id, relationships are typed directed edges between
//! two entity ids.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of code entity. Flat rather than the tiered container/callable/data
/// split some graph tools use — the specification's taxonomy is a closed,
/// flat set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    File,
    Module,
    Package,
    Class,
    Interface,
    Function,
    Method,
    Property,
    Variable,
    Type,
    Enum,
    Typealias,
    MagicMethod,
    AsyncFunction,
    Generator,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Module => "module",
            EntityType::Package => "package",
            EntityType::Class => "class",
            EntityType::Interface => "interface",
            EntityType::Function => "function",
            EntityType::Method => "method",
            EntityType::Property => "property",
            EntityType::Variable => "variable",
            EntityType::Type => "type",
            EntityType::Enum => "enum",
            EntityType::Typealias => "typealias",
            EntityType::MagicMethod => "magic_method",
            EntityType::AsyncFunction => "async_function",
            EntityType::Generator => "generator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "file" => EntityType::File,
            "module" => EntityType::Module,
            "package" => EntityType::Package,
            "class" => EntityType::Class,
            "interface" => EntityType::Interface,
            "function" => EntityType::Function,
            "method" => EntityType::Method,
            "property" => EntityType::Property,
            "variable" => EntityType::Variable,
            "type" => EntityType::Type,
            "enum" => EntityType::Enum,
            "typealias" => EntityType::Typealias,
            "magic_method" => EntityType::MagicMethod,
            "async_function" => EntityType::AsyncFunction,
            "generator" => EntityType::Generator,
            _ => return None,
        })
    }
}

/// Directed relationship type between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Calls,
    Imports,
    Exports,
    Inherits,
    Implements,
    Contains,
    References,
    DependsOn,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Calls => "calls",
            RelationshipType::Imports => "imports",
            RelationshipType::Exports => "exports",
            RelationshipType::Inherits => "inherits",
            RelationshipType::Implements => "implements",
            RelationshipType::Contains => "contains",
            RelationshipType::References => "references",
            RelationshipType::DependsOn => "depends_on",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "calls" => RelationshipType::Calls,
            "imports" => RelationshipType::Imports,
            "exports" => RelationshipType::Exports,
            "inherits" => RelationshipType::Inherits,
            "implements" => RelationshipType::Implements,
            "contains" => RelationshipType::Contains,
            "references" => RelationshipType::References,
            "depends_on" => RelationshipType::DependsOn,
            _ => return None,
        })
    }
}

/// A single point within a file (1-indexed line/col, 0-indexed byte offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub line: usize,
    pub col: usize,
    pub index: usize,
}

/// A half-open `[start, end)` source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub start: Point,
    pub end: Point,
}

/// A named code construct, addressable by a stable id of the shape
/// `"<file>:<kind>:<qualifiedName>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub file_path: String,
    pub location: Location,
    pub content_hash: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Entity {
    /// Build the stable id `"<file>:<kind>:<qualifiedName>"`.
    pub fn make_id(file_path: &str, entity_type: EntityType, qualified_name: &str) -> String {
        format!("{}:{}:{}", file_path, entity_type.as_str(), qualified_name)
    }
}

/// A typed directed edge between two entity ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub metadata: RelationshipMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Relationship {
    pub fn make_id(from_id: &str, to_id: &str, relationship_type: RelationshipType) -> String {
        format!("{}->{}:{}", from_id, to_id, relationship_type.as_str())
    }

    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, relationship_type: RelationshipType) -> Self {
        let from_id = from_id.into();
        let to_id = to_id.into();
        let id = Self::make_id(&from_id, &to_id, relationship_type);
        Self {
            id,
            from_id,
            to_id,
            relationship_type,
            metadata: RelationshipMetadata::default(),
        }
    }
}

/// A single non-fatal error produced while parsing a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// The parser's structured output for one file. Ephemeral — passed from the
/// Parser Engine to the Indexer and never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub file_path: String,
    pub language: String,
    pub content_hash: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub parse_time_ms: u64,
    pub from_cache: bool,
    #[serde(default)]
    pub errors: Vec<ParseError>,
}

impl ParseResult {
    /// A synthetic empty result for a deleted file — lets the Indexer purge
    /// its entities without a special-cased code path.
    pub fn empty_for_deletion(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            language: "unknown".to_string(),
            content_hash: String::new(),
            entities: Vec::new(),
            relationships: Vec::new(),
            parse_time_ms: 0,
            from_cache: false,
            errors: Vec::new(),
        }
    }
}

/// Kind of change driving an incremental parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A single file-level change fed into the incremental parsing path.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub file_path: String,
    pub content: Option<Vec<u8>>,
    pub previous_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_matches_spec_shape() {
        let id = Entity::make_id("src/lib.rs", EntityType::Function, "add");
        assert_eq!(id, "src/lib.rs:function:add");
    }

    #[test]
    fn entity_type_round_trips_through_str() {
        for t in [
            EntityType::File,
            EntityType::Class,
            EntityType::AsyncFunction,
            EntityType::MagicMethod,
        ] {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn relationship_type_round_trips_through_str() {
        for t in [
            RelationshipType::Calls,
            RelationshipType::DependsOn,
            RelationshipType::Implements,
        ] {
            assert_eq!(RelationshipType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn relationship_id_is_deterministic() {
        let a = Relationship::new("a:function:f", "a:function:g", RelationshipType::Calls);
        let b = Relationship::new("a:function:f", "a:function:g", RelationshipType::Calls);
        assert_eq!(a.id, b.id);
    }
}
