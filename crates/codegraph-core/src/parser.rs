//! Tree-sitter based parsing: turns source text into [`Entity`]/[`Relationship`]
//! pairs for one file.
//!
//! Each supported language gets a small declarative tag query (the same
//! `@definition.*` / `@name` / `@reference.*` convention used by editors'
//! symbol-outline queries) compiled once per [`SupportedLanguage`] and reused
//! across files. Resolution of call/import targets is best-effort: anything
//! that can't be resolved against entities already seen in the same file is
//! dropped rather than invented, except for Rust `Type::method` calls, which
//! are resolved against the enclosing impl block's declared methods.

use std::collections::HashMap;
use std::path::Path;

use tree_sitter::{Language, Parser, Query, QueryCursor, StreamingIterator, Tree};

use crate::error::{ParserError, Result};
use crate::merkle::hash_content;
use crate::model::{Entity, EntityType, Location, Point, Relationship, RelationshipType};

/// Languages this crate can parse into entities and relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedLanguage {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl SupportedLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedLanguage::Rust => "rust",
            SupportedLanguage::Python => "python",
            SupportedLanguage::JavaScript => "javascript",
            SupportedLanguage::TypeScript => "typescript",
            SupportedLanguage::Tsx => "tsx",
            SupportedLanguage::Go => "go",
        }
    }

    pub fn tree_sitter_language(&self) -> Language {
        match self {
            SupportedLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
            SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            SupportedLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            SupportedLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SupportedLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            SupportedLanguage::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext.to_lowercase().as_str() {
            "rs" => SupportedLanguage::Rust,
            "py" | "pyi" => SupportedLanguage::Python,
            "js" | "mjs" | "cjs" | "jsx" => SupportedLanguage::JavaScript,
            "ts" | "mts" | "cts" => SupportedLanguage::TypeScript,
            "tsx" => SupportedLanguage::Tsx,
            "go" => SupportedLanguage::Go,
            _ => return None,
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn all_extensions() -> &'static [&'static str] {
        &["rs", "py", "pyi", "js", "mjs", "cjs", "jsx", "ts", "mts", "cts", "tsx", "go"]
    }

    fn tags_query_source(&self) -> &'static str {
        match self {
            SupportedLanguage::Rust => queries::RUST_TAGS,
            SupportedLanguage::Python => queries::PYTHON_TAGS,
            SupportedLanguage::JavaScript => queries::JAVASCRIPT_TAGS,
            SupportedLanguage::TypeScript | SupportedLanguage::Tsx => queries::TYPESCRIPT_TAGS,
            SupportedLanguage::Go => queries::GO_TAGS,
        }
    }
}

impl std::fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inline tag queries, one per grammar.
///
/// These follow the `(node name: (_) @name) @definition.kind` /
/// `(call ...) @reference.call` convention: every match pairs a `@name`
/// capture (the identifier to use as the entity's name) with a
/// `@definition.*` or `@reference.*` capture carrying the node whose range
/// becomes the entity's or reference's location.
mod queries {
    pub const RUST_TAGS: &str = r#"
(function_item name: (identifier) @name) @definition.function
(struct_item name: (type_identifier) @name) @definition.class
(enum_item name: (type_identifier) @name) @definition.enum
(trait_item name: (type_identifier) @name) @definition.interface
(mod_item name: (identifier) @name) @definition.module
(impl_item type: (type_identifier) @name) @definition.impl

(use_declaration argument: (_) @name) @reference.import

(call_expression function: (identifier) @name) @reference.call
(call_expression function: (field_expression field: (field_identifier) @name)) @reference.call
(call_expression function: (scoped_identifier name: (identifier) @name)) @reference.call
"#;

    pub const PYTHON_TAGS: &str = r#"
(function_definition name: (identifier) @name) @definition.function
(class_definition name: (identifier) @name) @definition.class

(import_statement) @reference.import
(import_from_statement) @reference.import

(call function: (identifier) @name) @reference.call
(call function: (attribute attribute: (identifier) @name)) @reference.call
"#;

    pub const JAVASCRIPT_TAGS: &str = r#"
(function_declaration name: (identifier) @name) @definition.function
(class_declaration name: (identifier) @name) @definition.class
(method_definition name: (property_identifier) @name) @definition.method

(import_statement) @reference.import

(call_expression function: (identifier) @name) @reference.call
(call_expression function: (member_expression property: (property_identifier) @name)) @reference.call
"#;

    pub const TYPESCRIPT_TAGS: &str = r#"
(function_declaration name: (identifier) @name) @definition.function
(class_declaration name: (type_identifier) @name) @definition.class
(method_definition name: (property_identifier) @name) @definition.method
(interface_declaration name: (type_identifier) @name) @definition.interface
(type_alias_declaration name: (type_identifier) @name) @definition.typealias

(import_statement) @reference.import

(call_expression function: (identifier) @name) @reference.call
(call_expression function: (member_expression property: (property_identifier) @name)) @reference.call
"#;

    pub const GO_TAGS: &str = r#"
(function_declaration name: (identifier) @name) @definition.function
(method_declaration name: (field_identifier) @name) @definition.method
(type_spec name: (type_identifier) @name type: (struct_type)) @definition.class
(type_spec name: (type_identifier) @name type: (interface_type)) @definition.interface

(import_spec) @reference.import

(call_expression function: (identifier) @name) @reference.call
(call_expression function: (selector_expression field: (field_identifier) @name)) @reference.call
"#;
}

fn definition_entity_type(tag: &str) -> Option<EntityType> {
    Some(match tag {
        "definition.function" => EntityType::Function,
        "definition.method" => EntityType::Method,
        "definition.class" => EntityType::Class,
        "definition.interface" => EntityType::Interface,
        "definition.enum" => EntityType::Enum,
        "definition.typealias" => EntityType::Typealias,
        "definition.module" => EntityType::Module,
        "definition.impl" => return None, // impl blocks contribute no standalone entity
        _ => return None,
    })
}

/// A tree-sitter parser bound to one [`SupportedLanguage`] plus its compiled
/// tag query. Cheap to construct; callers typically keep one per language
/// per worker thread.
pub struct CodeParser {
    parser: Parser,
    query: Query,
    language: SupportedLanguage,
}

impl CodeParser {
    pub fn new(language: SupportedLanguage) -> Result<Self> {
        let ts_language = language.tree_sitter_language();
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ParserError::LanguageSetup(e.to_string()))?;

        let query = Query::new(&ts_language, language.tags_query_source()).map_err(|e| {
            ParserError::QueryCompile {
                language: language.as_str().to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            parser,
            query,
            language,
        })
    }

    pub fn for_path(path: &Path) -> Result<Self> {
        let language = SupportedLanguage::from_path(path)
            .ok_or_else(|| ParserError::UnsupportedLanguage(path.display().to_string()))?;
        Self::new(language)
    }

    pub fn language(&self) -> SupportedLanguage {
        self.language
    }

    pub fn parse(&mut self, source: &str) -> Result<Tree> {
        self.parser
            .parse(source, None)
            .ok_or_else(|| ParserError::ParseFailed(self.language.as_str().to_string()))
    }

    /// Walk every match of the language's tag query and build entities plus
    /// best-effort relationships. `file_path` seeds entity ids and is stamped
    /// onto every entity produced.
    pub fn extract(&self, tree: &Tree, source: &str, file_path: &str) -> ExtractOutput {
        let bytes = source.as_bytes();
        let capture_names = self.query.capture_names();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.query, tree.root_node(), bytes);

        let mut entities = Vec::new();
        // name -> entity id, used for same-file call/impl resolution.
        let mut by_name: HashMap<String, String> = HashMap::new();
        // entity id -> impl type name, for Rust method qualification.
        let mut impl_type_by_range: Vec<(tree_sitter::Range, String)> = Vec::new();
        let mut call_refs: Vec<(String, usize, String)> = Vec::new(); // (caller_id, line, callee_name)
        let mut import_refs: Vec<(usize, String)> = Vec::new();

        while let Some(m) = matches.next() {
            let mut name_text: Option<String> = None;
            let mut def_tag: Option<&str> = None;
            let mut def_node: Option<tree_sitter::Node> = None;

            for capture in m.captures {
                let tag = capture_names[capture.index as usize];
                let node = capture.node;
                if tag == "name" {
                    name_text = node.utf8_text(bytes).ok().map(|s| s.to_string());
                } else if let Some(stripped) = tag.strip_prefix("definition.") {
                    def_tag = Some(tag);
                    def_node = Some(node);
                    let _ = stripped;
                } else if tag == "reference.call" {
                    if let Ok(name) = node.utf8_text(bytes) {
                        let line = node.start_position().row + 1;
                        call_refs.push((file_path.to_string(), line, name.to_string()));
                    }
                } else if tag == "reference.import" {
                    if let Ok(text) = node.utf8_text(bytes) {
                        import_refs.push((node.start_position().row + 1, text.to_string()));
                    }
                }
            }

            let (Some(name), Some(tag), Some(node)) = (name_text, def_tag, def_node) else {
                continue;
            };

            if tag == "definition.impl" {
                impl_type_by_range.push((node.range(), name));
                continue;
            }

            let Some(entity_type) = definition_entity_type(tag) else {
                continue;
            };

            let qualified_name = qualify_name(&name, &node, &impl_type_by_range, self.language);
            let id = Entity::make_id(file_path, entity_type, &qualified_name);
            let location = node_location(&node);
            let content_hash = hash_content(
                node.utf8_text(bytes).unwrap_or_default().as_bytes(),
            );

            by_name.insert(name.clone(), id.clone());
            by_name.insert(qualified_name.clone(), id.clone());

            entities.push(Entity {
                id,
                name,
                entity_type,
                file_path: file_path.to_string(),
                location,
                content_hash,
                metadata: HashMap::new(),
            });
        }

        // Resolve calls against same-file definitions; unresolved calls are
        // dropped (best-effort per-file fidelity, not fabricated).
        let mut relationships = Vec::new();
        for (caller_file, line, callee_name) in call_refs {
            let Some(caller_entity) = enclosing_entity(&entities, &caller_file, line) else {
                continue;
            };
            if let Some(callee_id) = by_name.get(&callee_name) {
                if callee_id != &caller_entity.id {
                    let mut rel = Relationship::new(
                        caller_entity.id.clone(),
                        callee_id.clone(),
                        RelationshipType::Calls,
                    );
                    rel.metadata.line = Some(line);
                    relationships.push(rel);
                }
            }
        }

        for (line, raw) in import_refs {
            let module = extract_import_module(&raw, self.language);
            let mut rel = Relationship::new(
                Entity::make_id(file_path, EntityType::Module, file_path),
                format!("external:{module}"),
                RelationshipType::Imports,
            );
            rel.metadata.line = Some(line);
            rel.metadata.context = Some(raw);
            relationships.push(rel);
        }

        ExtractOutput {
            entities,
            relationships,
        }
    }
}

/// Entities plus relationships produced by one [`CodeParser::extract`] call.
#[derive(Debug, Default)]
pub struct ExtractOutput {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

fn node_location(node: &tree_sitter::Node) -> Location {
    let start = node.start_position();
    let end = node.end_position();
    Location {
        start: Point {
            line: start.row + 1,
            col: start.column,
            index: node.start_byte(),
        },
        end: Point {
            line: end.row + 1,
            col: end.column,
            index: node.end_byte(),
        },
    }
}

/// Qualifies a method's name with the enclosing Rust `impl Type` block it
/// falls inside, e.g. `foo` inside `impl Widget` becomes `Widget::foo`.
/// A no-op for every other language and for top-level Rust items.
fn qualify_name(
    name: &str,
    node: &tree_sitter::Node,
    impl_blocks: &[(tree_sitter::Range, String)],
    language: SupportedLanguage,
) -> String {
    if !matches!(language, SupportedLanguage::Rust) {
        return name.to_string();
    }
    let range = node.range();
    for (impl_range, type_name) in impl_blocks {
        if impl_range.start_byte <= range.start_byte && range.end_byte <= impl_range.end_byte {
            return format!("{type_name}::{name}");
        }
    }
    name.to_string()
}

fn enclosing_entity<'a>(
    entities: &'a [Entity],
    file_path: &str,
    line: usize,
) -> Option<&'a Entity> {
    entities
        .iter()
        .filter(|e| {
            e.file_path == file_path
                && matches!(
                    e.entity_type,
                    EntityType::Function
                        | EntityType::Method
                        | EntityType::AsyncFunction
                        | EntityType::Generator
                )
                && e.location.start.line <= line
                && line <= e.location.end.line
        })
        .min_by_key(|e| e.location.end.line - e.location.start.line)
}

fn extract_import_module(raw: &str, language: SupportedLanguage) -> String {
    match language {
        SupportedLanguage::Rust => raw
            .trim_start_matches("crate::")
            .split("::")
            .next()
            .unwrap_or(raw)
            .trim()
            .to_string(),
        SupportedLanguage::Python => raw
            .trim_start_matches("from ")
            .trim_start_matches("import ")
            .split(|c: char| c == ' ' || c == '.')
            .next()
            .unwrap_or(raw)
            .trim()
            .to_string(),
        SupportedLanguage::Go => raw.trim_matches(|c: char| c == '"' || c.is_whitespace()).to_string(),
        _ => raw
            .split(['\'', '"'])
            .nth(1)
            .unwrap_or(raw)
            .trim()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(language: SupportedLanguage, source: &str, path: &str) -> ExtractOutput {
        let mut parser = CodeParser::new(language).unwrap();
        let tree = parser.parse(source).unwrap();
        parser.extract(&tree, source, path)
    }

    #[test]
    fn rust_function_definitions_are_extracted() {
        let out = extract(
            SupportedLanguage::Rust,
            "fn add(a: i32, b: i32) -> i32 { a + b }",
            "src/lib.rs",
        );
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities[0].name, "add");
        assert_eq!(out.entities[0].entity_type, EntityType::Function);
    }

    #[test]
    fn rust_impl_methods_are_qualified_by_type() {
        let source = "struct Widget;\nimpl Widget {\n    fn render(&self) {}\n}\n";
        let out = extract(SupportedLanguage::Rust, source, "src/widget.rs");
        let method = out
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Function && e.name == "render")
            .expect("method entity");
        assert!(method.id.contains("Widget::render"));
    }

    #[test]
    fn rust_same_file_calls_resolve_to_callee_entity() {
        let source = "fn helper() {}\nfn main() { helper(); }\n";
        let out = extract(SupportedLanguage::Rust, source, "src/main.rs");
        assert!(out
            .relationships
            .iter()
            .any(|r| r.relationship_type == RelationshipType::Calls));
    }

    #[test]
    fn python_class_and_function_definitions_are_extracted() {
        let source = "class Greeter:\n    def hello(self):\n        pass\n";
        let out = extract(SupportedLanguage::Python, source, "greeter.py");
        assert!(out
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Class && e.name == "Greeter"));
        assert!(out
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Function && e.name == "hello"));
    }

    #[test]
    fn typescript_interface_is_extracted() {
        let source = "interface Shape {\n  area(): number;\n}\n";
        let out = extract(SupportedLanguage::TypeScript, source, "shape.ts");
        assert!(out
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Interface && e.name == "Shape"));
    }

    #[test]
    fn go_struct_and_interface_types_are_distinguished() {
        let source = "package main\n\ntype Point struct {\n\tX int\n}\n\ntype Shape interface {\n\tArea() float64\n}\n";
        let out = extract(SupportedLanguage::Go, source, "shapes.go");
        assert!(out
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Class && e.name == "Point"));
        assert!(out
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Interface && e.name == "Shape"));
    }

    #[test]
    fn unresolved_calls_are_dropped_not_fabricated() {
        let source = "fn main() { totally_unknown_function(); }\n";
        let out = extract(SupportedLanguage::Rust, source, "src/main.rs");
        assert!(out
            .relationships
            .iter()
            .all(|r| r.relationship_type != RelationshipType::Calls));
    }
}
