//! SQLite schema for the embedded graph store.
//!
//! Entities and relationships share one database file with the vector store
//! (`vectors.db` under the workspace's `.code-graph-rag/` state directory) —
//! the vector table lives in `codegraph-vector`, which opens the same file.

/// Bumped whenever a schema migration is required.
pub const SCHEMA_VERSION: &str = "1.0";

pub const SCHEMA_CREATE_ENTITIES: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    start_index INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_col INTEGER NOT NULL,
    end_index INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}'
)
"#;

pub const SCHEMA_CREATE_RELATIONSHIPS: &str = r#"
CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY NOT NULL,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    relationship_type TEXT NOT NULL,
    line INTEGER,
    context TEXT,
    source TEXT
)
"#;

pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS graph_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entities_file ON entities(file_path);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_id);
CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_id);
CREATE INDEX IF NOT EXISTS idx_relationships_type ON relationships(relationship_type);
CREATE INDEX IF NOT EXISTS idx_relationships_from_type ON relationships(from_id, relationship_type);
CREATE INDEX IF NOT EXISTS idx_relationships_to_type ON relationships(to_id, relationship_type);
"#;

pub const ENTITY_COLUMNS: &str = "id, name, entity_type, file_path, start_line, start_col, start_index, end_line, end_col, end_index, content_hash, metadata_json";

pub const RELATIONSHIP_COLUMNS: &str = "id, from_id, to_id, relationship_type, line, context, source";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_creates_expected_tables_and_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(SCHEMA_CREATE_ENTITIES, []).unwrap();
        conn.execute(SCHEMA_CREATE_RELATIONSHIPS, []).unwrap();
        conn.execute(SCHEMA_CREATE_METADATA, []).unwrap();
        conn.execute_batch(SCHEMA_CREATE_INDEXES).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"entities".to_string()));
        assert!(tables.contains(&"relationships".to_string()));

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(indexes.contains(&"idx_entities_file".to_string()));
        assert!(indexes.contains(&"idx_relationships_from".to_string()));
    }
}
