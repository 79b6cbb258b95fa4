//! Embedded, transactional store for entities and relationships.
//!
//! A single SQLite connection guarded by a `parking_lot::Mutex` — rusqlite
//! connections aren't `Sync`, and write volume here (batched upserts during
//! indexing) never justifies a connection pool. WAL mode lets concurrent
//! readers (query tools) proceed while an index pass holds the write lock
//! only for the duration of one transaction.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use codegraph_core::model::{
    Entity, EntityType, Location, Point, Relationship, RelationshipMetadata, RelationshipType,
};

use crate::error::{GraphError, Result};
use crate::schema::{
    ENTITY_COLUMNS, RELATIONSHIP_COLUMNS, SCHEMA_CREATE_ENTITIES, SCHEMA_CREATE_INDEXES,
    SCHEMA_CREATE_METADATA, SCHEMA_CREATE_RELATIONSHIPS, SCHEMA_VERSION,
};

/// Direction to traverse relationships in relative to a given entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Filters for `GraphStore::query_entities`.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<EntityType>,
    pub name_contains: Option<String>,
    pub file_prefix: Option<String>,
}

/// Aggregate counts reported by `get_graph_stats`/`get_graph_health` tools.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GraphMetrics {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub file_count: usize,
}

pub struct GraphStore {
    conn: Mutex<Connection>,
}

impl GraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute(SCHEMA_CREATE_ENTITIES, [])?;
        conn.execute(SCHEMA_CREATE_RELATIONSHIPS, [])?;
        conn.execute(SCHEMA_CREATE_METADATA, [])?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES)?;
        conn.execute(
            "INSERT OR REPLACE INTO graph_metadata(key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a batch of entities in one transaction. Idempotent:
    /// re-upserting the same entity id overwrites its row in place.
    pub fn upsert_entities(&self, entities: &[Entity]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO entities ({ENTITY_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)"
            ))?;
            for entity in entities {
                let metadata_json = serde_json::to_string(&entity.metadata)?;
                stmt.execute(params![
                    entity.id,
                    entity.name,
                    entity.entity_type.as_str(),
                    entity.file_path,
                    entity.location.start.line as i64,
                    entity.location.start.col as i64,
                    entity.location.start.index as i64,
                    entity.location.end.line as i64,
                    entity.location.end.col as i64,
                    entity.location.end.index as i64,
                    entity.content_hash,
                    metadata_json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO relationships ({RELATIONSHIP_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7)"
            ))?;
            for rel in relationships {
                stmt.execute(params![
                    rel.id,
                    rel.from_id,
                    rel.to_id,
                    rel.relationship_type.as_str(),
                    rel.metadata.line.map(|l| l as i64),
                    rel.metadata.context,
                    rel.metadata.source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes every entity and relationship rooted at `file_path`. Safe to
    /// call on a file with no existing rows (e.g. a create-then-delete
    /// within one batch) — deletes zero rows rather than erroring.
    pub fn delete_by_file(&self, file_path: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let entity_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM entities WHERE file_path = ?1")?;
            let rows = stmt.query_map(params![file_path], |r| r.get::<_, String>(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        for id in &entity_ids {
            tx.execute(
                "DELETE FROM relationships WHERE from_id = ?1 OR to_id = ?1",
                params![id],
            )?;
        }
        tx.execute("DELETE FROM entities WHERE file_path = ?1", params![file_path])?;
        tx.commit()?;
        Ok(())
    }

    /// Drops every row from every table, resetting the store to empty.
    pub fn reset(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM entities", [])?;
        conn.execute("DELETE FROM relationships", [])?;
        Ok(())
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"))?;
        stmt.query_row(params![id], row_to_entity).optional().map_err(Into::into)
    }

    /// Entities declared in one file, newest-name-order, paginated by a
    /// plain offset (the MCP layer wraps this into an opaque cursor).
    pub fn list_file_entities(
        &self,
        file_path: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Entity>, usize)> {
        let conn = self.conn.lock();
        let total: usize = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE file_path = ?1",
            params![file_path],
            |r| r.get::<_, i64>(0),
        )? as usize;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE file_path = ?1 ORDER BY start_line ASC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![file_path, limit as i64, offset as i64], row_to_entity)?;
        let entities = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((entities, total))
    }

    pub fn query_entities(
        &self,
        filter: &EntityFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Entity>, usize)> {
        let conn = self.conn.lock();
        let mut clauses = Vec::new();
        let mut bind: Vec<String> = Vec::new();

        if let Some(t) = filter.entity_type {
            clauses.push("entity_type = ?".to_string());
            bind.push(t.as_str().to_string());
        }
        if let Some(ref name) = filter.name_contains {
            clauses.push("name LIKE ?".to_string());
            bind.push(format!("%{name}%"));
        }
        if let Some(ref prefix) = filter.file_prefix {
            clauses.push("file_path LIKE ?".to_string());
            bind.push(format!("{prefix}%"));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM entities {where_clause}");
        let mut count_stmt = conn.prepare(&count_sql)?;
        let total: usize = count_stmt
            .query_row(rusqlite::params_from_iter(bind.iter()), |r| r.get::<_, i64>(0))?
            as usize;

        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities {where_clause} ORDER BY file_path, start_line LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut all_bind = bind.clone();
        all_bind.push(limit.to_string());
        all_bind.push(offset.to_string());
        let rows = stmt.query_map(rusqlite::params_from_iter(all_bind.iter()), row_to_entity)?;
        let entities = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((entities, total))
    }

    /// Both endpoints must exist in the entities table at query time — a
    /// relationship whose target never resolved to an entity (e.g. an
    /// import naming an external, un-indexed module) is a pending edge,
    /// not a queryable one, so it's excluded here rather than surfaced as
    /// dangling.
    pub fn get_relationships_for_entity(
        &self,
        entity_id: &str,
        direction: Direction,
        relationship_type: Option<RelationshipType>,
    ) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        const BOTH_ENDPOINTS_EXIST: &str = "EXISTS (SELECT 1 FROM entities WHERE entities.id = relationships.from_id) \
             AND EXISTS (SELECT 1 FROM entities WHERE entities.id = relationships.to_id)";
        let (sql, binds): (String, Vec<String>) = match direction {
            Direction::Outgoing => (
                format!("SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE from_id = ?1 AND {BOTH_ENDPOINTS_EXIST}"),
                vec![entity_id.to_string()],
            ),
            Direction::Incoming => (
                format!("SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE to_id = ?1 AND {BOTH_ENDPOINTS_EXIST}"),
                vec![entity_id.to_string()],
            ),
            Direction::Both => (
                format!(
                    "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE (from_id = ?1 OR to_id = ?1) AND {BOTH_ENDPOINTS_EXIST}"
                ),
                vec![entity_id.to_string()],
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), row_to_relationship)?;
        let mut relationships = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        if let Some(rt) = relationship_type {
            relationships.retain(|r| r.relationship_type == rt);
        }
        Ok(relationships)
    }

    pub fn all_entities(&self) -> Result<Vec<Entity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {ENTITY_COLUMNS} FROM entities"))?;
        let rows = stmt.query_map([], row_to_entity)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Excludes relationships whose `from_id`/`to_id` doesn't resolve to an
    /// entity (e.g. an import pointing at an external, un-indexed module) —
    /// every relationship returned has both endpoints in the entity set.
    pub fn all_relationships(&self) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships \
             WHERE EXISTS (SELECT 1 FROM entities WHERE entities.id = relationships.from_id) \
               AND EXISTS (SELECT 1 FROM entities WHERE entities.id = relationships.to_id)"
        ))?;
        let rows = stmt.query_map([], row_to_relationship)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_metrics(&self) -> Result<GraphMetrics> {
        let conn = self.conn.lock();
        let entity_count: usize =
            conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get::<_, i64>(0))? as usize;
        let relationship_count: usize = conn.query_row(
            "SELECT COUNT(*) FROM relationships",
            [],
            |r| r.get::<_, i64>(0),
        )? as usize;
        let file_count: usize = conn.query_row(
            "SELECT COUNT(DISTINCT file_path) FROM entities",
            [],
            |r| r.get::<_, i64>(0),
        )? as usize;
        Ok(GraphMetrics {
            entity_count,
            relationship_count,
            file_count,
        })
    }

    /// Resolves an entity id into the entity plus every distinct error
    /// detail needed for a structured `not_found` response.
    pub fn require_entity(&self, id: &str) -> Result<Entity> {
        self.get_entity(id)?
            .ok_or_else(|| GraphError::EntityNotFound(id.to_string()))
    }
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let entity_type_str: String = row.get(2)?;
    let entity_type = EntityType::parse(&entity_type_str).unwrap_or(EntityType::Variable);
    let metadata_json: String = row.get(11)?;
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type,
        file_path: row.get(3)?,
        location: Location {
            start: Point {
                line: row.get::<_, i64>(4)? as usize,
                col: row.get::<_, i64>(5)? as usize,
                index: row.get::<_, i64>(6)? as usize,
            },
            end: Point {
                line: row.get::<_, i64>(7)? as usize,
                col: row.get::<_, i64>(8)? as usize,
                index: row.get::<_, i64>(9)? as usize,
            },
        },
        content_hash: row.get(10)?,
        metadata,
    })
}

fn row_to_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relationship> {
    let relationship_type_str: String = row.get(3)?;
    let relationship_type = RelationshipType::parse(&relationship_type_str)
        .unwrap_or(RelationshipType::References);
    Ok(Relationship {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        relationship_type,
        metadata: RelationshipMetadata {
            line: row.get::<_, Option<i64>>(4)?.map(|l| l as usize),
            context: row.get(5)?,
            source: row.get(6)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_core::model::{Entity, Location, Point};

    fn entity(id: &str, name: &str, file: &str, line: usize) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: EntityType::Function,
            file_path: file.to_string(),
            location: Location {
                start: Point { line, col: 0, index: 0 },
                end: Point { line: line + 1, col: 0, index: 10 },
            },
            content_hash: "hash".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = GraphStore::in_memory().unwrap();
        let e = entity("a.rs:function:foo", "foo", "a.rs", 1);
        store.upsert_entities(&[e.clone()]).unwrap();
        let fetched = store.get_entity(&e.id).unwrap().unwrap();
        assert_eq!(fetched.name, "foo");
    }

    #[test]
    fn upsert_is_idempotent_on_repeated_id() {
        let store = GraphStore::in_memory().unwrap();
        let e = entity("a.rs:function:foo", "foo", "a.rs", 1);
        store.upsert_entities(&[e.clone()]).unwrap();
        store.upsert_entities(&[e.clone()]).unwrap();
        assert_eq!(store.get_metrics().unwrap().entity_count, 1);
    }

    #[test]
    fn delete_by_file_removes_entities_and_their_relationships() {
        let store = GraphStore::in_memory().unwrap();
        let a = entity("a.rs:function:foo", "foo", "a.rs", 1);
        let b = entity("b.rs:function:bar", "bar", "b.rs", 1);
        store.upsert_entities(&[a.clone(), b.clone()]).unwrap();
        let rel = Relationship::new(a.id.clone(), b.id.clone(), RelationshipType::Calls);
        store.upsert_relationships(&[rel]).unwrap();

        store.delete_by_file("a.rs").unwrap();
        assert!(store.get_entity(&a.id).unwrap().is_none());
        assert!(store
            .get_relationships_for_entity(&b.id, Direction::Incoming, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn delete_by_file_on_missing_file_is_a_no_op() {
        let store = GraphStore::in_memory().unwrap();
        store.delete_by_file("never-existed.rs").unwrap();
    }

    #[test]
    fn list_file_entities_paginates_with_total_count() {
        let store = GraphStore::in_memory().unwrap();
        let entities: Vec<_> = (0..5).map(|i| entity(&format!("a.rs:function:f{i}"), &format!("f{i}"), "a.rs", i + 1)).collect();
        store.upsert_entities(&entities).unwrap();

        let (page, total) = store.list_file_entities("a.rs", 0, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);
    }

    #[test]
    fn query_entities_filters_by_type_and_name() {
        let store = GraphStore::in_memory().unwrap();
        let mut e1 = entity("a.rs:function:parse_file", "parse_file", "a.rs", 1);
        e1.entity_type = EntityType::Function;
        let mut e2 = entity("a.rs:class:Parser", "Parser", "a.rs", 10);
        e2.entity_type = EntityType::Class;
        store.upsert_entities(&[e1, e2]).unwrap();

        let filter = EntityFilter {
            entity_type: Some(EntityType::Function),
            name_contains: Some("parse".to_string()),
            file_prefix: None,
        };
        let (results, total) = store.query_entities(&filter, 0, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(results[0].name, "parse_file");
    }

    #[test]
    fn require_entity_errors_on_missing_id() {
        let store = GraphStore::in_memory().unwrap();
        assert!(store.require_entity("missing").is_err());
    }

    #[test]
    fn dangling_relationships_are_excluded_from_queries() {
        let store = GraphStore::in_memory().unwrap();
        let a = entity("a.rs:module:a", "a", "a.rs", 1);
        store.upsert_entities(&[a.clone()]).unwrap();
        let rel = Relationship::new(a.id.clone(), "external:some_crate".to_string(), RelationshipType::Imports);
        store.upsert_relationships(&[rel]).unwrap();

        assert!(store
            .get_relationships_for_entity(&a.id, Direction::Outgoing, None)
            .unwrap()
            .is_empty());
        assert!(store.all_relationships().unwrap().is_empty());
    }
}
