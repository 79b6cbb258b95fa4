//! Embedded dense-vector store.
//!
//! Persists into the same SQLite file the Graph Store uses (`vectors.db`):
//! a second `rusqlite::Connection` onto the same WAL-mode database, guarded
//! by its own `parking_lot::Mutex` for the serial-writer discipline the
//! specification calls for. Similarity search is a brute-force cosine scan,
//! parallelized with `rayon` once the corpus is large enough to matter —
//! there's no ANN index here, matching "in-process, parallelized for larger
//! corpora" rather than an external vector database.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parallelize the similarity scan once the corpus crosses this size;
/// below it the overhead of rayon's work-stealing isn't worth paying.
const PARALLEL_SCAN_THRESHOLD: usize = 2_000;

/// Metadata carried alongside a vector, used for the `filter` argument to
/// `search` and for hybrid-ranking path comparisons.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub path: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub language: String,
}

/// One entity's dense-vector record. `vector` may be unnormalized on
/// insert; normalization happens at comparison time.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub entity_id: String,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// A single similarity search result.
#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub entity_id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Optional constraints narrowing a `search` call.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub entity_type: Option<String>,
    pub language: Option<String>,
    pub path_prefix: Option<String>,
}

impl VectorFilter {
    fn matches(&self, meta: &VectorMetadata) -> bool {
        if let Some(ref t) = self.entity_type {
            if &meta.entity_type != t {
                return false;
            }
        }
        if let Some(ref l) = self.language {
            if &meta.language != l {
                return false;
            }
        }
        if let Some(ref prefix) = self.path_prefix {
            if !meta.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

pub struct VectorStore {
    conn: Mutex<Connection>,
}

impl VectorStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize_conn(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_conn(conn)
    }

    fn initialize_conn(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS vectors (
                entity_id TEXT PRIMARY KEY,
                dim INTEGER NOT NULL,
                vector BLOB NOT NULL,
                path TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                name TEXT NOT NULL,
                language TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_vectors_path ON vectors(path)",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// No-op beyond opening the connection; kept as an explicit lifecycle
    /// step mirroring the spec's `initialize` operation so callers have a
    /// point to await before the first write.
    pub fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Batched upsert. The spec calls for writes batched at >=64 records to
    /// amortize I/O; smaller batches still work, just less efficiently.
    pub fn insert_batch(&self, records: &[VectorRecord]) -> Result<()> {
        let conn = self.conn.lock();
        let tx_conn = conn.unchecked_transaction()?;
        {
            let mut stmt = tx_conn.prepare_cached(
                "INSERT OR REPLACE INTO vectors
                 (entity_id, dim, vector, path, entity_type, name, language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for record in records {
                let bytes = vector_to_bytes(&record.vector);
                stmt.execute(params![
                    record.entity_id,
                    record.vector.len() as i64,
                    bytes,
                    record.metadata.path,
                    record.metadata.entity_type,
                    record.metadata.name,
                    record.metadata.language,
                ])?;
            }
        }
        tx_conn.commit()?;
        Ok(())
    }

    /// Single-record upsert, idempotent like `insert_batch`.
    pub fn update(&self, entity_id: &str, vector: &[f32], metadata: VectorMetadata) -> Result<()> {
        self.insert_batch(&[VectorRecord {
            entity_id: entity_id.to_string(),
            vector: vector.to_vec(),
            metadata,
        }])
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Cosine top-k over every stored vector matching `filter`.
    pub fn search(&self, query: &[f32], limit: usize, filter: Option<&VectorFilter>) -> Result<Vec<VectorHit>> {
        let rows = self.all_records()?;
        let query_norm = l2_normalize(query);

        let filtered: Vec<&(String, Vec<f32>, VectorMetadata)> = rows
            .iter()
            .filter(|(_, _, meta)| filter.map(|f| f.matches(meta)).unwrap_or(true))
            .collect();

        let mut scored: Vec<VectorHit> = if filtered.len() >= PARALLEL_SCAN_THRESHOLD {
            filtered
                .par_iter()
                .map(|(id, vec, meta)| VectorHit {
                    entity_id: id.clone(),
                    score: cosine(&query_norm, vec),
                    metadata: meta.clone(),
                })
                .collect()
        } else {
            filtered
                .iter()
                .map(|(id, vec, meta)| VectorHit {
                    entity_id: id.clone(),
                    score: cosine(&query_norm, vec),
                    metadata: meta.clone(),
                })
                .collect()
        };

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    fn all_records(&self) -> Result<Vec<(String, Vec<f32>, VectorMetadata)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT entity_id, vector, path, entity_type, name, language FROM vectors")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            let meta = VectorMetadata {
                path: row.get(2)?,
                entity_type: row.get(3)?,
                name: row.get(4)?,
                language: row.get(5)?,
            };
            Ok((id, bytes_to_vector(&bytes), meta))
        })?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    pub fn get(&self, entity_id: &str) -> Result<Option<VectorRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT vector, path, entity_type, name, language FROM vectors WHERE entity_id = ?1",
            params![entity_id],
            |row| {
                let bytes: Vec<u8> = row.get(0)?;
                Ok(VectorRecord {
                    entity_id: entity_id.to_string(),
                    vector: bytes_to_vector(&bytes),
                    metadata: VectorMetadata {
                        path: row.get(1)?,
                        entity_type: row.get(2)?,
                        name: row.get(3)?,
                        language: row.get(4)?,
                    },
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn delete(&self, entity_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM vectors WHERE entity_id = ?1", params![entity_id])?;
        Ok(())
    }

    /// Removes every vector whose `path` matches, mirroring the graph
    /// store's `deleteByFile` so a re-index pass retires stale embeddings.
    pub fn delete_by_path(&self, path: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM vectors WHERE path = ?1", params![path])?;
        Ok(removed)
    }
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

fn cosine(normalized_query: &[f32], candidate: &[f32]) -> f32 {
    let candidate_norm = l2_normalize(candidate);
    let len = normalized_query.len().min(candidate_norm.len());
    (0..len).map(|i| normalized_query[i] * candidate_norm[i]).sum()
}

/// Aggregate counts for `get_graph_stats`/`get_metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VectorMetrics {
    pub total_vectors: usize,
    pub by_language: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, path: &str) -> VectorRecord {
        VectorRecord {
            entity_id: id.to_string(),
            vector,
            metadata: VectorMetadata {
                path: path.to_string(),
                entity_type: "function".to_string(),
                name: id.to_string(),
                language: "rust".to_string(),
            },
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = VectorStore::in_memory().unwrap();
        store.insert_batch(&[record("a", vec![1.0, 0.0, 0.0], "a.rs")]).unwrap();
        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched.vector, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let store = VectorStore::in_memory().unwrap();
        store
            .insert_batch(&[
                record("close", vec![1.0, 0.0, 0.0], "a.rs"),
                record("far", vec![0.0, 1.0, 0.0], "b.rs"),
            ])
            .unwrap();
        let hits = store.search(&[1.0, 0.0, 0.0], 10, None).unwrap();
        assert_eq!(hits[0].entity_id, "close");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn search_respects_filter() {
        let store = VectorStore::in_memory().unwrap();
        store
            .insert_batch(&[
                record("a", vec![1.0, 0.0], "src/a.rs"),
                record("b", vec![1.0, 0.0], "tests/b.rs"),
            ])
            .unwrap();
        let filter = VectorFilter {
            path_prefix: Some("src/".to_string()),
            ..Default::default()
        };
        let hits = store.search(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, "a");
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = VectorStore::in_memory().unwrap();
        store.insert_batch(&[record("a", vec![1.0, 0.0], "a.rs")]).unwrap();
        store.insert_batch(&[record("a", vec![0.0, 1.0], "a.rs")]).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("a").unwrap().unwrap().vector, vec![0.0, 1.0]);
    }

    #[test]
    fn delete_by_path_removes_matching_records() {
        let store = VectorStore::in_memory().unwrap();
        store.insert_batch(&[record("a", vec![1.0, 0.0], "a.rs")]).unwrap();
        let removed = store.delete_by_path("a.rs").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().unwrap(), 0);
    }
}
