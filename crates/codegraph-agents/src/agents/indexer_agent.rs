//! Indexer (Dev) Agent: walks a workspace, drives the Parser Agent over
//! every surviving file, and upserts the results into the Graph Store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use codegraph_core::merkle::{ExclusionFilter, MerkleTree, MerkleTreeManager};
use codegraph_graph::GraphStore;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use crate::agent::{spawn_resize_listener, Agent, AgentRuntime, AgentStatus, Capabilities, Task, TaskResult};
use crate::agents::parser_agent::ParserAgent;
use crate::bus::KnowledgeBus;
use crate::error::{AgentError, Result};

#[derive(Debug, Deserialize, Default)]
struct IndexRequest {
    workspace_path: String,
    #[serde(default)]
    exclude_patterns: Vec<String>,
    #[serde(default)]
    full_reindex: bool,
}

pub struct IndexerAgent {
    runtime: AgentRuntime,
    parser: Arc<ParserAgent>,
    graph: Arc<GraphStore>,
    bus: Arc<KnowledgeBus>,
    last_tree: Mutex<Option<MerkleTree>>,
}

impl IndexerAgent {
    pub fn new(
        id: impl Into<String>,
        parser: Arc<ParserAgent>,
        graph: Arc<GraphStore>,
        bus: Arc<KnowledgeBus>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, "indexer", capabilities),
            parser,
            graph,
            bus,
            last_tree: Mutex::new(None),
        }
    }

    fn run_index(&self, req: &IndexRequest) -> Result<serde_json::Value> {
        let workspace = PathBuf::from(&req.workspace_path);
        let patterns: Vec<&str> = req.exclude_patterns.iter().map(String::as_str).collect();
        let filter = ExclusionFilter::new(if patterns.is_empty() { None } else { Some(&patterns) }, true);
        let manager = MerkleTreeManager::new(filter);

        let new_tree = manager.build_merkle_tree(&workspace)?;
        let mut last_tree = self.last_tree.lock();
        let baseline = if req.full_reindex { None } else { last_tree.clone() };
        let changes = manager.detect_changes(baseline.as_ref().unwrap_or(&MerkleTree::new()), &new_tree);

        let mut files_processed = 0usize;
        let mut entities_indexed = 0usize;
        let mut relationships_created = 0usize;
        let mut touched_files: Vec<String> = Vec::new();

        for rel_path in changes.files_to_process() {
            let abs_path = workspace.join(rel_path);
            let Ok(content) = std::fs::read_to_string(&abs_path) else {
                continue;
            };
            let result = self.parser.parse_one(rel_path, &content);
            self.graph.upsert_entities(&result.entities)?;
            self.graph.upsert_relationships(&result.relationships)?;
            entities_indexed += result.entities.len();
            relationships_created += result.relationships.len();
            files_processed += 1;
            touched_files.push(rel_path.to_string());
        }

        for rel_path in &changes.deleted {
            self.graph.delete_by_file(rel_path)?;
            files_processed += 1;
            touched_files.push(rel_path.clone());
        }

        *last_tree = Some(new_tree);
        drop(last_tree);

        let stats = json!({
            "filesProcessed": files_processed,
            "entitiesIndexed": entities_indexed,
            "relationshipsCreated": relationships_created,
            "deleted": changes.deleted.len(),
            "files": touched_files,
        });
        self.bus.publish("index:complete", stats.clone());
        Ok(stats)
    }

    /// Removes every entity/relationship for the workspace, leaving the
    /// Indexer's own in-memory tree baseline cleared so the next `index`
    /// call treats everything as newly added.
    pub fn reset(&self) -> Result<()> {
        self.graph.reset()?;
        *self.last_tree.lock() = None;
        self.bus.publish("graph:reset", json!({}));
        Ok(())
    }

    /// Clears the parse cache and resets the graph: a clean slate short of
    /// deleting the persisted database file itself.
    pub fn clean_index(&self, cache: &codegraph_core::ParseCache) -> Result<()> {
        cache.clear();
        self.reset()
    }

    /// Subscribes to the Resource Governor's `resources:adjusted` event and
    /// resizes `maxConcurrency` in response.
    pub fn spawn_resize_listener(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bus = self.bus.clone();
        spawn_resize_listener(bus, move |limit| self.runtime.resize_concurrency(limit))
    }
}

#[async_trait]
impl Agent for IndexerAgent {
    fn id(&self) -> &str {
        &self.runtime.id
    }

    fn agent_type(&self) -> &'static str {
        self.runtime.agent_type
    }

    fn status(&self) -> AgentStatus {
        self.runtime.status()
    }

    fn capabilities(&self) -> Capabilities {
        self.runtime.capabilities()
    }

    fn can_handle(&self, task: &Task) -> bool {
        matches!(task.kind.as_str(), "index" | "reset_graph" | "clean_index")
    }

    fn resize_concurrency(&self, max_concurrency: usize) {
        self.runtime.resize_concurrency(max_concurrency);
    }

    async fn process(&self, task: Task) -> Result<TaskResult> {
        let _permit = self.runtime.try_acquire()?;
        let started = Instant::now();

        let data = match task.kind.as_str() {
            "index" => {
                let req: IndexRequest = serde_json::from_value(task.payload.clone())?;
                self.run_index(&req)?
            }
            "reset_graph" => {
                self.reset()?;
                json!({ "reset": true })
            }
            "clean_index" => {
                self.clean_index(self.parser.cache())?;
                json!({ "cleaned": true })
            }
            other => return Err(AgentError::CannotHandle(other.to_string())),
        };

        Ok(TaskResult {
            task_id: task.id,
            data,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Capabilities;
    use codegraph_core::ParseCache;

    fn agent() -> (IndexerAgent, Arc<KnowledgeBus>) {
        let bus = KnowledgeBus::new();
        let cache = Arc::new(ParseCache::default());
        let parser = Arc::new(ParserAgent::new("parser-1", cache, bus.clone(), Capabilities::default()));
        let graph = Arc::new(GraphStore::in_memory().unwrap());
        let agent = IndexerAgent::new("indexer-1", parser, graph, bus.clone(), Capabilities::default());
        (agent, bus)
    }

    #[test]
    fn run_index_publishes_touched_files_for_the_backfill_listener() {
        let (agent, bus) = agent();
        let mut rx = bus.subscribe("index:complete");

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn add(a: i32, b: i32) -> i32 { a + b }").unwrap();

        let req = IndexRequest {
            workspace_path: dir.path().to_string_lossy().to_string(),
            exclude_patterns: Vec::new(),
            full_reindex: true,
        };
        let stats = agent.run_index(&req).unwrap();
        assert_eq!(stats["filesProcessed"], 1);

        let event = rx.try_recv().expect("index:complete should have been published");
        let files = event.payload["files"].as_array().expect("payload must carry a files array");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0], "a.rs");
    }

    #[test]
    fn run_index_publishes_deleted_files_too() {
        let (agent, bus) = agent();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.rs");
        std::fs::write(&file_path, "fn add() {}").unwrap();

        let req = IndexRequest {
            workspace_path: dir.path().to_string_lossy().to_string(),
            exclude_patterns: Vec::new(),
            full_reindex: true,
        };
        agent.run_index(&req).unwrap();

        std::fs::remove_file(&file_path).unwrap();
        let mut rx = bus.subscribe("index:complete");
        let incremental = IndexRequest {
            workspace_path: req.workspace_path.clone(),
            exclude_patterns: Vec::new(),
            full_reindex: false,
        };
        let stats = agent.run_index(&incremental).unwrap();
        assert_eq!(stats["deleted"], 1);

        let event = rx.try_recv().unwrap();
        let files = event.payload["files"].as_array().unwrap();
        assert!(files.iter().any(|f| f == "a.rs"));
    }
}
