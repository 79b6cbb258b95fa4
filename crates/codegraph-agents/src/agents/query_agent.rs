//! Query Agent: orchestrates Graph Store queries and traversals for every
//! structural tool, and serves the hybrid `query` tool by fusing a
//! structural file set with a semantic search over the Vector Store.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use codegraph_core::model::{EntityType, RelationshipType};
use codegraph_graph::{resolve_entity_candidates, Direction as StoreDirection, EntityFilter, GraphStore, GraphView};
use codegraph_vector::{rerank_semantic_hits, EmbeddingProvider, SemanticCache, VectorFilter, VectorStore};
use petgraph::Direction as PetDirection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{spawn_resize_listener, Agent, AgentRuntime, AgentStatus, Capabilities, Task, TaskResult};
use crate::bus::KnowledgeBus;
use crate::error::{AgentError, Result};

#[derive(Debug, Deserialize)]
struct ListFileEntitiesRequest {
    file_path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ListEntityRelationshipsRequest {
    entity_id: String,
    #[serde(default = "default_depth")]
    depth: usize,
    #[serde(default)]
    relationship_types: Vec<String>,
    #[serde(default)]
    direction: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveEntityRequest {
    name: String,
    file_path_hint: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct GetEntitySourceRequest {
    entity_id: String,
    #[serde(default)]
    context_lines: usize,
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct QueryFilters {
    #[serde(default)]
    entity_type: Vec<String>,
    #[serde(default)]
    file_path: Vec<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    filters: QueryFilters,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct GetGraphRequest {
    root_id: Option<String>,
    #[serde(default = "default_depth")]
    depth: usize,
}

fn default_limit() -> usize {
    20
}

fn default_depth() -> usize {
    1
}

/// Additive name-resolution score: exact name match outweighs substring,
/// a caller-supplied file-path hint adds on top (exact file beats same
/// directory), and a tiny positional tiebreaker keeps ordering stable.
fn hint_score(name: &str, file_path: &str, query: &str, file_path_hint: Option<&str>, position: usize) -> f64 {
    let mut score = 0.0;
    if name.eq_ignore_ascii_case(query) {
        score += 100.0;
    } else if name.to_lowercase().contains(&query.to_lowercase()) {
        score += 50.0;
    }
    if let Some(hint) = file_path_hint {
        if file_path == hint {
            score += 60.0;
        } else {
            let hint_dir = std::path::Path::new(hint).parent();
            let file_dir = std::path::Path::new(file_path).parent();
            if hint_dir.is_some() && hint_dir == file_dir {
                score += 20.0;
            }
        }
    }
    score - (position as f64 * 0.001)
}

pub struct QueryAgent {
    runtime: AgentRuntime,
    graph: Arc<GraphStore>,
    vector_store: Option<Arc<VectorStore>>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    semantic_cache: Arc<SemanticCache>,
    workspace_root: PathBuf,
    bus: Arc<KnowledgeBus>,
}

impl QueryAgent {
    pub fn new(
        id: impl Into<String>,
        graph: Arc<GraphStore>,
        vector_store: Option<Arc<VectorStore>>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        workspace_root: PathBuf,
        bus: Arc<KnowledgeBus>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, "query", capabilities),
            graph,
            vector_store,
            embeddings,
            semantic_cache: Arc::new(SemanticCache::default()),
            workspace_root,
            bus,
        }
    }

    /// Subscribes to the Resource Governor's `resources:adjusted` event and
    /// resizes `maxConcurrency` in response.
    pub fn spawn_resize_listener(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bus = self.bus.clone();
        spawn_resize_listener(bus, move |limit| self.runtime.resize_concurrency(limit))
    }

    fn list_file_entities(&self, req: ListFileEntitiesRequest) -> Result<serde_json::Value> {
        let (entities, total) = self.graph.list_file_entities(&req.file_path, req.offset, req.limit)?;
        Ok(json!({ "items": entities, "total": total }))
    }

    fn list_entity_relationships(&self, req: ListEntityRelationshipsRequest) -> Result<serde_json::Value> {
        let depth = req.depth.clamp(1, 10);
        let pet_direction = match req.direction.as_deref() {
            Some("incoming") => PetDirection::Incoming,
            _ => PetDirection::Outgoing,
        };
        let view = GraphView::build(&self.graph)?;
        let nodes = view.neighborhood(&req.entity_id, depth, pet_direction);

        let rel_types: Vec<RelationshipType> = req
            .relationship_types
            .iter()
            .filter_map(|s| RelationshipType::parse(s))
            .collect();
        let store_direction = match req.direction.as_deref() {
            Some("incoming") => StoreDirection::Incoming,
            Some("both") => StoreDirection::Both,
            _ => StoreDirection::Outgoing,
        };
        let mut edges = self.graph.get_relationships_for_entity(&req.entity_id, store_direction, None)?;
        if !rel_types.is_empty() {
            edges.retain(|r| rel_types.contains(&r.relationship_type));
        }
        let mut seen = HashSet::new();
        edges.retain(|r| seen.insert((r.from_id.clone(), r.to_id.clone(), r.relationship_type)));

        Ok(json!({ "nodes": nodes, "relationships": edges, "depth": depth }))
    }

    fn resolve_entity(&self, req: ResolveEntityRequest) -> Result<serde_json::Value> {
        let fuzzy = resolve_entity_candidates(&self.graph, &req.name, req.limit * 2)?;
        let mut scored: Vec<(f64, codegraph_core::model::Entity)> = fuzzy
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let score = hint_score(&c.entity.name, &c.entity.file_path, &req.name, req.file_path_hint.as_deref(), i)
                    + c.score * 10.0;
                (score, c.entity)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(req.limit);

        let candidates: Vec<_> = scored
            .into_iter()
            .map(|(score, entity)| json!({ "entity": entity, "score": score }))
            .collect();
        Ok(json!({ "candidates": candidates }))
    }

    fn get_entity_source(&self, req: GetEntitySourceRequest) -> Result<serde_json::Value> {
        let entity = self.graph.require_entity(&req.entity_id)?;
        let abs_path = self.workspace_root.join(&entity.file_path);
        let content = std::fs::read_to_string(&abs_path)?;
        let lines: Vec<&str> = content.lines().collect();
        let start = entity.location.start.line.saturating_sub(1 + req.context_lines);
        let end = (entity.location.end.line + req.context_lines).min(lines.len());
        let snippet = lines.get(start..end).unwrap_or(&[]).join("\n");
        Ok(json!({ "entity": entity, "source": snippet }))
    }

    fn entity_filter(filters: &QueryFilters, fallback_name: &str) -> EntityFilter {
        EntityFilter {
            entity_type: filters.entity_type.first().and_then(|s| EntityType::parse(s)),
            name_contains: filters.name.clone().or_else(|| Some(fallback_name.to_string())),
            file_prefix: filters.file_path.first().cloned(),
        }
    }

    async fn query(&self, req: QueryRequest) -> Result<serde_json::Value> {
        let filter = Self::entity_filter(&req.filters, &req.query);
        let (structural_entities, structural_total) = self.graph.query_entities(&filter, req.offset, req.limit)?;
        let structural_items: Vec<_> = structural_entities
            .iter()
            .map(|e| {
                let match_type = if e.name.eq_ignore_ascii_case(&req.query) { "exact" } else { "substring" };
                json!({ "entity": e, "matchType": match_type })
            })
            .collect();

        let mut semantic_items = Vec::new();
        if let (Some(store), Some(provider)) = (&self.vector_store, &self.embeddings) {
            let broad_filter = EntityFilter {
                file_prefix: filter.file_prefix.clone(),
                ..Default::default()
            };
            let (structural_entities_broad, _) = self.graph.query_entities(&broad_filter, 0, 500)?;
            let structural_set: HashSet<String> = structural_entities_broad
                .into_iter()
                .map(|e| e.file_path.replace('\\', "/"))
                .collect();

            let filter_digest = serde_json::to_string(&req.filters).unwrap_or_default();
            let cache_key = SemanticCache::key(&req.query, &filter_digest);
            let hits = if let Some(cached) = self.semantic_cache.get(&cache_key) {
                cached
            } else {
                let embedding = provider.generate_code_embedding(&req.query).await?;
                let vfilter = VectorFilter {
                    entity_type: None,
                    language: None,
                    path_prefix: req.filters.file_path.first().cloned(),
                };
                let raw = store.search(&embedding, req.limit, Some(&vfilter))?;
                let reranked = rerank_semantic_hits(raw, &structural_set);
                self.semantic_cache.put(cache_key, reranked.clone());
                reranked
            };
            semantic_items = hits
                .into_iter()
                .map(|h| {
                    let match_type = if h.structural_boost > 0.0 { "hybrid" } else { "semantic" };
                    json!({ "hit": h, "matchType": match_type })
                })
                .collect();
        }

        Ok(json!({
            "structural": { "items": structural_items, "total": structural_total },
            "semantic": { "items": semantic_items },
        }))
    }

    fn get_graph(&self, req: GetGraphRequest) -> Result<serde_json::Value> {
        let view = GraphView::build(&self.graph)?;
        match req.root_id {
            Some(root) => {
                let depth = req.depth.clamp(1, 10);
                let nodes = view.neighborhood(&root, depth, PetDirection::Outgoing);
                Ok(json!({
                    "nodes": nodes,
                    "entityCount": view.entity_count(),
                    "relationshipCount": view.relationship_count(),
                }))
            }
            None => {
                let entities = self.graph.all_entities()?;
                let relationships = self.graph.all_relationships()?;
                Ok(json!({ "entities": entities, "relationships": relationships }))
            }
        }
    }
}

#[async_trait]
impl Agent for QueryAgent {
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
        matches!(
            task.kind.as_str(),
            "list_file_entities" | "list_entity_relationships" | "resolve_entity" | "get_entity_source" | "query" | "get_graph"
        )
    }

    fn resize_concurrency(&self, max_concurrency: usize) {
        self.runtime.resize_concurrency(max_concurrency);
    }

    async fn process(&self, task: Task) -> Result<TaskResult> {
        let _permit = self.runtime.try_acquire()?;
        let started = Instant::now();

        let data = match task.kind.as_str() {
            "list_file_entities" => self.list_file_entities(serde_json::from_value(task.payload.clone())?)?,
            "list_entity_relationships" => {
                self.list_entity_relationships(serde_json::from_value(task.payload.clone())?)?
            }
            "resolve_entity" => self.resolve_entity(serde_json::from_value(task.payload.clone())?)?,
            "get_entity_source" => self.get_entity_source(serde_json::from_value(task.payload.clone())?)?,
            "query" => self.query(serde_json::from_value(task.payload.clone())?).await?,
            "get_graph" => self.get_graph(serde_json::from_value(task.payload.clone())?)?,
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
    use codegraph_core::model::{Entity, Location, Point};
    use std::collections::HashMap;

    fn entity(id: &str, name: &str, file: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: EntityType::Function,
            file_path: file.to_string(),
            location: Location {
                start: Point { line: 1, col: 0, index: 0 },
                end: Point { line: 2, col: 0, index: 5 },
            },
            content_hash: "h".to_string(),
            metadata: HashMap::new(),
        }
    }

    fn agent() -> QueryAgent {
        let graph = Arc::new(GraphStore::in_memory().unwrap());
        graph.upsert_entities(&[entity("a.rs:function:add", "add", "a.rs")]).unwrap();
        QueryAgent::new("query-1", graph, None, None, PathBuf::from("."), KnowledgeBus::new(), Capabilities::default())
    }

    #[test]
    fn resolve_entity_scores_exact_match_highest() {
        let agent = agent();
        let result = agent
            .resolve_entity(ResolveEntityRequest { name: "add".to_string(), file_path_hint: None, limit: 5 })
            .unwrap();
        let candidates = result["candidates"].as_array().unwrap();
        assert_eq!(candidates[0]["entity"]["name"], "add");
    }

    #[test]
    fn list_file_entities_returns_total_count() {
        let agent = agent();
        let result = agent
            .list_file_entities(ListFileEntitiesRequest { file_path: "a.rs".to_string(), offset: 0, limit: 10 })
            .unwrap();
        assert_eq!(result["total"], 1);
    }

    #[tokio::test]
    async fn can_handle_matches_query_agent_task_kinds() {
        let agent = agent();
        assert!(agent.can_handle(&Task::new("1", "query", json!({}))));
        assert!(!agent.can_handle(&Task::new("1", "semantic_search", json!({}))));
    }

    #[tokio::test]
    async fn query_without_vector_store_returns_empty_semantic_items() {
        let agent = agent();
        let result = agent
            .query(QueryRequest { query: "add".to_string(), filters: QueryFilters::default(), offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(result["semantic"]["items"].as_array().unwrap().len(), 0);
        assert_eq!(result["structural"]["total"], 1);
    }
}
