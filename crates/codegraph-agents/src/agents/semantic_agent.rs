//! Semantic Agent: owns the Embedding Provider and Vector Store, serves every
//! semantic/hybrid tool, and backfills embeddings for newly indexed entities
//! by listening for `"index:complete"` on the Knowledge Bus.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use codegraph_core::model::Entity;
use codegraph_graph::{EntityFilter, GraphStore, GraphView};
use codegraph_vector::{
    rerank_semantic_hits, EmbeddingProvider, SemanticCache, VectorFilter, VectorMetadata, VectorRecord, VectorStore,
};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::agent::{spawn_resize_listener, Agent, AgentRuntime, AgentStatus, Capabilities, Task, TaskResult};
use crate::bus::KnowledgeBus;
use crate::error::{AgentError, Result};

/// Default similarity threshold `detect_code_clones` groups entities above,
/// chosen to catch near-duplicate bodies without flagging every function
/// that merely shares a common shape.
const DEFAULT_CLONE_THRESHOLD: f32 = 0.65;

#[derive(Debug, Deserialize, Default)]
struct SemanticFilters {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    path_prefix: Option<String>,
}

impl SemanticFilters {
    fn to_vector_filter(&self) -> VectorFilter {
        VectorFilter {
            entity_type: self.entity_type.clone(),
            language: self.language.clone(),
            path_prefix: self.path_prefix.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SemanticSearchRequest {
    query: String,
    #[serde(default)]
    filters: SemanticFilters,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct FindSimilarCodeRequest {
    entity_id: Option<String>,
    code: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct AnalyzeCodeImpactRequest {
    entity_id: String,
    #[serde(default = "default_depth")]
    max_depth: usize,
}

#[derive(Debug, Deserialize)]
struct DetectCodeClonesRequest {
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    path_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuggestRefactoringRequest {
    entity_id: String,
}

#[derive(Debug, Deserialize)]
struct CrossLanguageSearchRequest {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct AnalyzeHotspotsRequest {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct FindRelatedConceptsRequest {
    entity_id: Option<String>,
    query: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

fn default_depth() -> usize {
    3
}

pub struct SemanticAgent {
    runtime: AgentRuntime,
    graph: Arc<GraphStore>,
    vector_store: Arc<VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    semantic_cache: Arc<SemanticCache>,
    bus: Arc<KnowledgeBus>,
    clone_threshold: f32,
}

impl SemanticAgent {
    pub fn new(
        id: impl Into<String>,
        graph: Arc<GraphStore>,
        vector_store: Arc<VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        bus: Arc<KnowledgeBus>,
        clone_threshold: Option<f32>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, "semantic", capabilities),
            graph,
            vector_store,
            embeddings,
            semantic_cache: Arc::new(SemanticCache::default()),
            bus,
            clone_threshold: clone_threshold.unwrap_or(DEFAULT_CLONE_THRESHOLD),
        }
    }

    /// Embeds and upserts the source text of every entity belonging to
    /// `file_paths`. Called directly for the `embed` task kind, and spawned
    /// as a background listener reacting to `"index:complete"` events so a
    /// freshly indexed file gets semantic coverage without a separate tool
    /// call from the caller.
    async fn backfill(&self, file_paths: &[String]) -> Result<usize> {
        let mut records = Vec::new();
        for path in file_paths {
            let (entities, _) = self.graph.list_file_entities(path, 0, 10_000)?;
            let texts: Vec<String> = entities.iter().map(|e| format!("{} {}", e.name, e.file_path)).collect();
            if texts.is_empty() {
                continue;
            }
            let vectors = self.embeddings.generate_batch(texts).await?;
            for (entity, vector) in entities.into_iter().zip(vectors.into_iter()) {
                records.push(VectorRecord {
                    entity_id: entity.id,
                    vector,
                    metadata: VectorMetadata {
                        path: entity.file_path,
                        entity_type: entity.entity_type.as_str().to_string(),
                        name: entity.name,
                        language: language_for_path(path),
                    },
                });
            }
        }
        let count = records.len();
        if !records.is_empty() {
            self.vector_store.insert_batch(&records)?;
        }
        Ok(count)
    }

    async fn structural_set(&self, path_prefix: Option<&str>) -> Result<HashSet<String>> {
        let filter = EntityFilter {
            file_prefix: path_prefix.map(str::to_string),
            ..Default::default()
        };
        let (entities, _) = self.graph.query_entities(&filter, 0, 5000)?;
        Ok(entities.into_iter().map(|e| e.file_path.replace('\\', "/")).collect())
    }

    async fn semantic_search(&self, req: SemanticSearchRequest) -> Result<serde_json::Value> {
        let filter_digest = serde_json::to_string(&req.filters).unwrap_or_default();
        let cache_key = SemanticCache::key(&req.query, &filter_digest);
        if let Some(cached) = self.semantic_cache.get(&cache_key) {
            return Ok(json!({ "hits": cached, "fromCache": true }));
        }

        let embedding = self.embeddings.generate_code_embedding(&req.query).await?;
        let vfilter = req.filters.to_vector_filter();
        let raw = self.vector_store.search(&embedding, req.limit, Some(&vfilter))?;
        let structural_set = self.structural_set(req.filters.path_prefix.as_deref()).await?;
        let hits = rerank_semantic_hits(raw, &structural_set);
        self.semantic_cache.put(cache_key, hits.clone());
        Ok(json!({ "hits": hits, "fromCache": false }))
    }

    async fn find_similar_code(&self, req: FindSimilarCodeRequest) -> Result<serde_json::Value> {
        let vector = self.reference_vector(req.entity_id.as_deref(), req.code.as_deref()).await?;
        let raw = self.vector_store.search(&vector, req.limit + 1, None)?;
        let filtered: Vec<_> = raw.into_iter().filter(|h| Some(h.entity_id.as_str()) != req.entity_id.as_deref()).collect();
        Ok(json!({ "hits": filtered.into_iter().take(req.limit).collect::<Vec<_>>() }))
    }

    async fn reference_vector(&self, entity_id: Option<&str>, code: Option<&str>) -> Result<Vec<f32>> {
        if let Some(id) = entity_id {
            if let Some(record) = self.vector_store.get(id)? {
                return Ok(record.vector);
            }
            let entity = self.graph.require_entity(id)?;
            return Ok(self.embeddings.generate_code_embedding(&entity.name).await?);
        }
        if let Some(code) = code {
            return Ok(self.embeddings.generate_code_embedding(code).await?);
        }
        Err(AgentError::CannotHandle("entity_id or code is required".to_string()))
    }

    fn analyze_code_impact(&self, req: AnalyzeCodeImpactRequest) -> Result<serde_json::Value> {
        let view = GraphView::build(&self.graph)?;
        let report = view.impact_analysis(&req.entity_id, req.max_depth.clamp(1, 10));
        Ok(serde_json::to_value(report)?)
    }

    async fn detect_code_clones(&self, req: DetectCodeClonesRequest) -> Result<serde_json::Value> {
        let threshold = req.threshold.unwrap_or(self.clone_threshold);
        let filter = EntityFilter {
            file_prefix: req.path_prefix.clone(),
            ..Default::default()
        };
        let (entities, _) = self.graph.query_entities(&filter, 0, 5000)?;

        let mut vectors: Vec<(Entity, Vec<f32>)> = Vec::new();
        for entity in entities {
            if let Some(record) = self.vector_store.get(&entity.id)? {
                vectors.push((entity, record.vector));
            }
        }

        let mut clusters: Vec<Vec<String>> = Vec::new();
        let mut assigned: HashSet<String> = HashSet::new();
        for i in 0..vectors.len() {
            if assigned.contains(&vectors[i].0.id) {
                continue;
            }
            let mut cluster = vec![vectors[i].0.id.clone()];
            for j in (i + 1)..vectors.len() {
                if assigned.contains(&vectors[j].0.id) {
                    continue;
                }
                if cosine_similarity(&vectors[i].1, &vectors[j].1) >= threshold {
                    cluster.push(vectors[j].0.id.clone());
                    assigned.insert(vectors[j].0.id.clone());
                }
            }
            if cluster.len() > 1 {
                assigned.insert(vectors[i].0.id.clone());
                clusters.push(cluster);
            }
        }

        Ok(json!({ "clusters": clusters, "threshold": threshold }))
    }

    fn suggest_refactoring(&self, req: SuggestRefactoringRequest) -> Result<serde_json::Value> {
        let entity = self.graph.require_entity(&req.entity_id)?;
        let view = GraphView::build(&self.graph)?;
        let report = view.impact_analysis(&req.entity_id, 1);
        let fan_in = report.direct_dependents.len();
        let fan_out = report.direct_dependencies.len();
        let span = entity.location.end.line.saturating_sub(entity.location.start.line);

        let mut suggestions = Vec::new();
        if span > 200 {
            suggestions.push("consider splitting this entity; its body spans over 200 lines".to_string());
        }
        if fan_in > 20 {
            suggestions.push(format!("high fan-in ({fan_in} dependents); changes here carry broad blast radius"));
        }
        if fan_out > 20 {
            suggestions.push(format!("high fan-out ({fan_out} dependencies); consider narrowing its responsibilities"));
        }
        if suggestions.is_empty() {
            suggestions.push("no structural red flags found".to_string());
        }

        Ok(json!({ "entity": entity, "fanIn": fan_in, "fanOut": fan_out, "suggestions": suggestions }))
    }

    async fn cross_language_search(&self, req: CrossLanguageSearchRequest) -> Result<serde_json::Value> {
        let embedding = self.embeddings.generate_code_embedding(&req.query).await?;
        let hits = self.vector_store.search(&embedding, req.limit, None)?;
        let mut by_language: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for hit in &hits {
            *by_language.entry(hit.metadata.language.clone()).or_insert(0) += 1;
        }
        Ok(json!({ "hits": hits, "languageBreakdown": by_language }))
    }

    fn analyze_hotspots(&self, req: AnalyzeHotspotsRequest) -> Result<serde_json::Value> {
        let view = GraphView::build(&self.graph)?;
        let entities = self.graph.all_entities()?;
        let mut scored: Vec<(Entity, usize)> = entities
            .into_iter()
            .map(|e| {
                let report = view.impact_analysis(&e.id, 1);
                let weight = report.direct_dependents.len() + report.direct_dependencies.len();
                (e, weight)
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(req.limit);
        let hotspots: Vec<_> = scored
            .into_iter()
            .map(|(entity, weight)| json!({ "entity": entity, "connections": weight }))
            .collect();
        Ok(json!({ "hotspots": hotspots }))
    }

    async fn find_related_concepts(&self, req: FindRelatedConceptsRequest) -> Result<serde_json::Value> {
        let vector = self.reference_vector(req.entity_id.as_deref(), req.query.as_deref()).await?;
        let raw = self.vector_store.search(&vector, req.limit + 1, None)?;
        let filtered: Vec<_> = raw.into_iter().filter(|h| Some(h.entity_id.as_str()) != req.entity_id.as_deref()).collect();
        Ok(json!({ "concepts": filtered.into_iter().take(req.limit).collect::<Vec<_>>() }))
    }

    /// Spawns the background task that keeps the Vector Store in sync with
    /// the Graph Store: every `"index:complete"` event names the files that
    /// changed, and we embed just those.
    pub fn spawn_backfill_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe("index:complete");
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(files) = event.payload.get("files").and_then(|v| v.as_array()) else {
                    continue;
                };
                let paths: Vec<String> = files.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
                if paths.is_empty() {
                    continue;
                }
                match self.backfill(&paths).await {
                    Ok(count) => tracing::debug!(embedded = count, "semantic agent backfilled embeddings"),
                    Err(e) => {
                        self.bus.publish_error("semantic:backfill", e.to_string());
                        tracing::warn!(error = %e, "semantic agent backfill failed");
                    }
                }
            }
        })
    }

    /// Subscribes to the Resource Governor's `resources:adjusted` event and
    /// resizes `maxConcurrency` in response.
    pub fn spawn_resize_listener(self: Arc<Self>) -> JoinHandle<()> {
        let bus = self.bus.clone();
        spawn_resize_listener(bus, move |limit| self.runtime.resize_concurrency(limit))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let dot: f32 = (0..len).map(|i| a[i] * b[i]).sum();
    let norm_a = (a.iter().map(|x| x * x).sum::<f32>()).sqrt();
    let norm_b = (b.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn language_for_path(path: &str) -> String {
    codegraph_core::SupportedLanguage::from_path(std::path::Path::new(path))
        .map(|l| l.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl Agent for SemanticAgent {
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
            "embed"
                | "semantic_search"
                | "find_similar_code"
                | "analyze_code_impact"
                | "detect_code_clones"
                | "suggest_refactoring"
                | "cross_language_search"
                | "analyze_hotspots"
                | "find_related_concepts"
        )
    }

    fn resize_concurrency(&self, max_concurrency: usize) {
        self.runtime.resize_concurrency(max_concurrency);
    }

    async fn process(&self, task: Task) -> Result<TaskResult> {
        let _permit = self.runtime.try_acquire()?;
        let started = Instant::now();

        let data = match task.kind.as_str() {
            "embed" => {
                let paths: Vec<String> = serde_json::from_value(task.payload["filePaths"].clone()).unwrap_or_default();
                json!({ "embedded": self.backfill(&paths).await? })
            }
            "semantic_search" => self.semantic_search(serde_json::from_value(task.payload.clone())?).await?,
            "find_similar_code" => self.find_similar_code(serde_json::from_value(task.payload.clone())?).await?,
            "analyze_code_impact" => self.analyze_code_impact(serde_json::from_value(task.payload.clone())?)?,
            "detect_code_clones" => self.detect_code_clones(serde_json::from_value(task.payload.clone())?).await?,
            "suggest_refactoring" => self.suggest_refactoring(serde_json::from_value(task.payload.clone())?)?,
            "cross_language_search" => self.cross_language_search(serde_json::from_value(task.payload.clone())?).await?,
            "analyze_hotspots" => self.analyze_hotspots(serde_json::from_value(task.payload.clone())?)?,
            "find_related_concepts" => self.find_related_concepts(serde_json::from_value(task.payload.clone())?).await?,
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
    use codegraph_core::model::{EntityType, Location, Point};
    use codegraph_vector::EmbeddingConfig;
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

    async fn agent() -> SemanticAgent {
        let graph = Arc::new(GraphStore::in_memory().unwrap());
        graph.upsert_entities(&[entity("a.rs:function:add", "add", "a.rs")]).unwrap();
        let vector_store = Arc::new(VectorStore::in_memory().unwrap());
        let embeddings = codegraph_vector::create_provider(&EmbeddingConfig::stub()).unwrap();
        let bus = KnowledgeBus::new();
        SemanticAgent::new("semantic-1", graph, vector_store, embeddings, bus, None, Capabilities::default())
    }

    #[tokio::test]
    async fn backfill_embeds_every_entity_in_touched_files() {
        let agent = agent().await;
        let count = agent.backfill(&["a.rs".to_string()]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(agent.vector_store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn detect_code_clones_groups_near_identical_vectors() {
        let agent = agent().await;
        agent.backfill(&["a.rs".to_string()]).await.unwrap();
        let result = agent
            .detect_code_clones(DetectCodeClonesRequest { threshold: Some(0.99), path_prefix: None })
            .await
            .unwrap();
        assert!(result["clusters"].as_array().unwrap().is_empty());
    }

    #[test]
    fn can_handle_matches_semantic_agent_task_kinds() {
        let graph = Arc::new(GraphStore::in_memory().unwrap());
        let vector_store = Arc::new(VectorStore::in_memory().unwrap());
        let embeddings = codegraph_vector::create_provider(&EmbeddingConfig::stub()).unwrap();
        let bus = KnowledgeBus::new();
        let agent = SemanticAgent::new("s", graph, vector_store, embeddings, bus, None, Capabilities::default());
        assert!(agent.can_handle(&Task::new("1", "semantic_search", json!({}))));
        assert!(!agent.can_handle(&Task::new("1", "query", json!({}))));
    }
}
