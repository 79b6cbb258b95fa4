//! MCP server exposing the code-intelligence service's 24-tool surface.
//!
//! Every `#[tool]` method here does the same three things: deserialize its
//! `Parameters<T>` into a `Task` payload, call `Conductor::dispatch`, and
//! fold the result (or error) into a `ToolEnvelope`. The Conductor already
//! knows how to route, gate, and meter each call; this layer only shapes
//! the wire format around it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpSdkError,
};
use serde_json::{json, Value};

use codegraph_agents::{
    spawn_sampler, spawn_sweeper, ApprovalToken, Capabilities, Conductor, GovernorLimits, IndexerAgent,
    KnowledgeBus, ParserAgent, QueryAgent, ResourceGovernor, SemanticAgent, Task,
};
use codegraph_core::ParseCache;
use codegraph_graph::GraphStore;
use codegraph_vector::{create_provider, EmbeddingConfig, VectorStore};

use crate::envelope::{next_cursor_if_full, ToolEnvelope};
use crate::error::{McpError, Result};
use crate::tools::*;

/// Configuration for one server instance, one workspace.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workspace_path: PathBuf,
    pub database_path: PathBuf,
    pub embedding: EmbeddingConfig,
    pub governor_limits: GovernorLimits,
    pub clone_threshold: Option<f32>,
}

impl ServerConfig {
    /// Workspace-local store at `<workspace>/.code-graph-rag/vectors.db`,
    /// a local-runtime embedding provider, and default governor limits.
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        let workspace_path = workspace_path.into();
        let database_path = workspace_path.join(".code-graph-rag").join("vectors.db");
        Self {
            workspace_path,
            database_path,
            embedding: EmbeddingConfig::local_runtime(),
            governor_limits: GovernorLimits::default(),
            clone_threshold: None,
        }
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_governor_limits(mut self, limits: GovernorLimits) -> Self {
        self.governor_limits = limits;
        self
    }

    pub fn with_clone_threshold(mut self, threshold: Option<f32>) -> Self {
        self.clone_threshold = threshold;
        self
    }
}

#[derive(Clone)]
pub struct CodeGraphServer {
    conductor: Arc<Conductor>,
    tool_router: ToolRouter<Self>,
    next_task_id: Arc<AtomicU64>,
}

impl CodeGraphServer {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| McpError::Init(e.to_string()))?;
        }

        let graph = Arc::new(GraphStore::open(&config.database_path).map_err(|e| McpError::Init(e.to_string()))?);
        let vector_store =
            Arc::new(VectorStore::open(&config.database_path).map_err(|e| McpError::Init(e.to_string()))?);
        let embeddings = create_provider(&config.embedding).map_err(|e| McpError::Init(e.to_string()))?;
        let parse_cache = Arc::new(ParseCache::default());
        let bus = KnowledgeBus::new();
        let governor = ResourceGovernor::new(config.governor_limits.clone(), bus.clone());

        spawn_sweeper(bus.clone());
        spawn_sampler(governor.clone());

        let parser = Arc::new(ParserAgent::new(
            "parser-1",
            parse_cache.clone(),
            bus.clone(),
            Capabilities { max_concurrency: 8, ..Capabilities::default() },
        ));
        let indexer = Arc::new(IndexerAgent::new(
            "indexer-1",
            parser.clone(),
            graph.clone(),
            bus.clone(),
            Capabilities::default(),
        ));
        let query = Arc::new(QueryAgent::new(
            "query-1",
            graph.clone(),
            Some(vector_store.clone()),
            Some(embeddings.clone()),
            config.workspace_path.clone(),
            bus.clone(),
            Capabilities { max_concurrency: 8, ..Capabilities::default() },
        ));
        let semantic = Arc::new(SemanticAgent::new(
            "semantic-1",
            graph.clone(),
            vector_store.clone(),
            embeddings.clone(),
            bus.clone(),
            config.clone_threshold,
            Capabilities::default(),
        ));
        semantic.clone().spawn_backfill_listener();
        parser.clone().spawn_resize_listener();
        indexer.clone().spawn_resize_listener();
        query.clone().spawn_resize_listener();
        semantic.clone().spawn_resize_listener();

        let conductor = Arc::new(Conductor::new(
            vec![parser, indexer, query, semantic],
            graph,
            Some(vector_store),
            Some(embeddings),
            parse_cache,
            governor,
            bus,
        ));

        Ok(Self { conductor, tool_router: Self::tool_router(), next_task_id: Arc::new(AtomicU64::new(0)) })
    }

    fn task(&self, kind: &str, payload: Value) -> Task {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        Task::new(format!("mcp-{id}"), kind, payload)
    }

    /// Dispatches one tool call directly, bypassing the MCP/JSON-RPC
    /// framing. Used by the CLI to drive the same agent stack a stdio
    /// session would use, without spinning up a transport.
    pub async fn call(&self, kind: &str, payload: Value) -> ToolEnvelope {
        self.run(kind, payload).await
    }

    /// Same as [`Self::call`] but threads an approval token through for
    /// the high-impact tools (`reset_graph`, `clean_index`).
    pub async fn call_with_approval(&self, kind: &str, payload: Value, approval_token: Option<String>) -> ToolEnvelope {
        self.run_with_approval(kind, payload, approval_token).await
    }

    async fn run(&self, kind: &str, payload: Value) -> ToolEnvelope {
        self.run_with_approval(kind, payload, None).await
    }

    async fn run_with_approval(&self, kind: &str, payload: Value, approval_token: Option<String>) -> ToolEnvelope {
        let token = match approval_token {
            Some(t) => match ApprovalToken::new(t) {
                Ok(token) => Some(token),
                Err(e) => return ToolEnvelope::from(e),
            },
            None => None,
        };
        match self.conductor.dispatch(self.task(kind, payload), token).await {
            Ok(result) => ToolEnvelope::success(result.data),
            Err(e) => ToolEnvelope::from(e),
        }
    }

    fn to_call_result(envelope: ToolEnvelope) -> std::result::Result<CallToolResult, McpSdkError> {
        Ok(CallToolResult::success(vec![Content::text(envelope.to_pretty_string())]))
    }
}

#[tool_router]
impl CodeGraphServer {
    // ---- Core ----------------------------------------------------------

    #[tool(
        name = "index",
        description = "Walk a workspace, parse every changed file, and upsert the resulting entities and relationships into the graph store. Incremental by default (merkle-tree diff against the previous run); set full_reindex to force a clean parse of every file."
    )]
    async fn index(&self, Parameters(p): Parameters<IndexParams>) -> std::result::Result<CallToolResult, McpSdkError> {
        let envelope = self.run("index", json!(p)).await;
        Self::to_call_result(envelope)
    }

    #[tool(
        name = "reset_graph",
        description = "Delete every entity and relationship and clear the incremental-indexing baseline. Destructive; requires an approval_token."
    )]
    async fn reset_graph(
        &self,
        Parameters(p): Parameters<ApprovalGatedParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let envelope = self.run_with_approval("reset_graph", json!({}), p.approval_token).await;
        Self::to_call_result(envelope)
    }

    #[tool(
        name = "clean_index",
        description = "Clear the parse cache and reset the graph store to an empty state. Destructive; requires an approval_token."
    )]
    async fn clean_index(
        &self,
        Parameters(p): Parameters<ApprovalGatedParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let envelope = self.run_with_approval("clean_index", json!({}), p.approval_token).await;
        Self::to_call_result(envelope)
    }

    // ---- Query -----------------------------------------------------------

    #[tool(
        name = "list_file_entities",
        description = "List every entity (function, class, file, ...) defined in one file, paginated."
    )]
    async fn list_file_entities(
        &self,
        Parameters(p): Parameters<ListFileEntitiesParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let offset = match effective_offset(p.cursor.as_deref(), p.offset) {
            Ok(o) => o,
            Err(e) => return Self::to_call_result(ToolEnvelope::failure("validation_error", e, None)),
        };
        let envelope = self
            .run("list_file_entities", json!({ "file_path": p.file_path, "offset": offset, "limit": p.limit }))
            .await;
        Self::to_call_result(paginate(envelope, offset, p.limit, None))
    }

    #[tool(
        name = "list_entity_relationships",
        description = "List the relationships (calls, imports, extends, ...) touching one entity, traversing up to `depth` hops in the chosen direction."
    )]
    async fn list_entity_relationships(
        &self,
        Parameters(p): Parameters<ListEntityRelationshipsParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let envelope = self.run("list_entity_relationships", json!(p)).await;
        Self::to_call_result(envelope)
    }

    #[tool(
        name = "resolve_entity",
        description = "Resolve a name to candidate entities by fuzzy match, optionally biased by a file-path hint. Returns candidates ranked by match strength."
    )]
    async fn resolve_entity(
        &self,
        Parameters(p): Parameters<ResolveEntityParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let envelope = self.run("resolve_entity", json!(p)).await;
        Self::to_call_result(envelope)
    }

    #[tool(
        name = "get_entity_source",
        description = "Read the source text backing one entity, with optional surrounding context lines."
    )]
    async fn get_entity_source(
        &self,
        Parameters(p): Parameters<GetEntitySourceParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let envelope = self.run("get_entity_source", json!(p)).await;
        Self::to_call_result(envelope)
    }

    #[tool(
        name = "query",
        description = "Hybrid search: a structural name/filter match over the graph store fused with a semantic search over the vector store. Returns separate structural and semantic result sets, each item tagged with its matchType."
    )]
    async fn query(&self, Parameters(p): Parameters<QueryParams>) -> std::result::Result<CallToolResult, McpSdkError> {
        let offset = match effective_offset(p.cursor.as_deref(), p.offset) {
            Ok(o) => o,
            Err(e) => return Self::to_call_result(ToolEnvelope::failure("validation_error", e, None)),
        };
        let envelope = self
            .run(
                "query",
                json!({ "query": p.query, "filters": p.filters, "offset": offset, "limit": p.limit }),
            )
            .await;
        Self::to_call_result(paginate_query(envelope, &p.query, offset, p.limit))
    }

    #[tool(
        name = "get_graph",
        description = "Return a bounded neighborhood around root_id, or the full entity/relationship dump when root_id is omitted."
    )]
    async fn get_graph(
        &self,
        Parameters(p): Parameters<GetGraphParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let envelope = self.run("get_graph", json!(p)).await;
        Self::to_call_result(envelope)
    }

    // ---- Info (trivial, answered by the Conductor directly) --------------

    #[tool(name = "get_graph_stats", description = "Entity/relationship/file counts and the vector store's record count.")]
    async fn get_graph_stats(
        &self,
        Parameters(_p): Parameters<EmptyParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("get_graph_stats", json!({})).await)
    }

    #[tool(
        name = "get_graph_health",
        description = "Overall health: graph metrics, embedding provider status, and whether the resource governor is currently throttled."
    )]
    async fn get_graph_health(
        &self,
        Parameters(_p): Parameters<EmptyParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("get_graph_health", json!({})).await)
    }

    #[tool(name = "get_metrics", description = "Conductor aggregate metrics: total tasks, average processing time, overhead reduction, cache hit rate.")]
    async fn get_metrics(
        &self,
        Parameters(_p): Parameters<EmptyParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("get_metrics", json!({})).await)
    }

    #[tool(name = "get_version", description = "The running server's version.")]
    async fn get_version(
        &self,
        Parameters(_p): Parameters<EmptyParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("get_version", json!({})).await)
    }

    // ---- Semantic ----------------------------------------------------------

    #[tool(
        name = "semantic_search",
        description = "Embed the query and search the vector store for the closest entities, reranked against the structural file set."
    )]
    async fn semantic_search(
        &self,
        Parameters(p): Parameters<SemanticSearchParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        let offset = match effective_offset(p.cursor.as_deref(), 0) {
            Ok(o) => o,
            Err(e) => return Self::to_call_result(ToolEnvelope::failure("validation_error", e, None)),
        };
        let envelope = self
            .run("semantic_search", json!({ "query": p.query, "filters": p.filters, "limit": p.limit }))
            .await;
        Self::to_call_result(paginate_hits(envelope, &p.query, offset, p.limit))
    }

    #[tool(
        name = "find_similar_code",
        description = "Find entities whose embedding is closest to a reference entity (entity_id) or a raw snippet (code)."
    )]
    async fn find_similar_code(
        &self,
        Parameters(p): Parameters<FindSimilarCodeParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("find_similar_code", json!(p)).await)
    }

    #[tool(
        name = "analyze_code_impact",
        description = "Compute the direct and transitive blast radius of changing one entity, up to max_depth hops."
    )]
    async fn analyze_code_impact(
        &self,
        Parameters(p): Parameters<AnalyzeCodeImpactParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("analyze_code_impact", json!(p)).await)
    }

    #[tool(
        name = "detect_code_clones",
        description = "Cluster entities whose embeddings are near-identical (cosine similarity above threshold, default 0.65), optionally restricted to a path prefix."
    )]
    async fn detect_code_clones(
        &self,
        Parameters(p): Parameters<DetectCodeClonesParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("detect_code_clones", json!(p)).await)
    }

    #[tool(
        name = "suggest_refactoring",
        description = "Heuristic refactoring suggestions for one entity based on body size, fan-in, and fan-out."
    )]
    async fn suggest_refactoring(
        &self,
        Parameters(p): Parameters<SuggestRefactoringParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("suggest_refactoring", json!(p)).await)
    }

    #[tool(
        name = "cross_language_search",
        description = "Semantic search across every indexed language, with results broken down by language."
    )]
    async fn cross_language_search(
        &self,
        Parameters(p): Parameters<CrossLanguageSearchParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("cross_language_search", json!(p)).await)
    }

    #[tool(
        name = "analyze_hotspots",
        description = "Rank entities by structural coupling (fan-in + fan-out) to surface change-risk hotspots."
    )]
    async fn analyze_hotspots(
        &self,
        Parameters(p): Parameters<AnalyzeHotspotsParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("analyze_hotspots", json!(p)).await)
    }

    #[tool(
        name = "find_related_concepts",
        description = "Find entities conceptually related to a reference entity or a free-text query via the vector store."
    )]
    async fn find_related_concepts(
        &self,
        Parameters(p): Parameters<FindRelatedConceptsParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("find_related_concepts", json!(p)).await)
    }

    // ---- Ops -----------------------------------------------------------

    #[tool(name = "get_agent_metrics", description = "Per-agent status, capabilities, and current resource allocations.")]
    async fn get_agent_metrics(
        &self,
        Parameters(_p): Parameters<EmptyParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("get_agent_metrics", json!({})).await)
    }

    #[tool(name = "get_bus_stats", description = "Knowledge Bus topic, subscription, buffered-event, and direct-queue counts.")]
    async fn get_bus_stats(
        &self,
        Parameters(_p): Parameters<EmptyParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("get_bus_stats", json!({})).await)
    }

    #[tool(name = "clear_bus_topic", description = "Clear the ring buffer for one Knowledge Bus topic.")]
    async fn clear_bus_topic(
        &self,
        Parameters(p): Parameters<ClearBusTopicParams>,
    ) -> std::result::Result<CallToolResult, McpSdkError> {
        Self::to_call_result(self.run("clear_bus_topic", json!(p)).await)
    }
}

/// Attaches `nextCursor` to an `{items, total}`-shaped success payload
/// (used by `list_file_entities`): full page implies more may follow.
fn paginate(envelope: ToolEnvelope, offset: usize, limit: usize, query: Option<&str>) -> ToolEnvelope {
    match envelope {
        ToolEnvelope::Success(mut s) => {
            let items_len = s.data.get("items").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
            if let Some(cursor) = next_cursor_if_full(items_len, limit, offset, query, None) {
                if let Value::Object(ref mut map) = s.data {
                    map.insert("nextCursor".to_string(), json!(cursor));
                }
            }
            ToolEnvelope::Success(s)
        }
        other => other,
    }
}

/// Attaches `nextCursor` to each side of the `query` tool's merged
/// `{structural, semantic}` response independently.
fn paginate_query(envelope: ToolEnvelope, query: &str, offset: usize, limit: usize) -> ToolEnvelope {
    match envelope {
        ToolEnvelope::Success(mut s) => {
            if let Value::Object(ref mut map) = s.data {
                if let Some(Value::Object(structural)) = map.get_mut("structural") {
                    let len = structural.get("items").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
                    if let Some(cursor) = next_cursor_if_full(len, limit, offset, Some(query), None) {
                        structural.insert("nextCursor".to_string(), json!(cursor));
                    }
                }
                if let Some(Value::Object(semantic)) = map.get_mut("semantic") {
                    let len = semantic.get("items").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
                    if let Some(cursor) = next_cursor_if_full(len, limit, offset, Some(query), None) {
                        semantic.insert("nextCursor".to_string(), json!(cursor));
                    }
                }
            }
            ToolEnvelope::Success(s)
        }
        other => other,
    }
}

/// Attaches `nextCursor` to a `{hits}`-shaped semantic payload.
fn paginate_hits(envelope: ToolEnvelope, query: &str, offset: usize, limit: usize) -> ToolEnvelope {
    match envelope {
        ToolEnvelope::Success(mut s) => {
            let len = s.data.get("hits").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
            if let Some(cursor) = next_cursor_if_full(len, limit, offset, Some(query), None) {
                if let Value::Object(ref mut map) = s.data {
                    map.insert("nextCursor".to_string(), json!(cursor));
                }
            }
            ToolEnvelope::Success(s)
        }
        other => other,
    }
}

#[tool_handler]
impl rmcp::ServerHandler for CodeGraphServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Code-intelligence service: parses a workspace into a graph of entities and \
                 relationships, embeds it for semantic search, and exposes both through a \
                 unified tool surface.\n\n\
                 WORKFLOW: index the workspace first. list_file_entities / resolve_entity / \
                 query for structural lookups; semantic_search / find_similar_code / \
                 find_related_concepts for embedding-based ones; analyze_code_impact / \
                 detect_code_clones / suggest_refactoring / analyze_hotspots for structural \
                 analysis. reset_graph and clean_index are destructive and require an \
                 approval_token."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Builds a server for `config` and serves the MCP protocol over stdio
/// until the client disconnects or the process receives a shutdown
/// signal from the caller. All diagnostics go through `tracing`; nothing
/// is written to stdout outside the framed JSON-RPC messages themselves.
pub async fn serve_stdio(config: ServerConfig) -> Result<()> {
    use rmcp::ServiceExt;

    let server = CodeGraphServer::new(config).await?;
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|e| McpError::Transport(e.to_string()))?;
    service.waiting().await.map_err(|e| McpError::Transport(e.to_string()))?;
    Ok(())
}
