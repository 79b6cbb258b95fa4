//! Conductor: the one entry point `codegraph-mcp` calls into.
//!
//! Classifies every incoming tool call. Trivial reads (`get_graph_stats`,
//! `get_graph_health`, `get_metrics`, `get_version`, `get_agent_metrics`,
//! `get_bus_stats`, `clear_bus_topic`) answer directly from store handles
//! the Conductor already holds, without touching an agent's concurrency
//! semaphore. Everything else is routed to whichever registered agent's
//! `can_handle` accepts it. A small set of high-impact kinds (destructive
//! rewrites of the graph) are gated behind an [`ApprovalToken`]: without one,
//! `dispatch` returns [`AgentError::ApprovalRequired`] instead of running.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use codegraph_core::ParseCache;
use codegraph_graph::GraphStore;
use codegraph_vector::{EmbeddingProvider, VectorStore};
use serde::Serialize;
use serde_json::json;

use crate::agent::{Agent, Task, TaskResult};
use crate::bus::KnowledgeBus;
use crate::error::{AgentError, Result};
use crate::governor::ResourceGovernor;

/// Tool kinds answered directly by the Conductor, bypassing agent routing
/// entirely — none of them touch the graph or vector store's write path.
const TRIVIAL_KINDS: &[&str] = &[
    "get_graph_stats",
    "get_graph_health",
    "get_metrics",
    "get_version",
    "get_agent_metrics",
    "get_bus_stats",
    "clear_bus_topic",
];

/// Tool kinds that rewrite or discard persisted state wholesale. These
/// require a caller-supplied [`ApprovalToken`]; the Conductor does not
/// validate the token's contents beyond non-emptiness, trusting the caller
/// (a human-in-the-loop MCP client) to have obtained one out of band.
const HIGH_IMPACT_KINDS: &[&str] = &["reset_graph", "clean_index"];

/// An opaque, caller-supplied approval marker for high-impact operations.
/// The Conductor only checks that one was provided and is non-blank; it
/// does not mint, verify, or expire tokens itself — that policy lives with
/// whatever approval flow the MCP client implements.
#[derive(Debug, Clone)]
pub struct ApprovalToken(String);

impl ApprovalToken {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AgentError::ApprovalRequired);
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Aggregate counters surfaced by the `get_metrics` tool.
#[derive(Debug, Clone, Serialize)]
pub struct ConductorMetrics {
    pub total_tasks: u64,
    pub avg_processing_time_ms: f64,
    pub overhead_reduction: f64,
    pub cache_hit_rate: f64,
    pub pending_tasks: u32,
    pub approvals_pending: u64,
}

pub struct Conductor {
    agents: Vec<Arc<dyn Agent>>,
    graph: Arc<GraphStore>,
    vector_store: Option<Arc<VectorStore>>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    parse_cache: Arc<ParseCache>,
    governor: Arc<ResourceGovernor>,
    bus: Arc<KnowledgeBus>,

    total_tasks: AtomicU64,
    trivial_tasks: AtomicU64,
    total_processing_time_ms: AtomicU64,
    pending_tasks: AtomicU32,
    approvals_pending: AtomicU64,
}

impl Conductor {
    pub fn new(
        agents: Vec<Arc<dyn Agent>>,
        graph: Arc<GraphStore>,
        vector_store: Option<Arc<VectorStore>>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        parse_cache: Arc<ParseCache>,
        governor: Arc<ResourceGovernor>,
        bus: Arc<KnowledgeBus>,
    ) -> Self {
        Self {
            agents,
            graph,
            vector_store,
            embeddings,
            parse_cache,
            governor,
            bus,
            total_tasks: AtomicU64::new(0),
            trivial_tasks: AtomicU64::new(0),
            total_processing_time_ms: AtomicU64::new(0),
            pending_tasks: AtomicU32::new(0),
            approvals_pending: AtomicU64::new(0),
        }
    }

    /// Routes one tool call. `approval_token` is ignored for every kind
    /// except the handful in [`HIGH_IMPACT_KINDS`].
    pub async fn dispatch(&self, task: Task, approval_token: Option<ApprovalToken>) -> Result<TaskResult> {
        self.total_tasks.fetch_add(1, Ordering::Relaxed);
        self.pending_tasks.fetch_add(1, Ordering::AcqRel);
        let started = Instant::now();

        let result = self.dispatch_inner(task, approval_token).await;

        self.pending_tasks.fetch_sub(1, Ordering::AcqRel);
        self.total_processing_time_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        result
    }

    async fn dispatch_inner(&self, task: Task, approval_token: Option<ApprovalToken>) -> Result<TaskResult> {
        if TRIVIAL_KINDS.contains(&task.kind.as_str()) {
            self.trivial_tasks.fetch_add(1, Ordering::Relaxed);
            return self.handle_trivial(task).await;
        }

        if HIGH_IMPACT_KINDS.contains(&task.kind.as_str()) && approval_token.is_none() {
            self.approvals_pending.fetch_add(1, Ordering::Relaxed);
            return Err(AgentError::ApprovalRequired);
        }

        let agent = self
            .agents
            .iter()
            .find(|a| a.can_handle(&task))
            .ok_or_else(|| AgentError::CannotHandle(task.kind.clone()))?;
        agent.process(task).await
    }

    async fn handle_trivial(&self, task: Task) -> Result<TaskResult> {
        let data = match task.kind.as_str() {
            "get_graph_stats" => {
                let graph_metrics = self.graph.get_metrics()?;
                let vector_count = match &self.vector_store {
                    Some(store) => store.count()?,
                    None => 0,
                };
                json!({ "graph": graph_metrics, "vectorCount": vector_count })
            }
            "get_graph_health" => {
                let graph_metrics = self.graph.get_metrics()?;
                let embedding_status = match &self.embeddings {
                    Some(provider) => serde_json::to_value(provider.check_status().await?)?,
                    None => json!({ "available": false, "error": "no embedding provider configured" }),
                };
                json!({
                    "healthy": true,
                    "graph": graph_metrics,
                    "embeddingProvider": embedding_status,
                    "throttled": self.governor.is_throttled(),
                })
            }
            "get_metrics" => serde_json::to_value(self.metrics())?,
            "get_version" => json!({ "version": env!("CARGO_PKG_VERSION") }),
            "get_agent_metrics" => {
                let agents: Vec<_> = self
                    .agents
                    .iter()
                    .map(|a| {
                        json!({
                            "id": a.id(),
                            "agentType": a.agent_type(),
                            "status": a.status(),
                            "capabilities": a.capabilities(),
                        })
                    })
                    .collect();
                json!({ "agents": agents, "allocations": self.governor.allocations() })
            }
            "get_bus_stats" => serde_json::to_value(self.bus.stats())?,
            "clear_bus_topic" => {
                let topic = task.payload.get("topic").and_then(|v| v.as_str()).ok_or_else(|| {
                    AgentError::CannotHandle("clear_bus_topic requires a topic".to_string())
                })?;
                self.bus.clear_topic(topic);
                json!({ "cleared": topic })
            }
            other => return Err(AgentError::CannotHandle(other.to_string())),
        };

        Ok(TaskResult {
            task_id: task.id,
            data,
            processing_time_ms: 0,
        })
    }

    /// Snapshot of aggregate Conductor counters. `overheadReduction` is the
    /// fraction of dispatched tasks answered trivially (no agent routing,
    /// no semaphore acquisition); `cacheHitRate` reflects the parse cache's
    /// lifetime hit rate. `approvalsPending` counts `approval_required`
    /// responses returned so far — the gate is stateless, so this is a
    /// running total rather than a live queue depth.
    pub fn metrics(&self) -> ConductorMetrics {
        let total = self.total_tasks.load(Ordering::Relaxed);
        let trivial = self.trivial_tasks.load(Ordering::Relaxed);
        let total_ms = self.total_processing_time_ms.load(Ordering::Relaxed);
        ConductorMetrics {
            total_tasks: total,
            avg_processing_time_ms: if total == 0 { 0.0 } else { total_ms as f64 / total as f64 },
            overhead_reduction: if total == 0 { 0.0 } else { trivial as f64 / total as f64 },
            cache_hit_rate: self.parse_cache.metrics().hit_rate(),
            pending_tasks: self.pending_tasks.load(Ordering::Relaxed),
            approvals_pending: self.approvals_pending.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Capabilities;
    use crate::agents::{IndexerAgent, ParserAgent};
    use serde_json::json;

    fn conductor() -> Conductor {
        let graph = Arc::new(GraphStore::in_memory().unwrap());
        let bus = KnowledgeBus::new();
        let cache = Arc::new(ParseCache::default());
        let parser = Arc::new(ParserAgent::new("parser-1", cache.clone(), bus.clone(), Capabilities::default()));
        let indexer = Arc::new(IndexerAgent::new("indexer-1", parser.clone(), graph.clone(), bus.clone(), Capabilities::default()));
        let governor = ResourceGovernor::new(Default::default(), bus.clone());
        Conductor::new(
            vec![parser, indexer],
            graph,
            None,
            None,
            cache,
            governor,
            bus,
        )
    }

    #[tokio::test]
    async fn trivial_kind_bypasses_agent_routing() {
        let conductor = conductor();
        let result = conductor.dispatch(Task::new("1", "get_graph_stats", json!({})), None).await.unwrap();
        assert_eq!(result.data["graph"]["entity_count"], 0);
        assert_eq!(conductor.metrics().total_tasks, 1);
        assert_eq!(conductor.metrics().overhead_reduction, 1.0);
    }

    #[tokio::test]
    async fn high_impact_kind_without_token_requires_approval() {
        let conductor = conductor();
        let result = conductor.dispatch(Task::new("1", "reset_graph", json!({})), None).await;
        assert!(matches!(result, Err(AgentError::ApprovalRequired)));
        assert_eq!(conductor.metrics().approvals_pending, 1);
    }

    #[tokio::test]
    async fn high_impact_kind_with_token_routes_to_agent() {
        let conductor = conductor();
        let token = ApprovalToken::new("ok").unwrap();
        let result = conductor.dispatch(Task::new("1", "reset_graph", json!({})), Some(token)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_kind_is_cannot_handle() {
        let conductor = conductor();
        let result = conductor.dispatch(Task::new("1", "not_a_real_tool", json!({})), None).await;
        assert!(matches!(result, Err(AgentError::CannotHandle(_))));
    }
}
