//! The `Agent` contract shared by every task-executing unit in the fabric.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::bus::KnowledgeBus;
use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Shutdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capabilities {
    pub max_concurrency: usize,
    pub memory_limit_mb: u64,
    pub priority: u8,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            memory_limit_mb: 512,
            priority: 5,
        }
    }
}

/// One unit of work handed to an agent. `kind` is the dispatch key
/// (`"parse:file"`, `"index"`, `"semantic_search"`, …); `payload` is the
/// tool's validated input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: String,
    pub payload: Value,
}

impl Task {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub data: Value,
    pub processing_time_ms: u64,
}

/// Shared bookkeeping every concrete agent embeds: identity, status, and
/// the concurrency semaphore that turns "too many in-flight tasks" into a
/// fast `AgentBusyError` rather than unbounded queuing.
pub struct AgentRuntime {
    pub id: String,
    pub agent_type: &'static str,
    capabilities: parking_lot::RwLock<Capabilities>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicU32>,
    queue_depth: AtomicU32,
    shutdown: std::sync::atomic::AtomicBool,
    tasks_processed: AtomicU64,
}

impl AgentRuntime {
    pub fn new(id: impl Into<String>, agent_type: &'static str, capabilities: Capabilities) -> Self {
        Self {
            id: id.into(),
            agent_type,
            semaphore: Arc::new(Semaphore::new(capabilities.max_concurrency)),
            capabilities: parking_lot::RwLock::new(capabilities),
            in_flight: Arc::new(AtomicU32::new(0)),
            queue_depth: AtomicU32::new(0),
            shutdown: std::sync::atomic::AtomicBool::new(false),
            tasks_processed: AtomicU64::new(0),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.capabilities.read()
    }

    pub fn status(&self) -> AgentStatus {
        if self.shutdown.load(Ordering::Acquire) {
            AgentStatus::Shutdown
        } else if self.in_flight.load(Ordering::Acquire) > 0 {
            AgentStatus::Busy
        } else {
            AgentStatus::Idle
        }
    }

    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    /// Resizes `maxConcurrency` in response to a `resources:adjusted`
    /// event. Bounded `>= 1`: a governor-driven shrink never starves an
    /// agent entirely. Adjusts the live semaphore by the delta between the
    /// old and new bound — growing adds permits immediately, shrinking
    /// forgets them (tokio reclaims any not currently available as they're
    /// released) — so `try_acquire` actually enforces the new bound rather
    /// than just the `capabilities` bookkeeping.
    pub fn resize_concurrency(&self, max_concurrency: usize) {
        let max_concurrency = max_concurrency.max(1);
        let mut caps = self.capabilities.write();
        let old = caps.max_concurrency;
        match max_concurrency.cmp(&old) {
            std::cmp::Ordering::Greater => self.semaphore.add_permits(max_concurrency - old),
            std::cmp::Ordering::Less => {
                self.semaphore.forget_permits(old - max_concurrency);
            }
            std::cmp::Ordering::Equal => {}
        }
        caps.max_concurrency = max_concurrency;
    }

    /// Acquires a concurrency permit or fails fast with `AgentError::Busy`.
    /// Held across the caller's `process()` body; dropping it releases the
    /// slot regardless of success or failure.
    pub fn try_acquire(&self) -> Result<OwnedPermit> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AgentError::ShutDown(self.id.clone()));
        }
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                self.tasks_processed.fetch_add(1, Ordering::Relaxed);
                Ok(OwnedPermit {
                    _permit: permit,
                    in_flight: self.in_flight.clone(),
                })
            }
            Err(_) => {
                let queue_length = self.queue_depth.load(Ordering::Acquire) as usize;
                Err(AgentError::Busy {
                    agent_id: self.id.clone(),
                    queue_length,
                    retry_after_ms: retry_after_estimate(queue_length),
                })
            }
        }
    }
}

/// RAII guard decrementing `in_flight` on drop, independent of the
/// runtime's own lifetime.
pub struct OwnedPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    in_flight: Arc<AtomicU32>,
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

fn retry_after_estimate(queue_length: usize) -> u64 {
    (50 * (queue_length as u64 + 1)).min(5000)
}

/// Subscribes to `resources:adjusted` and invokes `resize` with the
/// published `newAgentLimit` on every event. Shared by each concrete
/// agent's `spawn_resize_listener` so the Governor's §4.6 adjustment
/// signal actually reaches a live `maxConcurrency` bound instead of
/// going unheard.
pub fn spawn_resize_listener<F>(bus: Arc<KnowledgeBus>, resize: F) -> JoinHandle<()>
where
    F: Fn(usize) + Send + 'static,
{
    let mut rx = bus.subscribe("resources:adjusted");
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(limit) = event.payload.get("newAgentLimit").and_then(|v| v.as_u64()) {
                resize(limit as usize);
            }
        }
    })
}

/// Implemented by every task-executing unit (Parser, Indexer, Query,
/// Semantic). `can_handle` is a cheap, synchronous filter the Conductor
/// uses for routing before it commits to `process`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;
    fn agent_type(&self) -> &'static str;
    fn status(&self) -> AgentStatus;
    fn capabilities(&self) -> Capabilities;
    fn can_handle(&self, task: &Task) -> bool;
    async fn process(&self, task: Task) -> Result<TaskResult>;

    /// Resizes this agent's concurrency bound, called when the Resource
    /// Governor publishes `resources:adjusted`. Default no-op for agents
    /// that don't wrap an [`AgentRuntime`] (none currently); concrete
    /// agents override this to delegate to `runtime.resize_concurrency`.
    fn resize_concurrency(&self, _max_concurrency: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_beyond_max_concurrency_fails_busy() {
        let runtime = AgentRuntime::new("a", "test", Capabilities { max_concurrency: 1, ..Default::default() });
        let _first = runtime.try_acquire().unwrap();
        let second = runtime.try_acquire();
        assert!(matches!(second, Err(AgentError::Busy { .. })));
    }

    #[test]
    fn dropping_permit_frees_the_slot() {
        let runtime = AgentRuntime::new("a", "test", Capabilities { max_concurrency: 1, ..Default::default() });
        {
            let _permit = runtime.try_acquire().unwrap();
        }
        assert!(runtime.try_acquire().is_ok());
    }

    #[test]
    fn shutdown_runtime_refuses_new_work() {
        let runtime = AgentRuntime::new("a", "test", Capabilities::default());
        runtime.shut_down();
        assert!(matches!(runtime.try_acquire(), Err(AgentError::ShutDown(_))));
        assert_eq!(runtime.status(), AgentStatus::Shutdown);
    }

    #[test]
    fn resize_concurrency_is_floored_at_one() {
        let runtime = AgentRuntime::new("a", "test", Capabilities::default());
        runtime.resize_concurrency(0);
        assert_eq!(runtime.capabilities().max_concurrency, 1);
    }

    #[test]
    fn shrinking_concurrency_actually_tightens_the_semaphore() {
        let runtime = AgentRuntime::new("a", "test", Capabilities { max_concurrency: 2, ..Default::default() });
        let _first = runtime.try_acquire().unwrap();
        runtime.resize_concurrency(1);
        // the first permit is already out, so a second acquire must fail
        // immediately rather than waiting for the old bound of 2.
        assert!(matches!(runtime.try_acquire(), Err(AgentError::Busy { .. })));
    }

    #[test]
    fn growing_concurrency_allows_more_in_flight_immediately() {
        let runtime = AgentRuntime::new("a", "test", Capabilities { max_concurrency: 1, ..Default::default() });
        let _first = runtime.try_acquire().unwrap();
        runtime.resize_concurrency(2);
        assert!(runtime.try_acquire().is_ok());
    }
}
