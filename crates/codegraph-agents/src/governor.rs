//! Resource Governor: samples system load and arbitrates per-agent
//! resource allocation with throttle hysteresis.
//!
//! Sampling runs once a second and keeps 60 seconds of history. Agents
//! request `{memoryMB, cpuPercent, priority}` before starting expensive
//! work; the governor grants or denies against the configured bounds and,
//! independently, watches aggregate usage to flip a throttled flag with
//! hysteresis (enter at >80%, leave at <70%) so a level pinned right at
//! the line doesn't oscillate every sample.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;
use tracing::info;

use crate::bus::KnowledgeBus;

const HISTORY_SECONDS: usize = 60;
const THROTTLE_ENTER_RATIO: f32 = 0.80;
const THROTTLE_EXIT_RATIO: f32 = 0.70;

#[derive(Debug, Clone, Copy)]
pub struct GovernorLimits {
    pub max_memory_mb: u64,
    pub max_cpu_percent: f32,
    pub max_concurrent_agents: usize,
    pub max_task_queue_size: usize,
}

impl Default for GovernorLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 4096,
            max_cpu_percent: 80.0,
            max_concurrent_agents: 8,
            max_task_queue_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceSample {
    pub process_memory_mb: u64,
    pub system_free_memory_mb: u64,
    pub load_average: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceAllocation {
    pub agent_id: String,
    pub memory_mb: u64,
    pub cpu_percent: f32,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome")]
pub enum AllocationDecision {
    Granted,
    Denied { reason: String },
}

/// Samples and arbitrates resource usage. Owns a `sysinfo::System`
/// refreshed on each `sample()` tick; call `spawn_sampler` to drive it on
/// a 1-second interval from the conductor's lifetime task.
pub struct ResourceGovernor {
    limits: Mutex<GovernorLimits>,
    system: Mutex<System>,
    history: Mutex<VecDeque<ResourceSample>>,
    allocations: Mutex<Vec<ResourceAllocation>>,
    throttled: AtomicBool,
    current_memory_limit_mb: AtomicI64,
    bus: Arc<KnowledgeBus>,
}

impl ResourceGovernor {
    pub fn new(limits: GovernorLimits, bus: Arc<KnowledgeBus>) -> Arc<Self> {
        Arc::new(Self {
            current_memory_limit_mb: AtomicI64::new(limits.max_memory_mb as i64),
            limits: Mutex::new(limits),
            system: Mutex::new(System::new_all()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_SECONDS)),
            allocations: Mutex::new(Vec::new()),
            throttled: AtomicBool::new(false),
            bus,
        })
    }

    /// Samples process memory, system free memory, and load average, then
    /// re-evaluates the throttle flag with hysteresis. Pushes onto a
    /// 60-sample ring, evicting the oldest.
    pub fn sample(&self) -> ResourceSample {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let pid = sysinfo::get_current_pid().ok();
        let process_memory_mb = pid
            .and_then(|p| system.process(p))
            .map(|p| p.memory() / (1024 * 1024))
            .unwrap_or(0);
        let system_free_memory_mb = system.free_memory() / (1024 * 1024);
        let load_average = System::load_average().one;

        let sample = ResourceSample {
            process_memory_mb,
            system_free_memory_mb,
            load_average,
        };

        let mut history = self.history.lock();
        if history.len() == HISTORY_SECONDS {
            history.pop_front();
        }
        history.push_back(sample);
        drop(history);

        self.reevaluate_throttle(&sample);
        sample
    }

    fn reevaluate_throttle(&self, sample: &ResourceSample) {
        let limits = *self.limits.lock();
        let memory_ratio = sample.process_memory_mb as f32 / limits.max_memory_mb.max(1) as f32;
        let cpu_ratio = (sample.load_average as f32 * 100.0) / limits.max_cpu_percent.max(1.0);
        let worst = memory_ratio.max(cpu_ratio);

        let was_throttled = self.throttled.load(Ordering::Acquire);
        if !was_throttled && worst > THROTTLE_ENTER_RATIO {
            self.throttled.store(true, Ordering::Release);
            self.bus.publish(
                "throttle:enabled",
                serde_json::json!({ "memoryRatio": memory_ratio, "cpuRatio": cpu_ratio, "suggestGc": true }),
            );
            info!(memory_ratio, cpu_ratio, "governor entering throttled state");
        } else if was_throttled && worst < THROTTLE_EXIT_RATIO {
            self.throttled.store(false, Ordering::Release);
            self.bus.publish(
                "throttle:disabled",
                serde_json::json!({ "memoryRatio": memory_ratio, "cpuRatio": cpu_ratio }),
            );
            info!("governor leaving throttled state");
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Acquire)
    }

    pub fn history(&self) -> Vec<ResourceSample> {
        self.history.lock().iter().copied().collect()
    }

    /// `request(agentId, mem, cpu, priority) -> granted|denied{reason}`.
    /// Denies when granting would push cumulative allocation, or the
    /// concurrent-agent count, over the configured bounds.
    pub fn request(&self, agent_id: &str, memory_mb: u64, cpu_percent: f32, priority: u8) -> AllocationDecision {
        let limits = *self.limits.lock();
        let mut allocations = self.allocations.lock();

        if allocations.len() >= limits.max_concurrent_agents
            && !allocations.iter().any(|a| a.agent_id == agent_id)
        {
            return AllocationDecision::Denied {
                reason: format!("max_concurrent_agents ({}) reached", limits.max_concurrent_agents),
            };
        }

        let existing_memory: u64 = allocations
            .iter()
            .filter(|a| a.agent_id != agent_id)
            .map(|a| a.memory_mb)
            .sum();
        let existing_cpu: f32 = allocations
            .iter()
            .filter(|a| a.agent_id != agent_id)
            .map(|a| a.cpu_percent)
            .sum();

        if existing_memory + memory_mb > limits.max_memory_mb {
            return AllocationDecision::Denied {
                reason: format!("would exceed max_memory_mb ({})", limits.max_memory_mb),
            };
        }
        if existing_cpu + cpu_percent > limits.max_cpu_percent {
            return AllocationDecision::Denied {
                reason: format!("would exceed max_cpu_percent ({})", limits.max_cpu_percent),
            };
        }

        allocations.retain(|a| a.agent_id != agent_id);
        allocations.push(ResourceAllocation {
            agent_id: agent_id.to_string(),
            memory_mb,
            cpu_percent,
            priority,
        });
        AllocationDecision::Granted
    }

    pub fn release(&self, agent_id: &str) {
        self.allocations.lock().retain(|a| a.agent_id != agent_id);
    }

    pub fn allocations(&self) -> Vec<ResourceAllocation> {
        self.allocations.lock().clone()
    }

    /// Applies a workspace-size-driven change to the memory/agent bounds
    /// and publishes `resources:adjusted` for subscribers (agents resize
    /// `maxConcurrency` and batch sizes in response, each bounded `>= 1`).
    pub fn adjust_limits(&self, new_memory_limit_mb: u64, new_agent_limit: usize) {
        let mut limits = self.limits.lock();
        limits.max_memory_mb = new_memory_limit_mb;
        limits.max_concurrent_agents = new_agent_limit.max(1);
        self.current_memory_limit_mb.store(new_memory_limit_mb as i64, Ordering::Release);
        drop(limits);

        self.bus.publish(
            "resources:adjusted",
            serde_json::json!({
                "newMemoryLimit": new_memory_limit_mb,
                "newAgentLimit": new_agent_limit.max(1),
            }),
        );
    }

    pub fn limits(&self) -> GovernorLimits {
        *self.limits.lock()
    }
}

/// Spawns the 1-second sampling loop.
pub fn spawn_sampler(governor: Arc<ResourceGovernor>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            governor.sample();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_governor(limits: GovernorLimits) -> Arc<ResourceGovernor> {
        ResourceGovernor::new(limits, KnowledgeBus::new())
    }

    #[test]
    fn grants_allocation_within_bounds() {
        let gov = test_governor(GovernorLimits {
            max_memory_mb: 1000,
            max_cpu_percent: 100.0,
            max_concurrent_agents: 4,
            max_task_queue_size: 100,
        });
        let decision = gov.request("agent-a", 200, 10.0, 5);
        assert!(matches!(decision, AllocationDecision::Granted));
    }

    #[test]
    fn denies_when_cumulative_memory_would_exceed_bound() {
        let gov = test_governor(GovernorLimits {
            max_memory_mb: 300,
            max_cpu_percent: 100.0,
            max_concurrent_agents: 4,
            max_task_queue_size: 100,
        });
        assert!(matches!(gov.request("a", 200, 1.0, 1), AllocationDecision::Granted));
        assert!(matches!(gov.request("b", 200, 1.0, 1), AllocationDecision::Denied { .. }));
    }

    #[test]
    fn denies_beyond_max_concurrent_agents() {
        let gov = test_governor(GovernorLimits {
            max_memory_mb: 10_000,
            max_cpu_percent: 100.0,
            max_concurrent_agents: 1,
            max_task_queue_size: 100,
        });
        assert!(matches!(gov.request("a", 1, 1.0, 1), AllocationDecision::Granted));
        assert!(matches!(gov.request("b", 1, 1.0, 1), AllocationDecision::Denied { .. }));
    }

    #[test]
    fn re_requesting_same_agent_updates_rather_than_doubles() {
        let gov = test_governor(GovernorLimits {
            max_memory_mb: 300,
            max_cpu_percent: 100.0,
            max_concurrent_agents: 4,
            max_task_queue_size: 100,
        });
        assert!(matches!(gov.request("a", 200, 1.0, 1), AllocationDecision::Granted));
        assert!(matches!(gov.request("a", 250, 1.0, 1), AllocationDecision::Granted));
        assert_eq!(gov.allocations().len(), 1);
    }

    #[test]
    fn adjust_limits_publishes_event_and_floors_agent_limit_at_one() {
        let bus = KnowledgeBus::new();
        let gov = ResourceGovernor::new(GovernorLimits::default(), bus.clone());
        let mut rx = bus.subscribe("resources:adjusted");
        gov.adjust_limits(2048, 0);
        assert_eq!(gov.limits().max_concurrent_agents, 1);
        assert!(rx.try_recv().is_ok());
    }
}
