//! Multi-agent coordination fabric: a Knowledge Bus for pub/sub between
//! agents, a Resource Governor arbitrating memory/CPU headroom, the agents
//! themselves (Parser, Indexer, Query, Semantic), and a Conductor that
//! routes tool calls to the agent able to handle them.
//!
//! Nothing here talks to a transport. The Conductor's `dispatch` is the one
//! entry point the `codegraph-mcp` crate calls into; everything upstream of
//! it (JSON-RPC framing, schema validation) lives there instead.

pub mod agent;
pub mod agents;
pub mod bus;
pub mod conductor;
pub mod error;
pub mod governor;

pub use agent::{Agent, AgentRuntime, AgentStatus, Capabilities, Task, TaskResult};
pub use agents::{IndexerAgent, ParserAgent, QueryAgent, SemanticAgent};
pub use bus::{spawn_sweeper, BusEvent, BusStats, KnowledgeBus};
pub use conductor::{ApprovalToken, Conductor, ConductorMetrics};
pub use error::{AgentError, Result};
pub use governor::{
    spawn_sampler, AllocationDecision, GovernorLimits, ResourceAllocation, ResourceGovernor,
    ResourceSample,
};
