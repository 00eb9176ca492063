//! Orchestration layer for Cohort agent graphs.
//!
//! Executes an [`AgentDependencyGraph`](cohort_planner::AgentDependencyGraph)
//! produced by the planner: layer by layer, at most `max_concurrent_agents`
//! agents at once, under one wall-clock timeout. Agents coordinate only
//! through the shared state store and the coordination messages they
//! publish there.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Runs a graph and returns an [`OrchestrationResult`].
//! - [`PhaseExecutor`]: The seam where real phase work plugs in.
//! - [`SimulatedExecutor`]: Delay-based executor for dry runs and tests.
//! - [`AgentMonitor`]: Per-agent state and metrics fed from observed messages.

/// Runtime limits.
pub mod config;
/// The layered scheduler.
pub mod engine;
/// Phase execution seam and store key layout.
pub mod executor;
/// Per-agent state tracking.
pub mod monitor;
/// Status and result types.
pub mod types;

pub use config::OrchestratorConfig;
pub use engine::Orchestrator;
pub use executor::{
    agent_progress_key, agent_status_key, phase_output_key, phase_status_key, PhaseExecutor,
    SimulatedExecutor,
};
pub use monitor::AgentMonitor;
pub use types::{AgentMetrics, AgentState, AgentStatus, OrchestrationResult};
