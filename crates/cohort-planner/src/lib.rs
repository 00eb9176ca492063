//! Decides whether a plan is worth splitting across agents, and if so turns
//! it into concrete sub-agents arranged in a dependency graph.
//!
//! - [`CoordinationAnalyzer`] scores an [`ExecutionPlan`](cohort_core::ExecutionPlan)
//!   and proposes a [`CoordinationStrategy`].
//! - [`SubAgentGenerator`] materializes a strategy into an
//!   [`AgentDependencyGraph`] with precomputed execution layers.

/// Multi-agent trigger heuristic and phase grouping.
pub mod analyzer;
/// Tunable thresholds and weights for the analyzer.
pub mod config;
/// Strategy to sub-agents and dependency graph.
pub mod generator;
mod phase_graph;
/// Strategy, sub-agent and graph types.
pub mod types;

pub use analyzer::CoordinationAnalyzer;
pub use config::AnalyzerConfig;
pub use generator::SubAgentGenerator;
pub use types::{
    AgentDependencyGraph, AgentEdge, AgentRole, CapabilityGap, CoordinationStrategy,
    CoordinationType, SubAgentDefinition,
};
