//! Core types and error definitions for the Cohort coordination framework.
//!
//! This crate provides the foundational types shared across all Cohort crates:
//! the error taxonomy, the upstream planning model that the analyzer and
//! generator consume, and the coordination protocol every agent speaks.
//!
//! # Main types
//!
//! - [`CohortError`]: Unified error enum for all Cohort subsystems.
//! - [`CohortResult`]: Convenience alias for `Result<T, CohortError>`.
//! - [`ExecutionPlan`] / [`PlanPhase`]: The linear plan produced by the planning step.
//! - [`SkillDefinition`]: A skill and the capabilities it declares.
//! - [`CoordinationMessage`]: A validated, immutable inter-agent message.

/// Upstream planning model (goals, plans, phases, skills).
pub mod plan;
/// Typed inter-agent message protocol.
pub mod protocol;

pub use plan::{
    capability_domain, parse_duration_minutes, ExecutionPlan, GoalDefinition, PlanPhase,
    SkillDefinition,
};
pub use protocol::{
    CompletionStatus, CoordinationMessage, MessageKind, MessageType, Severity, PROTOCOL_VERSION,
};

/// Identifier of a sub-agent. Generated agents use `agent-<n>`.
pub type AgentId = String;

// --- Error types ---

/// Top-level error type for the Cohort framework.
///
/// Structural errors (`Validation`, `Cycle`) are defects in input data and are
/// never retried. `Storage` only comes out of explicit snapshot calls.
#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    /// Malformed input: a message payload, a plan reference, or a graph.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A dependency cycle; lists the nodes that could not be ordered.
    #[error("Dependency cycle detected among: {}", agents.join(", "))]
    Cycle {
        /// Names of the phases or agents left unplaced, sorted.
        agents: Vec<String>,
    },

    /// Failure while persisting or restoring a state snapshot.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Misuse of the orchestration runtime.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CohortError`].
pub type CohortResult<T> = Result<T, CohortError>;
