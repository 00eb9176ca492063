use cohort_core::AgentId;
use cohort_planner::AgentRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime status of an agent, owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum AgentStatus {
    /// Not started yet.
    Pending,
    /// Holds a concurrency permit and is executing phases.
    Running,
    /// Every phase succeeded.
    Completed,
    /// Stopped with an error or timed out.
    Failed {
        /// Error message, or `timeout`.
        reason: String,
    },
    /// Never started.
    Skipped {
        /// Why the agent was not started.
        reason: String,
    },
}

impl AgentStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed { .. } | AgentStatus::Skipped { .. }
        )
    }

    /// Value written to `agent.<id>.status` in the shared store.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed { .. } => "failed",
            AgentStatus::Skipped { .. } => "skipped",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Failed { reason } | AgentStatus::Skipped { reason } => {
                write!(f, "{} ({reason})", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Metrics tracked per agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Phases that finished successfully.
    pub phases_completed: u32,
    /// Phase failures observed.
    pub errors: u32,
    /// Summed phase durations.
    pub duration_ms: u64,
    /// Coordination messages sent.
    pub messages: u32,
}

/// Real-time snapshot of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent this state belongs to.
    pub agent_id: AgentId,
    /// Role within the graph.
    pub role: AgentRole,
    /// Current status.
    pub status: AgentStatus,
    /// Phase being executed, if any.
    pub current_phase: Option<String>,
    /// Counters for this agent.
    pub metrics: AgentMetrics,
}

/// Outcome of one `orchestrate` call. Partial success is represented, not
/// collapsed: callers decide what to do with completed work when `success`
/// is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// True only when no agent failed or was skipped.
    pub success: bool,
    /// In generation order.
    pub completed_agents: Vec<AgentId>,
    /// Agent id to error message.
    pub failed_agents: BTreeMap<AgentId, String>,
    /// Agent id to skip reason.
    pub skipped_agents: BTreeMap<AgentId, String>,
    /// Final status of every agent.
    pub statuses: BTreeMap<AgentId, AgentStatus>,
    /// Outputs reported by completed agents, keyed by phase name.
    pub agent_outputs: BTreeMap<AgentId, serde_json::Value>,
    /// Whether the run hit its timeout.
    pub timed_out: bool,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// One-line human-readable outcome.
    pub summary: String,
}

impl OrchestrationResult {
    /// Number of agents in the graph.
    pub fn total_agents(&self) -> usize {
        self.statuses.len()
    }

    /// Completed share of all agents; 0 for an empty graph.
    pub fn completion_rate(&self) -> f64 {
        if self.statuses.is_empty() {
            0.0
        } else {
            self.completed_agents.len() as f64 / self.statuses.len() as f64
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let status = AgentStatus::Failed {
            reason: "timeout".to_string(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("timeout"));
        assert!(json.contains("\"failed\""));
        let parsed: AgentStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!AgentStatus::Pending.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Skipped {
            reason: "dep".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_status_display() {
        let skipped = AgentStatus::Skipped {
            reason: "dependency agent-1 failed".into(),
        };
        assert_eq!(skipped.to_string(), "skipped (dependency agent-1 failed)");
        assert_eq!(AgentStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_completion_rate() {
        let mut result = OrchestrationResult {
            success: false,
            completed_agents: vec!["agent-1".into()],
            failed_agents: BTreeMap::new(),
            skipped_agents: BTreeMap::new(),
            statuses: BTreeMap::new(),
            agent_outputs: BTreeMap::new(),
            timed_out: false,
            duration_ms: 0,
            summary: String::new(),
        };
        assert_eq!(result.completion_rate(), 0.0);
        result
            .statuses
            .insert("agent-1".into(), AgentStatus::Completed);
        result.statuses.insert(
            "agent-2".into(),
            AgentStatus::Failed {
                reason: "boom".into(),
            },
        );
        assert_eq!(result.completion_rate(), 0.5);
        assert_eq!(result.total_agents(), 2);
    }
}
