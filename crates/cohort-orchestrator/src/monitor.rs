use crate::types::{AgentMetrics, AgentState, AgentStatus};
use cohort_planner::AgentDependencyGraph;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracks state and metrics for every agent of the graph being run.
///
/// The orchestrator feeds it from observed coordination messages; nothing
/// here polls agent tasks directly.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
    /// Agent ids in generation order.
    order: Arc<RwLock<Vec<String>>>,
}

impl AgentMonitor {
    /// Empty monitor; call [`register`](Self::register) before a run.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            order: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Reset to one pending entry per agent of `graph`.
    pub async fn register(&self, graph: &AgentDependencyGraph) {
        let mut states = self.states.write().await;
        let mut order = self.order.write().await;
        states.clear();
        order.clear();
        for agent in &graph.agents {
            order.push(agent.id.clone());
            states.insert(
                agent.id.clone(),
                AgentState {
                    agent_id: agent.id.clone(),
                    role: agent.role,
                    status: AgentStatus::Pending,
                    current_phase: None,
                    metrics: AgentMetrics::default(),
                },
            );
        }
    }

    /// Count one observed message from `agent_id`.
    pub async fn record_message(&self, agent_id: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.metrics.messages += 1;
        }
    }

    /// Mark an agent as working on a phase.
    pub async fn start_phase(&self, agent_id: &str, phase: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.current_phase = Some(phase.to_string());
            state.status = AgentStatus::Running;
        }
    }

    /// Finish the current phase and add its duration.
    pub async fn complete_phase(&self, agent_id: &str, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.current_phase = None;
            state.metrics.phases_completed += 1;
            state.metrics.duration_ms += duration_ms;
        }
    }

    /// Record an error for an agent.
    pub async fn record_error(&self, agent_id: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.metrics.errors += 1;
        }
    }

    /// Set the status; terminal statuses clear the current phase.
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            if status.is_terminal() {
                state.current_phase = None;
            }
            state.status = status;
        }
    }

    /// Get a snapshot of all agent states, in the graph's generation order.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let order = self.order.read().await;
        order.iter().filter_map(|id| states.get(id).cloned()).collect()
    }

    /// Get the state of a specific agent.
    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent_id).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.phases_completed += state.metrics.phases_completed;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
            total.messages += state.metrics.messages;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cohort_core::{ExecutionPlan, GoalDefinition, PlanPhase};
    use cohort_planner::{CoordinationAnalyzer, SubAgentGenerator};

    fn graph_for(plan: &ExecutionPlan) -> AgentDependencyGraph {
        let strategy = CoordinationAnalyzer::default().analyze(plan);
        SubAgentGenerator::new()
            .generate(&GoalDefinition::new(&plan.goal_id, ""), plan, &[], &strategy)
            .unwrap()
    }

    async fn registered() -> AgentMonitor {
        let plan = ExecutionPlan::new(
            "two",
            vec![
                PlanPhase::new("fetch", "").with_capabilities(["net-fetch"]),
                PlanPhase::new("index", "")
                    .with_capabilities(["db-index"])
                    .with_dependencies(["fetch"]),
            ],
        );
        let monitor = AgentMonitor::new();
        monitor.register(&graph_for(&plan)).await;
        monitor
    }

    #[tokio::test]
    async fn test_register_starts_pending() {
        let monitor = registered().await;
        let states = monitor.snapshot().await;
        assert!(!states.is_empty());
        for state in &states {
            assert_eq!(state.status, AgentStatus::Pending);
            assert!(state.current_phase.is_none());
        }
    }

    #[tokio::test]
    async fn test_phase_lifecycle() {
        let monitor = registered().await;
        let id = monitor.snapshot().await[0].agent_id.clone();

        monitor.start_phase(&id, "fetch").await;
        let state = monitor.get_state(&id).await.unwrap();
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.current_phase.as_deref(), Some("fetch"));

        monitor.complete_phase(&id, 120).await;
        monitor.set_status(&id, AgentStatus::Completed).await;
        let state = monitor.get_state(&id).await.unwrap();
        assert_eq!(state.metrics.phases_completed, 1);
        assert_eq!(state.metrics.duration_ms, 120);
        assert!(state.current_phase.is_none());
    }

    #[tokio::test]
    async fn test_unknown_agent_ignored() {
        let monitor = registered().await;
        monitor.record_error("ghost").await;
        assert!(monitor.get_state("ghost").await.is_none());
        assert_eq!(monitor.aggregate_metrics().await.errors, 0);
    }

    #[tokio::test]
    async fn test_to_json() {
        let monitor = registered().await;
        let id = monitor.snapshot().await[0].agent_id.clone();
        monitor.record_message(&id).await;
        monitor.record_error(&id).await;
        let json = monitor.to_json().await;
        assert!(json["agents"].is_array());
        assert_eq!(json["aggregate"]["errors"], 1);
        assert_eq!(json["aggregate"]["messages"], 1);
    }

    #[tokio::test]
    async fn test_snapshot_follows_generation_order() {
        let phases = (0..12)
            .map(|i| PlanPhase::new(format!("p{i}"), "").with_capabilities([format!("d{i}-work")]))
            .collect();
        let graph = graph_for(&ExecutionPlan::new("wide", phases));
        assert_eq!(graph.agents.len(), 12);

        let monitor = AgentMonitor::new();
        monitor.register(&graph).await;
        let ids: Vec<String> = monitor
            .snapshot()
            .await
            .into_iter()
            .map(|s| s.agent_id)
            .collect();
        let expected: Vec<String> = (1..=12).map(|i| format!("agent-{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(monitor.to_json().await["agents"][9]["agent_id"], "agent-10");
    }
}
