use async_trait::async_trait;
use cohort_core::{CohortError, CohortResult, PlanPhase};
use cohort_planner::SubAgentDefinition;
use cohort_state::SharedStateStore;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

/// Store key holding the output of a finished phase.
pub fn phase_output_key(phase: &str) -> String {
    format!("phase.{phase}.output")
}

/// Store key holding the status of a phase.
pub fn phase_status_key(phase: &str) -> String {
    format!("phase.{phase}.status")
}

/// Store key holding an agent's coarse status.
pub fn agent_status_key(agent_id: &str) -> String {
    format!("agent.{agent_id}.status")
}

/// Store key holding an agent's progress in `0.0..=1.0`.
pub fn agent_progress_key(agent_id: &str) -> String {
    format!("agent.{agent_id}.progress")
}

/// Runs the work of a single phase on behalf of an agent.
///
/// Implementations read their inputs from `store` (typically the
/// `phase.<dependency>.output` keys) and return the phase output; the
/// orchestrator writes it back and announces it. An `Err` fails the agent.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Run one phase of `agent` and return its output.
    async fn execute_phase(
        &self,
        agent: &SubAgentDefinition,
        phase: &PlanPhase,
        store: &SharedStateStore,
    ) -> CohortResult<serde_json::Value>;
}

/// Stand-in executor that sleeps for a fixed delay per phase.
///
/// It refuses to run a phase whose dependency outputs are not yet in the
/// store, so scheduling mistakes surface as agent failures.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    delay: Duration,
    failing_phases: HashSet<String>,
}

impl SimulatedExecutor {
    /// Executor that sleeps `delay` per phase.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing_phases: HashSet::new(),
        }
    }

    /// Make the named phase fail every time it runs.
    pub fn with_failing_phase(mut self, phase: impl Into<String>) -> Self {
        self.failing_phases.insert(phase.into());
        self
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl PhaseExecutor for SimulatedExecutor {
    async fn execute_phase(
        &self,
        agent: &SubAgentDefinition,
        phase: &PlanPhase,
        store: &SharedStateStore,
    ) -> CohortResult<serde_json::Value> {
        let mut inputs = serde_json::Map::new();
        for dep in &phase.dependencies {
            let key = phase_output_key(dep);
            let value = store.get(&key).ok_or_else(|| {
                CohortError::Orchestrator(format!(
                    "phase {} started before its input {key} was available",
                    phase.name
                ))
            })?;
            inputs.insert(dep.clone(), value);
        }

        tokio::time::sleep(self.delay).await;

        if self.failing_phases.contains(&phase.name) {
            return Err(CohortError::Orchestrator(format!(
                "simulated failure in phase {}",
                phase.name
            )));
        }

        Ok(json!({
            "phase": phase.name,
            "agent": agent.id,
            "inputs": inputs.keys().collect::<Vec<_>>(),
        }))
    }
}
