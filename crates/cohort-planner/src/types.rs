use cohort_core::{AgentId, CohortError, CohortResult, GoalDefinition, PlanPhase, SkillDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Role of a generated sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Exactly one per graph; owns the most upstream work.
    Leader,
    /// Executes its phases and hands results downstream.
    Worker,
    /// Owns only observational (cross-cutting) phases.
    Monitor,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Leader => write!(f, "leader"),
            AgentRole::Worker => write!(f, "worker"),
            AgentRole::Monitor => write!(f, "monitor"),
        }
    }
}

/// Shape of the proposed coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationType {
    /// One agent runs the whole plan.
    Single,
    /// Independent groups run side by side.
    Parallel,
    /// Groups form a single chain.
    Sequential,
    /// Mixed parallel and sequential structure.
    Hybrid,
}

impl std::fmt::Display for CoordinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationType::Single => write!(f, "single"),
            CoordinationType::Parallel => write!(f, "parallel"),
            CoordinationType::Sequential => write!(f, "sequential"),
            CoordinationType::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// The analyzer's recommendation for a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationStrategy {
    /// Recommended shape.
    pub coordination_type: CoordinationType,
    /// Number of proposed agents.
    pub agent_count: usize,
    /// Phase names per proposed agent, in generation order.
    pub agent_groupings: Vec<Vec<String>>,
    /// In `[0, 1)`; grows with group count and cross-group dependencies.
    pub coordination_overhead: f64,
    /// In `[0, 1]`; share of total time saved by running groups side by side.
    pub parallelization_benefit: f64,
    /// Why this strategy was chosen.
    pub rationale: String,
}

impl CoordinationStrategy {
    /// One agent owning every phase.
    pub fn single(phase_names: Vec<String>, rationale: impl Into<String>) -> Self {
        let agent_groupings = if phase_names.is_empty() {
            Vec::new()
        } else {
            vec![phase_names]
        };
        Self {
            coordination_type: CoordinationType::Single,
            agent_count: 1,
            agent_groupings,
            coordination_overhead: 0.0,
            parallelization_benefit: 0.0,
            rationale: rationale.into(),
        }
    }

    /// Whether more than one agent is proposed.
    pub fn is_multi_agent(&self) -> bool {
        self.coordination_type != CoordinationType::Single
    }
}

/// A required capability that no available skill declares. Non-fatal: the
/// agent is still generated and flagged as under-provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Agent {agent_id} lacks skills for: {}", missing.join(", "))]
pub struct CapabilityGap {
    /// Agent that lacks the skills.
    pub agent_id: AgentId,
    /// Capabilities no skill covers.
    pub missing: Vec<String>,
}

/// One planned, independently executable unit of work.
///
/// Immutable once the graph is generated; runtime status lives in the
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentDefinition {
    /// `agent-<n>`, 1-based in generation order.
    pub id: AgentId,
    /// Human-readable name derived from the owned phases.
    pub name: String,
    /// Role within the graph.
    pub role: AgentRole,
    /// Id of the goal the graph was generated for.
    pub parent_goal_id: String,
    /// Goal narrowed to this agent's phases.
    pub sub_goal: GoalDefinition,
    /// Owned phases in an order that respects their dependencies.
    pub phases: Vec<PlanPhase>,
    /// Skills that cover at least one required capability.
    pub skills: Vec<SkillDefinition>,
    /// Direct prerequisites after transitive reduction.
    pub dependencies: Vec<AgentId>,
    /// State keys this agent reads or writes.
    pub shared_state_keys: Vec<String>,
    /// Sum of the owned phase estimates.
    pub estimated_minutes: f64,
    /// Set when some required capability has no skill.
    #[serde(default)]
    pub under_provisioned: bool,
    /// Capabilities behind `under_provisioned`.
    #[serde(default)]
    pub missing_capabilities: Vec<String>,
}

impl SubAgentDefinition {
    /// Owned phase names, in execution order.
    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    /// Whether the agent owns phase `name`.
    pub fn owns_phase(&self, name: &str) -> bool {
        self.phases.iter().any(|p| p.name == name)
    }

    /// Distinct required capabilities of the owned phases, in phase order.
    pub fn required_capabilities(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.phases
            .iter()
            .flat_map(|p| p.required_capabilities.iter())
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }
}

/// A prerequisite relation: `to` may only start after `from` completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentEdge {
    /// Prerequisite agent.
    pub from: AgentId,
    /// Dependent agent.
    pub to: AgentId,
}

/// Sub-agents, their transitively reduced dependency edges and the
/// precomputed execution layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDependencyGraph {
    /// Goal the graph was generated for.
    pub goal_id: String,
    /// Shape proposed by the analyzer.
    pub coordination_type: CoordinationType,
    /// Agents in generation order.
    pub agents: Vec<SubAgentDefinition>,
    /// Reduced prerequisite edges.
    pub edges: Vec<AgentEdge>,
    /// Layers of agent ids; every agent appears after all its prerequisites.
    pub execution_order: Vec<Vec<AgentId>>,
    /// Agents with missing capabilities.
    #[serde(default)]
    pub capability_gaps: Vec<CapabilityGap>,
}

impl AgentDependencyGraph {
    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the graph has no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Look up an agent by id.
    pub fn agent(&self, id: &str) -> Option<&SubAgentDefinition> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Agents that list `id` as a direct prerequisite, in generation order.
    pub fn dependents_of(&self, id: &str) -> Vec<&SubAgentDefinition> {
        self.agents
            .iter()
            .filter(|a| a.dependencies.iter().any(|d| d == id))
            .collect()
    }

    /// The single leader agent.
    pub fn leader(&self) -> Option<&SubAgentDefinition> {
        self.agents.iter().find(|a| a.role == AgentRole::Leader)
    }

    /// Zero-based layer index of an agent.
    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.execution_order
            .iter()
            .position(|layer| layer.iter().any(|a| a == id))
    }

    /// Agents layer by layer, in generation order within a layer.
    pub fn agents_in_layer_order(&self) -> Vec<&SubAgentDefinition> {
        self.execution_order
            .iter()
            .flatten()
            .filter_map(|id| self.agent(id))
            .collect()
    }

    /// Check the structural invariants a scheduler relies on: unique ids,
    /// known dependencies, edges matching dependencies, one leader, and a
    /// layering that places every agent exactly once after its prerequisites.
    pub fn validate(&self) -> CohortResult<()> {
        let mut ids = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(invalid("agent with empty id"));
            }
            if !ids.insert(agent.id.as_str()) {
                return Err(invalid(format!("duplicate agent id {}", agent.id)));
            }
        }

        for agent in &self.agents {
            for dep in &agent.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "{} depends on unknown agent {dep}",
                        agent.id
                    )));
                }
                if dep == &agent.id {
                    return Err(invalid(format!("{} depends on itself", agent.id)));
                }
            }
        }

        let declared: HashSet<(&str, &str)> = self
            .agents
            .iter()
            .flat_map(|a| a.dependencies.iter().map(move |d| (d.as_str(), a.id.as_str())))
            .collect();
        let listed: HashSet<(&str, &str)> = self
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        if declared != listed {
            return Err(invalid("edges do not match agent dependencies"));
        }

        if !self.agents.is_empty() {
            let leaders = self
                .agents
                .iter()
                .filter(|a| a.role == AgentRole::Leader)
                .count();
            if leaders != 1 {
                return Err(invalid(format!("expected exactly one leader, found {leaders}")));
            }
        }

        let mut layer_of: HashMap<&str, usize> = HashMap::new();
        for (index, layer) in self.execution_order.iter().enumerate() {
            for id in layer {
                if !ids.contains(id.as_str()) {
                    return Err(invalid(format!("execution order lists unknown agent {id}")));
                }
                if layer_of.insert(id.as_str(), index).is_some() {
                    return Err(invalid(format!("agent {id} is scheduled twice")));
                }
            }
        }
        if layer_of.len() != ids.len() {
            return Err(invalid("execution order does not cover every agent"));
        }
        for agent in &self.agents {
            let own = layer_of.get(agent.id.as_str()).copied().unwrap_or(0);
            for dep in &agent.dependencies {
                let dep_layer = layer_of.get(dep.as_str()).copied().unwrap_or(usize::MAX);
                if dep_layer >= own {
                    return Err(invalid(format!(
                        "{} is scheduled no later than its prerequisite {dep}",
                        agent.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Pretty JSON for downstream inspection.
    pub fn to_json(&self) -> CohortResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn invalid(reason: impl Into<String>) -> CohortError {
    CohortError::Validation(format!("Malformed dependency graph: {}", reason.into()))
}
