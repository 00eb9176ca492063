use crate::config::AnalyzerConfig;
use crate::phase_graph::{layered, reachable, sorted_names, PhaseGraph};
use crate::types::{
    AgentDependencyGraph, AgentEdge, AgentRole, CapabilityGap, CoordinationStrategy,
    CoordinationType, SubAgentDefinition,
};
use cohort_core::{
    capability_domain, CohortError, CohortResult, ExecutionPlan, GoalDefinition, PlanPhase,
    SkillDefinition,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

/// Turns a [`CoordinationStrategy`] into concrete sub-agents and their
/// dependency graph.
#[derive(Debug, Clone)]
pub struct SubAgentGenerator {
    default_phase_minutes: f64,
}

impl Default for SubAgentGenerator {
    fn default() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }
}

impl SubAgentGenerator {
    /// Generator with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the analyzer's fallback estimate for unparseable phase durations.
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            default_phase_minutes: config.default_phase_minutes,
        }
    }

    /// Build the dependency graph for `plan` under `strategy`.
    ///
    /// Fails with `Validation` on malformed plans or groupings and with
    /// `Cycle` on cyclic dependencies; no partial graph is produced.
    /// Capability gaps are logged and recorded, never returned as errors.
    pub fn generate(
        &self,
        goal: &GoalDefinition,
        plan: &ExecutionPlan,
        skills: &[SkillDefinition],
        strategy: &CoordinationStrategy,
    ) -> CohortResult<AgentDependencyGraph> {
        PhaseGraph::check_references(plan)?;
        let phase_graph = PhaseGraph::new(plan);
        let phase_layers = phase_graph.layers().map_err(|e| {
            error!(goal_id = %goal.id, error = %e, "Cyclic phase dependencies");
            e
        })?;

        // Rank phases so that owned phases run in dependency order.
        let mut rank = vec![(0usize, 0usize); plan.phases.len()];
        for (layer, phases) in phase_layers.iter().enumerate() {
            for &p in phases {
                rank[p] = (layer, p);
            }
        }

        let groups = self.resolve_groups(plan, strategy)?;
        let mut group_of = vec![0usize; plan.phases.len()];
        for (g, members) in groups.iter().enumerate() {
            for &p in members {
                group_of[p] = g;
            }
        }

        // Agent-level edges: A -> B when some phase of B depends on a phase of A.
        let agent_count = groups.len();
        let mut succ: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); agent_count];
        for (p, deps) in phase_graph.deps.iter().enumerate() {
            for &d in deps {
                let (from, to) = (group_of[d], group_of[p]);
                if from != to {
                    succ[from].insert(to);
                }
            }
        }
        let ids: Vec<String> = (1..=agent_count).map(|n| format!("agent-{n}")).collect();

        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); agent_count];
        for (from, tos) in succ.iter().enumerate() {
            for &to in tos {
                preds[to].push(from);
            }
        }
        let layers = layered(&preds).map_err(|stuck| {
            let err = CohortError::Cycle {
                agents: sorted_names(stuck.iter().map(|&i| ids[i].clone())),
            };
            error!(goal_id = %goal.id, error = %err, "Grouping creates an agent cycle");
            err
        })?;

        let reduced = transitive_reduction(&succ);
        let mut reduced_preds: Vec<Vec<usize>> = vec![Vec::new(); agent_count];
        for (from, tos) in reduced.iter().enumerate() {
            for &to in tos {
                reduced_preds[to].push(from);
            }
        }
        let succ_lists: Vec<Vec<usize>> = succ.iter().map(|s| s.iter().copied().collect()).collect();
        let downstream: Vec<usize> = (0..agent_count)
            .map(|a| reachable(&succ_lists, a).len())
            .collect();

        let monitors: Vec<bool> = groups
            .iter()
            .map(|g| !g.is_empty() && g.iter().all(|&p| plan.phases[p].observational))
            .collect();
        let leader = pick_leader(&monitors, &reduced_preds, &downstream);

        let mut agents = Vec::with_capacity(agent_count);
        let mut capability_gaps = Vec::new();
        for (g, members) in groups.iter().enumerate() {
            let mut members = members.clone();
            members.sort_by_key(|&p| rank[p]);
            let phases: Vec<PlanPhase> = members.iter().map(|&p| plan.phases[p].clone()).collect();

            let role = if g == leader {
                AgentRole::Leader
            } else if monitors[g] {
                AgentRole::Monitor
            } else {
                AgentRole::Worker
            };
            let external_inputs: BTreeSet<&str> = members
                .iter()
                .flat_map(|&p| phase_graph.deps[p].iter())
                .filter(|&&d| group_of[d] != g)
                .map(|&d| plan.phases[d].name.as_str())
                .collect();

            let mut agent = self.build_agent(
                g + 1,
                &ids[g],
                role,
                goal,
                phases,
                skills,
                &external_inputs,
            );
            agent.dependencies = reduced_preds[g].iter().map(|&d| ids[d].clone()).collect();

            if !agent.missing_capabilities.is_empty() {
                let gap = CapabilityGap {
                    agent_id: agent.id.clone(),
                    missing: agent.missing_capabilities.clone(),
                };
                warn!(agent_id = %agent.id, error = %gap, "Capability gap");
                capability_gaps.push(gap);
            }
            agents.push(agent);
        }

        let edges = reduced
            .iter()
            .enumerate()
            .flat_map(|(from, tos)| {
                let ids = &ids;
                tos.iter().map(move |&to| AgentEdge {
                    from: ids[from].clone(),
                    to: ids[to].clone(),
                })
            })
            .collect();

        let graph = AgentDependencyGraph {
            goal_id: goal.id.clone(),
            coordination_type: if agent_count <= 1 {
                CoordinationType::Single
            } else {
                strategy.coordination_type
            },
            agents,
            edges,
            execution_order: layers
                .iter()
                .map(|layer| layer.iter().map(|&i| ids[i].clone()).collect())
                .collect(),
            capability_gaps,
        };
        info!(
            goal_id = %goal.id,
            agents = graph.len(),
            layers = graph.execution_order.len(),
            gaps = graph.capability_gaps.len(),
            "Dependency graph generated"
        );
        Ok(graph)
    }

    /// Phase indices per agent. A `single` strategy (or one with no
    /// groupings) yields one group with every phase; phases the strategy
    /// leaves out get their own trailing groups.
    fn resolve_groups(
        &self,
        plan: &ExecutionPlan,
        strategy: &CoordinationStrategy,
    ) -> CohortResult<Vec<Vec<usize>>> {
        let all: Vec<usize> = (0..plan.phases.len()).collect();
        if strategy.coordination_type == CoordinationType::Single
            || strategy.agent_groupings.is_empty()
        {
            return Ok(vec![all]);
        }

        let index = plan.phase_positions();
        let mut assigned = vec![false; plan.phases.len()];
        let mut groups = Vec::new();

        for (g, names) in strategy.agent_groupings.iter().enumerate() {
            if names.is_empty() {
                return Err(CohortError::Validation(format!("Grouping {g} is empty")));
            }
            let mut members = Vec::with_capacity(names.len());
            for name in names {
                let &p = index.get(name.as_str()).ok_or_else(|| {
                    CohortError::Validation(format!("Grouping {g} names unknown phase {name}"))
                })?;
                if assigned[p] {
                    return Err(CohortError::Validation(format!(
                        "Phase {name} is assigned to more than one grouping"
                    )));
                }
                assigned[p] = true;
                members.push(p);
            }
            groups.push(members);
        }

        for p in all {
            if !assigned[p] {
                info!(phase = %plan.phases[p].name, "Phase missing from strategy, giving it its own agent");
                groups.push(vec![p]);
            }
        }
        Ok(groups)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_agent(
        &self,
        n: usize,
        id: &str,
        role: AgentRole,
        goal: &GoalDefinition,
        phases: Vec<PlanPhase>,
        skills: &[SkillDefinition],
        external_inputs: &BTreeSet<&str>,
    ) -> SubAgentDefinition {
        let mut capabilities: Vec<String> = Vec::new();
        for cap in phases.iter().flat_map(|p| p.required_capabilities.iter()) {
            if !capabilities.contains(cap) {
                capabilities.push(cap.clone());
            }
        }

        let assigned: Vec<SkillDefinition> = skills
            .iter()
            .filter(|s| capabilities.iter().any(|c| s.covers(c)))
            .cloned()
            .collect();
        let missing: Vec<String> = capabilities
            .iter()
            .filter(|c| !assigned.iter().any(|s| s.covers(c)))
            .cloned()
            .collect();

        let domain = dominant_domain(&capabilities);
        let descriptions: Vec<&str> = phases
            .iter()
            .map(|p| {
                if p.description.trim().is_empty() {
                    p.name.as_str()
                } else {
                    p.description.as_str()
                }
            })
            .collect();
        let sub_goal = GoalDefinition {
            id: format!("{}/{id}", goal.id),
            description: format!("Sub-goal {n}: {}", descriptions.join("; ")),
            domain: domain.clone(),
            constraints: goal.constraints.clone(),
            success_criteria: phases
                .iter()
                .flat_map(|p| p.success_indicators.iter().cloned())
                .collect(),
        };

        let mut shared_state_keys: Vec<String> = external_inputs
            .iter()
            .map(|dep| format!("phase.{dep}.output"))
            .collect();
        for phase in &phases {
            shared_state_keys.push(format!("phase.{}.output", phase.name));
            shared_state_keys.push(format!("phase.{}.status", phase.name));
        }
        shared_state_keys.push(format!("agent.{id}.status"));
        shared_state_keys.push(format!("agent.{id}.progress"));

        let estimated_minutes = phases
            .iter()
            .map(|p| p.minutes_or(self.default_phase_minutes))
            .sum();

        SubAgentDefinition {
            id: id.to_string(),
            name: format!("{id}-{domain}"),
            role,
            parent_goal_id: goal.id.clone(),
            sub_goal,
            phases,
            skills: assigned,
            dependencies: Vec::new(),
            shared_state_keys,
            estimated_minutes,
            under_provisioned: !missing.is_empty(),
            missing_capabilities: missing,
        }
    }
}

/// Most frequent capability domain; ties go to the alphabetically first.
fn dominant_domain(capabilities: &[String]) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for cap in capabilities {
        *counts.entry(capability_domain(cap)).or_default() += 1;
    }
    let mut best: Option<(&String, usize)> = None;
    for (domain, &count) in &counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((domain, count));
        }
    }
    best.map_or_else(|| "general".to_string(), |(d, _)| d.clone())
}

/// Drop every edge implied by a longer path.
fn transitive_reduction(succ: &[BTreeSet<usize>]) -> Vec<BTreeSet<usize>> {
    let lists: Vec<Vec<usize>> = succ.iter().map(|s| s.iter().copied().collect()).collect();
    succ.iter()
        .map(|tos| {
            tos.iter()
                .copied()
                .filter(|&to| {
                    !tos.iter()
                        .any(|&via| via != to && reachable(&lists, via).contains(&to))
                })
                .collect()
        })
        .collect()
}

/// The non-monitor root with the most downstream agents, earliest on ties.
/// Falls back to any non-monitor, then to the first agent.
fn pick_leader(monitors: &[bool], preds: &[Vec<usize>], downstream: &[usize]) -> usize {
    let best = |candidates: Vec<usize>| -> Option<usize> {
        let mut best: Option<usize> = None;
        for c in candidates {
            if best.map_or(true, |b| downstream[c] > downstream[b]) {
                best = Some(c);
            }
        }
        best
    };
    let n = monitors.len();
    best((0..n).filter(|&a| !monitors[a] && preds[a].is_empty()).collect())
        .or_else(|| best((0..n).filter(|&a| !monitors[a]).collect()))
        .unwrap_or(0)
}
