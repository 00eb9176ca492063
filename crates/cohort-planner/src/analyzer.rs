use crate::config::AnalyzerConfig;
use crate::phase_graph::{layered, PhaseGraph};
use crate::types::{CoordinationStrategy, CoordinationType};
use cohort_core::ExecutionPlan;
use std::collections::BTreeSet;
use tracing::info;

/// Decides between single- and multi-agent execution and proposes a grouping
/// of phases. Pure and deterministic: the same plan always yields the same
/// strategy.
#[derive(Debug, Clone, Default)]
pub struct CoordinationAnalyzer {
    config: AnalyzerConfig,
}

/// Phase groups plus the group-level dependency edges between them.
struct Grouping {
    groups: Vec<Vec<usize>>,
    edges: BTreeSet<(usize, usize)>,
}

impl CoordinationAnalyzer {
    /// Analyzer with custom thresholds.
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Active thresholds.
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Score `plan` and recommend a coordination strategy. Never fails.
    pub fn analyze(&self, plan: &ExecutionPlan) -> CoordinationStrategy {
        if plan.phases.is_empty() {
            return CoordinationStrategy::single(Vec::new(), "Plan has no phases");
        }

        let all_names: Vec<String> = plan.phases.iter().map(|p| p.name.clone()).collect();
        let triggers = self.triggers(plan);
        if triggers.is_empty() {
            let strategy = CoordinationStrategy::single(
                all_names,
                format!(
                    "Single agent: {} phases, {:.0} minutes and {} capability domains are below every threshold",
                    plan.phases.len(),
                    plan.total_minutes(self.config.default_phase_minutes),
                    plan.capability_domains().len()
                ),
            );
            info!(goal_id = %plan.goal_id, coordination = %strategy.coordination_type, "Plan analyzed");
            return strategy;
        }

        let graph = PhaseGraph::new(plan);
        let grouping = group_phases(&graph);
        if grouping.groups.len() <= 1 {
            return CoordinationStrategy::single(
                all_names,
                format!(
                    "Single agent: {} but every phase belongs to one dependency chain",
                    triggers.join(", ")
                ),
            );
        }

        let group_count = grouping.groups.len();
        let minutes: Vec<f64> = grouping
            .groups
            .iter()
            .map(|g| {
                g.iter()
                    .map(|&i| plan.phases[i].minutes_or(self.config.default_phase_minutes))
                    .sum()
            })
            .collect();

        let coordination_type = classify(group_count, &grouping.edges);
        let parallelization_benefit = parallelization_benefit(&minutes, &grouping.edges);
        let x = self.config.group_weight * (group_count - 1) as f64
            + self.config.edge_weight * grouping.edges.len() as f64;
        let coordination_overhead = x / (1.0 + x);

        let isolated = isolated_groups(group_count, &grouping.edges);
        let rationale = format!(
            "Multi-agent coordination recommended: {}. {} groups, {} cross-group dependencies, {} independent groups",
            triggers.join(", "),
            group_count,
            grouping.edges.len(),
            isolated
        );

        let strategy = CoordinationStrategy {
            coordination_type,
            agent_count: group_count,
            agent_groupings: grouping
                .groups
                .iter()
                .map(|g| g.iter().map(|&i| plan.phases[i].name.clone()).collect())
                .collect(),
            coordination_overhead,
            parallelization_benefit,
            rationale,
        };
        info!(
            goal_id = %plan.goal_id,
            coordination = %strategy.coordination_type,
            agents = strategy.agent_count,
            overhead = strategy.coordination_overhead,
            benefit = strategy.parallelization_benefit,
            "Plan analyzed"
        );
        strategy
    }

    /// Human-readable list of the thresholds the plan meets.
    fn triggers(&self, plan: &ExecutionPlan) -> Vec<String> {
        let cfg = &self.config;
        let mut reasons = Vec::new();

        let phases = plan.phases.len();
        if phases >= cfg.phase_count_threshold {
            reasons.push(format!("{phases} phases (>= {})", cfg.phase_count_threshold));
        }
        let minutes = plan.total_minutes(cfg.default_phase_minutes);
        if minutes > cfg.duration_threshold_minutes {
            reasons.push(format!(
                "{minutes:.0} estimated minutes (> {:.0})",
                cfg.duration_threshold_minutes
            ));
        }
        let domains = plan.capability_domains().len();
        if domains >= cfg.domain_diversity_threshold {
            reasons.push(format!(
                "{domains} capability domains (>= {})",
                cfg.domain_diversity_threshold
            ));
        }
        reasons
    }
}

/// One group per phase, except that a phase joins its sole prerequisite's
/// group when it is that prerequisite's only dependent and both share a
/// capability domain. Independent phases always stay apart.
fn group_phases(graph: &PhaseGraph<'_>) -> Grouping {
    let n = graph.len();
    let mut group_of = vec![usize::MAX; n];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for i in 0..n {
        if let [prereq] = graph.deps[i].as_slice() {
            let prereq = *prereq;
            let sole_dependent = graph.dependents[prereq].len() == 1;
            if prereq < i
                && sole_dependent
                && !graph.domains(i).is_disjoint(&graph.domains(prereq))
            {
                let g = group_of[prereq];
                groups[g].push(i);
                group_of[i] = g;
                continue;
            }
        }
        group_of[i] = groups.len();
        groups.push(vec![i]);
    }

    let mut edges = BTreeSet::new();
    for i in 0..n {
        for &d in &graph.deps[i] {
            let (from, to) = (group_of[d], group_of[i]);
            if from != to {
                edges.insert((from, to));
            }
        }
    }
    Grouping { groups, edges }
}

fn isolated_groups(group_count: usize, edges: &BTreeSet<(usize, usize)>) -> usize {
    let connected: BTreeSet<usize> = edges.iter().flat_map(|&(a, b)| [a, b]).collect();
    group_count - connected.len()
}

fn classify(group_count: usize, edges: &BTreeSet<(usize, usize)>) -> CoordinationType {
    if group_count <= 1 {
        CoordinationType::Single
    } else if isolated_groups(group_count, edges) * 2 > group_count {
        CoordinationType::Parallel
    } else if is_single_chain(group_count, edges) {
        CoordinationType::Sequential
    } else {
        CoordinationType::Hybrid
    }
}

/// True when the groups form one path `g0 -> g1 -> ... -> gk` covering all of them.
fn is_single_chain(group_count: usize, edges: &BTreeSet<(usize, usize)>) -> bool {
    if edges.len() != group_count - 1 {
        return false;
    }
    let mut next = vec![None; group_count];
    let mut indegree = vec![0usize; group_count];
    for &(a, b) in edges {
        if next[a].is_some() {
            return false;
        }
        next[a] = Some(b);
        indegree[b] += 1;
    }
    let mut heads = (0..group_count).filter(|&g| indegree[g] == 0);
    let (Some(head), None) = (heads.next(), heads.next()) else {
        return false;
    };

    let mut visited = vec![false; group_count];
    let mut current = Some(head);
    let mut count = 0;
    while let Some(g) = current {
        if visited[g] {
            return false;
        }
        visited[g] = true;
        count += 1;
        current = next[g];
    }
    count == group_count
}

/// `1 - critical_path / total` over group durations. Zero when the group
/// graph is cyclic, carries no time, or its durations overflow.
fn parallelization_benefit(minutes: &[f64], edges: &BTreeSet<(usize, usize)>) -> f64 {
    let total: f64 = minutes.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return 0.0;
    }
    let mut deps = vec![Vec::new(); minutes.len()];
    for &(a, b) in edges {
        deps[b].push(a);
    }
    let Ok(layers) = layered(&deps) else {
        return 0.0;
    };

    let mut finish = vec![0.0f64; minutes.len()];
    for &g in layers.iter().flatten() {
        let start = deps[g].iter().map(|&d| finish[d]).fold(0.0, f64::max);
        finish[g] = start + minutes[g];
    }
    let critical = finish.iter().copied().fold(0.0, f64::max);
    let ratio = critical / total;
    if !ratio.is_finite() {
        return 0.0;
    }
    (1.0 - ratio).clamp(0.0, 1.0)
}
