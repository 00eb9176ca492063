//! Index-based views of a plan's phase dependencies.

use cohort_core::{capability_domain, CohortError, CohortResult, ExecutionPlan};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Phase dependencies resolved to plan positions.
///
/// References to unknown phases and self-references are dropped here; use
/// [`PhaseGraph::check_references`] first when they must be rejected.
pub(crate) struct PhaseGraph<'a> {
    plan: &'a ExecutionPlan,
    pub(crate) deps: Vec<Vec<usize>>,
    pub(crate) dependents: Vec<Vec<usize>>,
}

impl<'a> PhaseGraph<'a> {
    pub(crate) fn new(plan: &'a ExecutionPlan) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, phase) in plan.phases.iter().enumerate() {
            index.entry(phase.name.as_str()).or_insert(i);
        }

        let n = plan.phases.len();
        let mut deps = vec![Vec::new(); n];
        let mut dependents = vec![Vec::new(); n];
        for (i, phase) in plan.phases.iter().enumerate() {
            let resolved: BTreeSet<usize> = phase
                .dependencies
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .filter(|&d| d != i)
                .collect();
            for &d in &resolved {
                dependents[d].push(i);
            }
            deps[i] = resolved.into_iter().collect();
        }
        Self {
            plan,
            deps,
            dependents,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.deps.len()
    }

    /// Reject duplicate names, unknown references and self-dependencies.
    pub(crate) fn check_references(plan: &ExecutionPlan) -> CohortResult<()> {
        let mut names = HashSet::new();
        for phase in &plan.phases {
            if phase.name.trim().is_empty() {
                return Err(CohortError::Validation("Phase with empty name".into()));
            }
            if !names.insert(phase.name.as_str()) {
                return Err(CohortError::Validation(format!(
                    "Duplicate phase name: {}",
                    phase.name
                )));
            }
        }
        for phase in &plan.phases {
            for dep in &phase.dependencies {
                if dep == &phase.name {
                    return Err(CohortError::Validation(format!(
                        "Phase {} depends on itself",
                        phase.name
                    )));
                }
                if !names.contains(dep.as_str()) {
                    return Err(CohortError::Validation(format!(
                        "Phase {} depends on unknown phase {dep}",
                        phase.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Topological layers of the phases, or a `Cycle` naming the phases
    /// that could not be placed.
    pub(crate) fn layers(&self) -> CohortResult<Vec<Vec<usize>>> {
        layered(&self.deps).map_err(|stuck| CohortError::Cycle {
            agents: sorted_names(stuck.iter().map(|&i| self.plan.phases[i].name.clone())),
        })
    }

    /// Capability domains required by one phase.
    pub(crate) fn domains(&self, phase: usize) -> BTreeSet<String> {
        self.plan.phases[phase]
            .required_capabilities
            .iter()
            .map(|c| capability_domain(c))
            .collect()
    }
}

/// Repeatedly remove nodes whose prerequisites are all placed. Each layer
/// keeps index order. On a cycle, returns the unplaced nodes.
pub(crate) fn layered(deps: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let n = deps.len();
    let mut placed = vec![false; n];
    let mut remaining = n;
    let mut layers = Vec::new();

    while remaining > 0 {
        let layer: Vec<usize> = (0..n)
            .filter(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]))
            .collect();
        if layer.is_empty() {
            return Err((0..n).filter(|&i| !placed[i]).collect());
        }
        for &i in &layer {
            placed[i] = true;
        }
        remaining -= layer.len();
        layers.push(layer);
    }
    Ok(layers)
}

/// Nodes reachable from `start` by following `succ`, excluding `start`.
pub(crate) fn reachable(succ: &[Vec<usize>], start: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<usize> = succ[start].clone();
    while let Some(node) = stack.pop() {
        if seen.insert(node) {
            stack.extend(succ[node].iter().copied());
        }
    }
    seen
}

pub(crate) fn sorted_names(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = names.collect();
    names.sort();
    names
}
