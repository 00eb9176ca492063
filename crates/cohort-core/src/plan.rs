use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// The goal a plan was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalDefinition {
    /// Opaque identifier assigned by the planning step.
    pub id: String,
    /// Primary objective, in prose.
    pub description: String,
    /// Coarse domain label, e.g. `data-processing`.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Limits the plan must respect.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Conditions under which the goal counts as met.
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

fn default_domain() -> String {
    "general".to_string()
}

impl GoalDefinition {
    /// Create a goal in the `general` domain.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            domain: default_domain(),
            constraints: Vec::new(),
            success_criteria: Vec::new(),
        }
    }

    /// Set the domain label.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPhase {
    /// Unique name within the plan; other phases reference it in `dependencies`.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Capability names such as `data-ingest`; the prefix is the domain.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Names of phases that must finish before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Human-readable estimate such as `"30 minutes"` or `"2 hours"`.
    #[serde(default)]
    pub estimated_duration: String,
    /// Cross-cutting phases (auditing, monitoring) that observe the others.
    #[serde(default)]
    pub observational: bool,
    /// Checks that decide whether the phase succeeded.
    #[serde(default)]
    pub success_indicators: Vec<String>,
}

impl PlanPhase {
    /// Create a phase with no capabilities, no dependencies and no estimate.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_capabilities: Vec::new(),
            dependencies: Vec::new(),
            estimated_duration: String::new(),
            observational: false,
            success_indicators: Vec::new(),
        }
    }

    /// Set the required capabilities.
    pub fn with_capabilities<S: Into<String>>(mut self, caps: impl IntoIterator<Item = S>) -> Self {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the prerequisite phase names.
    pub fn with_dependencies<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the duration estimate.
    pub fn with_duration(mut self, estimate: impl Into<String>) -> Self {
        self.estimated_duration = estimate.into();
        self
    }

    /// Mark the phase as cross-cutting/observational.
    pub fn observational(mut self) -> Self {
        self.observational = true;
        self
    }

    /// Estimated minutes, falling back to `default_minutes` when unparseable.
    pub fn minutes_or(&self, default_minutes: f64) -> f64 {
        parse_duration_minutes(&self.estimated_duration).unwrap_or(default_minutes)
    }
}

/// An ordered, linear plan produced by the upstream planning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Id of the goal this plan serves.
    #[serde(default)]
    pub goal_id: String,
    /// Phases in plan order.
    pub phases: Vec<PlanPhase>,
    /// Overall estimate; when absent the phase estimates are summed.
    #[serde(default)]
    pub total_estimated_duration: Option<String>,
}

impl ExecutionPlan {
    /// Create a plan from phases.
    pub fn new(goal_id: impl Into<String>, phases: Vec<PlanPhase>) -> Self {
        Self {
            goal_id: goal_id.into(),
            phases,
            total_estimated_duration: None,
        }
    }

    /// Map of phase name to its position in the plan.
    pub fn phase_positions(&self) -> HashMap<&str, usize> {
        self.phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect()
    }

    /// Total estimate in minutes.
    pub fn total_minutes(&self, default_phase_minutes: f64) -> f64 {
        if let Some(total) = self
            .total_estimated_duration
            .as_deref()
            .and_then(parse_duration_minutes)
        {
            return total;
        }
        self.phases
            .iter()
            .map(|p| p.minutes_or(default_phase_minutes))
            .sum()
    }

    /// Distinct capability domains across every phase.
    pub fn capability_domains(&self) -> BTreeSet<String> {
        self.phases
            .iter()
            .flat_map(|p| p.required_capabilities.iter())
            .map(|c| capability_domain(c))
            .collect()
    }
}

/// A skill the skill-matching step made available, with its declared capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    /// Unique skill name.
    pub name: String,
    /// Capabilities the skill declares.
    pub capabilities: Vec<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl SkillDefinition {
    /// Create a skill declaring the given capabilities.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            description: String::new(),
        }
    }

    /// Whether the skill declares `capability`.
    pub fn covers(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Domain of a capability name: the segment before the first `-`, or before
/// the first `_` when there is no dash (`data-processing-csv` -> `data`).
pub fn capability_domain(capability: &str) -> String {
    let capability = capability.trim();
    let sep = if capability.contains('-') { '-' } else { '_' };
    capability
        .split(sep)
        .next()
        .unwrap_or(capability)
        .to_lowercase()
}

/// Parse an estimate like `"30 minutes"`, `"2 hours"`, `"1.5 days"` or a bare
/// number (minutes). Returns `None` when nothing numeric with a known unit is
/// found, or when the result does not fit in a finite `f64`.
pub fn parse_duration_minutes(text: &str) -> Option<f64> {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    if let Ok(bare) = lowered.parse::<f64>() {
        return (bare.is_finite() && bare >= 0.0).then_some(bare);
    }

    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    for pair in tokens.windows(2) {
        let Ok(amount) = pair[0].parse::<f64>() else {
            continue;
        };
        if !amount.is_finite() || amount < 0.0 {
            continue;
        }
        if let Some(factor) = unit_factor(pair[1]) {
            let minutes = amount * factor;
            return minutes.is_finite().then_some(minutes);
        }
    }
    None
}

fn unit_factor(unit: &str) -> Option<f64> {
    let unit = unit.trim_end_matches(|c: char| !c.is_alphabetic());
    if unit.starts_with("day") {
        Some(24.0 * 60.0)
    } else if unit.starts_with("hour") || unit == "hr" || unit == "hrs" || unit == "h" {
        Some(60.0)
    } else if unit.starts_with("min") || unit == "m" {
        Some(1.0)
    } else if unit.starts_with("sec") || unit == "s" {
        Some(1.0 / 60.0)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration_minutes("30 minutes"), Some(30.0));
        assert_eq!(parse_duration_minutes("2 hours"), Some(120.0));
        assert_eq!(parse_duration_minutes("1.5 days"), Some(2160.0));
        assert_eq!(parse_duration_minutes("45 min"), Some(45.0));
        assert_eq!(parse_duration_minutes("about 3 hours total"), Some(180.0));
        assert_eq!(parse_duration_minutes("90"), Some(90.0));
    }

    #[test]
    fn test_parse_duration_unparseable() {
        assert_eq!(parse_duration_minutes(""), None);
        assert_eq!(parse_duration_minutes("a while"), None);
        assert_eq!(parse_duration_minutes("-5 minutes"), None);
    }

    #[test]
    fn test_parse_duration_overflow_is_rejected() {
        assert_eq!(parse_duration_minutes("1e306 days"), None);
        assert_eq!(parse_duration_minutes("1e400"), None);
        assert_eq!(parse_duration_minutes("1e300 hours"), Some(6e301));
        let phase = PlanPhase::new("huge", "").with_duration("1e306 days");
        assert_eq!(phase.minutes_or(30.0), 30.0);
    }

    #[test]
    fn test_capability_domain() {
        assert_eq!(capability_domain("data-processing-csv"), "data");
        assert_eq!(capability_domain("security_scan"), "security");
        assert_eq!(capability_domain("reporting"), "reporting");
        assert_eq!(capability_domain("Data-Export"), "data");
    }

    #[test]
    fn test_total_minutes_prefers_plan_total() {
        let mut plan = ExecutionPlan::new(
            "g1",
            vec![
                PlanPhase::new("a", "first").with_duration("10 minutes"),
                PlanPhase::new("b", "second").with_duration("unknown"),
            ],
        );
        assert_eq!(plan.total_minutes(30.0), 40.0);
        plan.total_estimated_duration = Some("2 hours".into());
        assert_eq!(plan.total_minutes(30.0), 120.0);
    }

    #[test]
    fn test_capability_domains_are_distinct() {
        let plan = ExecutionPlan::new(
            "g1",
            vec![
                PlanPhase::new("a", "").with_capabilities(["data-ingest", "data-clean"]),
                PlanPhase::new("b", "").with_capabilities(["ml-train"]),
            ],
        );
        let domains: Vec<String> = plan.capability_domains().into_iter().collect();
        assert_eq!(domains, vec!["data".to_string(), "ml".to_string()]);
    }

    #[test]
    fn test_phase_defaults_from_json() {
        let phase: PlanPhase = serde_json::from_str(r#"{"name": "scan"}"#).unwrap();
        assert!(!phase.observational);
        assert!(phase.dependencies.is_empty());
    }

    #[test]
    fn test_planner_only_fields_are_ignored() {
        let plan: ExecutionPlan = serde_json::from_str(
            r#"{
                "goal_id": "g1",
                "phases": [{"name": "a", "parallel_safe": false}, {"name": "b"}],
                "parallel_opportunities": [["a", "b"]],
                "risk_factors": ["flaky network"]
            }"#,
        )
        .unwrap();
        let positions = plan.phase_positions();
        assert_eq!(positions["a"], 0);
        assert_eq!(positions["b"], 1);
        assert_eq!(positions.len(), 2);
    }

    #[test]
    fn test_skill_covers() {
        let skill = SkillDefinition::new("csv-reader", ["data-ingest"]);
        assert!(skill.covers("data-ingest"));
        assert!(!skill.covers("data-clean"));
    }
}
