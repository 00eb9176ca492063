use cohort_core::{ExecutionPlan, GoalDefinition, SkillDefinition};
use serde::Deserialize;
use std::path::Path;

/// A plan file: either a bare plan or a plan wrapped with its goal.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Wrapped {
        goal: GoalDefinition,
        plan: ExecutionPlan,
    },
    Bare(ExecutionPlan),
}

/// Parse a plan file. Without an embedded goal one is derived from the
/// plan's `goal_id`; `description` overrides the goal text either way.
pub fn parse_plan(
    text: &str,
    description: Option<&str>,
) -> anyhow::Result<(GoalDefinition, ExecutionPlan)> {
    let (mut goal, plan) = match serde_json::from_str::<PlanFile>(text)? {
        PlanFile::Wrapped { goal, plan } => (goal, plan),
        PlanFile::Bare(plan) => {
            let id = if plan.goal_id.is_empty() {
                "goal".to_string()
            } else {
                plan.goal_id.clone()
            };
            (GoalDefinition::new(id, ""), plan)
        }
    };
    if let Some(description) = description {
        goal.description = description.to_string();
    }
    Ok((goal, plan))
}

pub async fn load_plan(
    path: &Path,
    description: Option<&str>,
) -> anyhow::Result<(GoalDefinition, ExecutionPlan)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read plan '{}': {}", path.display(), e))?;
    parse_plan(&text, description)
        .map_err(|e| anyhow::anyhow!("Invalid plan '{}': {}", path.display(), e))
}

/// Skills file: a JSON array of skill definitions. No path means no skills.
pub async fn load_skills(path: Option<&Path>) -> anyhow::Result<Vec<SkillDefinition>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read skills '{}': {}", path.display(), e))?;
    let skills = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Invalid skills '{}': {}", path.display(), e))?;
    Ok(skills)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_plan() {
        let (goal, plan) = parse_plan(
            r#"{"goal_id": "etl", "phases": [{"name": "extract"}]}"#,
            None,
        )
        .unwrap();
        assert_eq!(goal.id, "etl");
        assert_eq!(plan.phases.len(), 1);
        assert!(plan.phases[0].dependencies.is_empty());
    }

    #[test]
    fn test_wrapped_plan() {
        let text = r#"{
            "goal": {"id": "g-7", "description": "Ship it", "domain": "release"},
            "plan": {"phases": [{"name": "build"}, {"name": "deploy", "dependencies": ["build"]}]}
        }"#;
        let (goal, plan) = parse_plan(text, None).unwrap();
        assert_eq!(goal.id, "g-7");
        assert_eq!(goal.domain, "release");
        assert_eq!(plan.phases[1].dependencies, vec!["build"]);
    }

    #[test]
    fn test_description_override() {
        let (goal, _) = parse_plan(r#"{"phases": []}"#, Some("Rebuild the index")).unwrap();
        assert_eq!(goal.id, "goal");
        assert_eq!(goal.description, "Rebuild the index");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_plan(r#"{"steps": 3}"#, None).is_err());
    }

    #[tokio::test]
    async fn test_skills_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skills.json");
        std::fs::write(
            &path,
            r#"[{"name": "csv", "capabilities": ["data-parse"]}]"#,
        )
        .unwrap();
        let skills = load_skills(Some(&path)).await.unwrap();
        assert!(skills[0].covers("data-parse"));
        assert!(load_skills(None).await.unwrap().is_empty());
    }
}
