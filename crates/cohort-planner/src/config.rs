use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};

/// Thresholds that trigger multi-agent coordination, plus the weights of the
/// overhead score. Any single threshold being met is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Plans with at least this many phases are split.
    #[serde(default = "default_phase_count_threshold")]
    pub phase_count_threshold: usize,
    /// Plans estimated above this many minutes are split.
    #[serde(default = "default_duration_threshold_minutes")]
    pub duration_threshold_minutes: f64,
    /// Plans spanning at least this many capability domains are split.
    #[serde(default = "default_domain_diversity_threshold")]
    pub domain_diversity_threshold: usize,
    /// Estimate used for phases whose duration text cannot be parsed.
    #[serde(default = "default_phase_minutes")]
    pub default_phase_minutes: f64,
    /// Overhead contributed by each group beyond the first.
    #[serde(default = "default_group_weight")]
    pub group_weight: f64,
    /// Overhead contributed by each cross-group dependency.
    #[serde(default = "default_edge_weight")]
    pub edge_weight: f64,
}

fn default_phase_count_threshold() -> usize {
    6
}
fn default_duration_threshold_minutes() -> f64 {
    60.0
}
fn default_domain_diversity_threshold() -> usize {
    3
}
fn default_phase_minutes() -> f64 {
    30.0
}
fn default_group_weight() -> f64 {
    0.1
}
fn default_edge_weight() -> f64 {
    0.2
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            phase_count_threshold: default_phase_count_threshold(),
            duration_threshold_minutes: default_duration_threshold_minutes(),
            domain_diversity_threshold: default_domain_diversity_threshold(),
            default_phase_minutes: default_phase_minutes(),
            group_weight: default_group_weight(),
            edge_weight: default_edge_weight(),
        }
    }
}

impl AnalyzerConfig {
    /// Reject zero thresholds and negative or non-finite numbers.
    pub fn validate(&self) -> CohortResult<()> {
        if self.phase_count_threshold == 0 {
            return Err(CohortError::Config(
                "phase_count_threshold must be at least 1".into(),
            ));
        }
        if self.domain_diversity_threshold == 0 {
            return Err(CohortError::Config(
                "domain_diversity_threshold must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("duration_threshold_minutes", self.duration_threshold_minutes),
            ("default_phase_minutes", self.default_phase_minutes),
            ("group_weight", self.group_weight),
            ("edge_weight", self.edge_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CohortError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.phase_count_threshold, 6);
        assert_eq!(config.duration_threshold_minutes, 60.0);
        assert_eq!(config.domain_diversity_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"phase_count_threshold": 4}"#).unwrap();
        assert_eq!(config.phase_count_threshold, 4);
        assert_eq!(config.default_phase_minutes, 30.0);
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let config = AnalyzerConfig {
            edge_weight: -0.5,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(config.validate(), Err(CohortError::Config(_))));
    }
}
