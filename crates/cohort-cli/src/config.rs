use cohort_orchestrator::OrchestratorConfig;
use cohort_planner::AnalyzerConfig;
use cohort_state::StoreConfig;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Everything `cohort.toml` can set. Each section falls back to its defaults.
#[derive(Debug, Default, Deserialize)]
pub struct CohortConfig {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Settings for the simulated phase executor used by `cohort run`.
#[derive(Debug, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_phase_delay_ms")]
    pub phase_delay_ms: u64,
}

fn default_phase_delay_ms() -> u64 {
    100
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            phase_delay_ms: default_phase_delay_ms(),
        }
    }
}

impl CohortConfig {
    /// Read and validate `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse(&text).map_err(|e| {
                anyhow::anyhow!("Invalid config file '{}': {}", path.display(), e)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            }
        };
        Ok(config)
    }

    fn parse(text: &str) -> anyhow::Result<Self> {
        let config: CohortConfig = toml::from_str(text)?;
        config.analyzer.validate()?;
        config.orchestrator.validate()?;
        Ok(config)
    }
}
