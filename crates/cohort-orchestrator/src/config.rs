use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime limits for one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on agents running at once.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    /// Wall-clock budget for a whole run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long cancelled agents get to wind down before their tasks are aborted.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_max_concurrent_agents() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_cancel_grace_ms() -> u64 {
    500
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            timeout_secs: default_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// `timeout_secs` as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `cancel_grace_ms` as a `Duration`.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Reject a zero concurrency limit or timeout.
    pub fn validate(&self) -> CohortResult<()> {
        if self.max_concurrent_agents == 0 {
            return Err(CohortError::Config(
                "max_concurrent_agents must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(CohortError::Config("timeout_secs must be positive".into()));
        }
        Ok(())
    }
}
