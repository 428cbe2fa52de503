//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stage::RetryConfig;

/// Configuration for the generation orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable/disable the background workers.
    /// When disabled, dispatches stay queued until processed manually.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of concurrent dispatch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Time a single stage execution may take before it counts as a
    /// retryable failure (milliseconds).
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_ms: u64,

    /// How often the watchdog looks for missed deadlines (milliseconds).
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,

    /// Re-read attempts when a conditional write loses a race.
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    /// Retry policy for failed stage units.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_stage_timeout() -> u64 {
    120_000 // 2 minutes
}

fn default_watchdog_interval() -> u64 {
    5000 // 5 seconds
}

fn default_max_commit_attempts() -> u32 {
    16
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            workers: default_workers(),
            stage_timeout_ms: default_stage_timeout(),
            watchdog_interval_ms: default_watchdog_interval(),
            max_commit_attempts: default_max_commit_attempts(),
            retry: RetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}
