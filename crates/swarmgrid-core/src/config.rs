//! `swarmgrid.toml` configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! a working coordinator.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub registry: RegistryConfig,
    pub scheduler: SchedulerConfig,
    pub coordinator: CoordinatorConfig,
    pub join_codes: JoinCodeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Heartbeat age after which a device is marked offline.
    pub heartbeat_timeout_secs: u64,
    pub health_sweep_interval_secs: u64,
    /// Percent.
    pub max_cpu_usage: f64,
    /// Percent.
    pub max_memory_usage: f64,
    pub max_latency_ms: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 30,
            health_sweep_interval_secs: 10,
            max_cpu_usage: 95.0,
            max_memory_usage: 90.0,
            max_latency_ms: 1000.0,
        }
    }
}

impl RegistryConfig {
    pub fn heartbeat_timeout_ms(&self) -> u64 {
        self.heartbeat_timeout_secs.saturating_mul(1000)
    }

    pub fn health_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.health_sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard wall-clock limit on a single assignment.
    pub assignment_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    /// Failures after which a job is given up.
    pub max_retries: u32,
    /// Assignments younger than this are never stolen.
    pub steal_min_age_secs: u64,
    /// Outstanding assignments at which a device should shed work.
    pub offer_threshold: usize,
    /// Completed jobs kept before the oldest are evicted.
    pub completed_retention: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            assignment_timeout_secs: 60,
            reaper_interval_secs: 5,
            max_retries: 3,
            steal_min_age_secs: 5,
            offer_threshold: 5,
            completed_retention: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn assignment_timeout_ms(&self) -> u64 {
        self.assignment_timeout_secs.saturating_mul(1000)
    }

    pub fn steal_min_age_ms(&self) -> u64 {
        self.steal_min_age_secs.saturating_mul(1000)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub push_enabled: bool,
    /// Ceiling on jobs per push message.
    pub push_batch_cap: u32,
    pub rebalance_interval_secs: u64,
    /// Jobs stolen per overloaded/underloaded pair per round.
    pub rebalance_steal_cap: usize,
    /// Batch size granted to a `request_batch` with no explicit count.
    pub default_pull_batch: u32,
    /// Steal from saturated devices when a pull finds the queue empty.
    pub steal_on_idle_pull: bool,
    /// New devices must present a valid join code.
    pub require_join_code: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            push_enabled: true,
            push_batch_cap: 2,
            rebalance_interval_secs: 10,
            rebalance_steal_cap: 3,
            default_pull_batch: 4,
            steal_on_idle_pull: true,
            require_join_code: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinCodeConfig {
    pub code_length: usize,
    pub default_ttl_secs: u64,
    pub default_max_uses: u32,
    pub cleanup_interval_secs: u64,
}

impl Default for JoinCodeConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            default_ttl_secs: 24 * 60 * 60,
            default_max_uses: 100,
            cleanup_interval_secs: 60 * 60,
        }
    }
}

impl JoinCodeConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl SwarmConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: SwarmConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
