//! Health assessment of self-reported device samples.

use swarmgrid_core::{HealthSample, RegistryConfig};

/// Result of checking a single health sample against the thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthVerdict {
    Healthy,
    CpuSaturated(f64),
    MemoryPressure(f64),
    HighLatency(f64),
}

impl HealthVerdict {
    pub fn is_healthy(self) -> bool {
        self == HealthVerdict::Healthy
    }
}

/// Check a sample against the configured limits.
///
/// The first limit exceeded wins, in cpu, memory, latency order.
pub fn assess(sample: &HealthSample, config: &RegistryConfig) -> HealthVerdict {
    if sample.cpu_usage > config.max_cpu_usage {
        HealthVerdict::CpuSaturated(sample.cpu_usage)
    } else if sample.memory_usage > config.max_memory_usage {
        HealthVerdict::MemoryPressure(sample.memory_usage)
    } else if sample.latency_ms > config.max_latency_ms {
        HealthVerdict::HighLatency(sample.latency_ms)
    } else {
        HealthVerdict::Healthy
    }
}
