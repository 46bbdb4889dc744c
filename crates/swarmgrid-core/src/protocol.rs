//! Wire protocol between devices and the coordinator.
//!
//! Messages are JSON objects tagged by a `type` field. Framing is the
//! transport's concern; these types only fix the logical contract.

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Registration payload a device sends when it connects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Stable id persisted by the device. Absent on first contact.
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    pub name: String,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub capabilities: Option<DeviceCapabilities>,
    #[serde(default)]
    pub join_code: Option<String>,
}

/// Device → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    Register(DeviceRegistration),
    Heartbeat {
        #[serde(default)]
        last_interaction: Option<u64>,
        #[serde(default)]
        health: Option<HealthSample>,
    },
    RequestBatch {
        #[serde(default)]
        count: Option<u32>,
    },
    JobComplete {
        job_id: JobId,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    BenchmarkResult {
        score: f64,
        #[serde(default)]
        throttle_level: Option<f64>,
    },
}

/// Coordinator → device (or every device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Registered { device_id: DeviceId },
    Rejected { reason: String },
    BatchDispatch { jobs: Vec<JobChunk> },
    /// Jobs taken away from this device by work stealing.
    JobsRevoked { job_ids: Vec<JobId> },
    SwarmSnapshot { snapshot: SwarmSnapshot },
    RunBenchmark,
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Connection(ConnectionId),
    Broadcast,
}

/// A message queued by the coordinator for the transport to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn to(connection_id: impl Into<ConnectionId>, message: ServerMessage) -> Self {
        Self {
            target: Target::Connection(connection_id.into()),
            message,
        }
    }

    pub fn broadcast(message: ServerMessage) -> Self {
        Self {
            target: Target::Broadcast,
            message,
        }
    }
}
