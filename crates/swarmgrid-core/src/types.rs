//! Domain types shared by every SwarmGrid crate.
//!
//! These types describe devices, jobs, assignments, join codes, and the
//! read-only swarm snapshot. All of them are serializable so they can be
//! sent over the wire as-is.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a device (survives reconnects).
pub type DeviceId = String;

/// Transport session handle. Changes every time a device reconnects.
pub type ConnectionId = String;

/// Unique identifier of a job.
pub type JobId = String;

// ── Devices ────────────────────────────────────────────────────────

/// Kind of work a job performs. An open enumeration: any string is a
/// valid kind, matched verbatim against device capability sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub const MAT_MUL: &'static str = "MAT_MUL";
    pub const MATH_STRESS: &'static str = "MATH_STRESS";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Class of hardware a device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    CloudServer,
    Tablet,
}

impl DeviceType {
    /// Cloud servers only receive work they explicitly pull.
    pub fn is_pull_only(self) -> bool {
        matches!(self, DeviceType::CloudServer)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Desktop => write!(f, "desktop"),
            DeviceType::Mobile => write!(f, "mobile"),
            DeviceType::CloudServer => write!(f, "cloud_server"),
            DeviceType::Tablet => write!(f, "tablet"),
        }
    }
}

/// Lifecycle status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Online,
    Busy,
    Offline,
    Error,
    Disabled,
}

impl DeviceStatus {
    /// Status implied by a load figure for a device that is up and enabled.
    pub fn for_load(load: u32) -> Self {
        if load > 0 {
            DeviceStatus::Busy
        } else {
            DeviceStatus::Online
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Busy => write!(f, "busy"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Error => write!(f, "error"),
            DeviceStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// What a device declares it can handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub gpu_available: bool,
    /// Upper bound on in-flight jobs.
    pub max_concurrency: u32,
    pub supported_jobs: BTreeSet<JobKind>,
}

impl DeviceCapabilities {
    pub fn supports(&self, kind: &JobKind) -> bool {
        self.supported_jobs.contains(kind)
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            cpu_cores: 2,
            memory_gb: 4.0,
            gpu_available: false,
            max_concurrency: 2,
            supported_jobs: [JobKind::MAT_MUL, JobKind::MATH_STRESS]
                .into_iter()
                .map(JobKind::from)
                .collect(),
        }
    }
}

/// Self-reported health sample attached to a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    /// CPU usage, percent (0–100).
    pub cpu_usage: f64,
    /// Memory usage, percent (0–100).
    pub memory_usage: f64,
    /// Round-trip latency in milliseconds.
    pub latency_ms: f64,
}

/// A registered worker endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub connection_id: ConnectionId,
    /// Bumped on every reconnect; tags which session is authoritative.
    pub generation: u64,
    pub name: String,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub capabilities: DeviceCapabilities,
    /// Benchmark score in ops/sec.
    pub ops_score: f64,
    pub current_load: u32,
    pub total_jobs_completed: u64,
    pub avg_job_duration_ms: f64,
    /// Unix epoch milliseconds.
    pub connected_at: u64,
    /// Unix epoch milliseconds.
    pub last_heartbeat: u64,
    /// Self-reported slowdown, 0.0 (none) to 1.0.
    pub throttle_level: f64,
    pub enabled: bool,
    pub health: Option<HealthSample>,
}

impl Device {
    /// A freshly connected, enabled device with no history.
    pub fn new(
        id: impl Into<DeviceId>,
        connection_id: impl Into<ConnectionId>,
        name: impl Into<String>,
        device_type: DeviceType,
        capabilities: DeviceCapabilities,
        now: u64,
    ) -> Self {
        Self {
            id: id.into(),
            connection_id: connection_id.into(),
            generation: 0,
            name: name.into(),
            device_type,
            status: DeviceStatus::Online,
            capabilities,
            ops_score: 0.0,
            current_load: 0,
            total_jobs_completed: 0,
            avg_job_duration_ms: 0.0,
            connected_at: now,
            last_heartbeat: now,
            throttle_level: 0.0,
            enabled: true,
            health: None,
        }
    }

    /// Slots left before hitting `max_concurrency`.
    pub fn free_capacity(&self) -> u32 {
        self.capabilities
            .max_concurrency
            .saturating_sub(self.current_load)
    }

    /// Current load as a fraction of `max_concurrency`.
    pub fn utilization(&self) -> f64 {
        if self.capabilities.max_concurrency == 0 {
            1.0
        } else {
            f64::from(self.current_load) / f64::from(self.capabilities.max_concurrency)
        }
    }

    /// Online or busy, and not switched off by an operator.
    pub fn is_active(&self) -> bool {
        self.enabled && matches!(self.status, DeviceStatus::Online | DeviceStatus::Busy)
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Assigned,
    Completed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Assigned => write!(f, "assigned"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

/// How a completed job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    /// Gave up after exhausting retries.
    Failed { error: String },
    /// Drained by an operator flush before anyone ran it.
    Abandoned,
}

/// A unit of dispatchable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Opaque to the coordinator.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub assigned_to: Option<DeviceId>,
    pub assigned_at: Option<u64>,
    pub created_at: u64,
    /// Sort hint for callers; selection ignores it.
    pub priority: Option<i32>,
    pub outcome: Option<JobOutcome>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn new(id: impl Into<JobId>, kind: impl Into<JobKind>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
            status: JobStatus::Pending,
            assigned_to: None,
            assigned_at: None,
            created_at: 0,
            priority: None,
            outcome: None,
            result: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Some(JobOutcome::Failed { .. }))
    }
}

/// Live binding of a job to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub job_id: JobId,
    pub device_id: DeviceId,
    pub assigned_at: u64,
    pub expires_at: u64,
    /// Failures recorded for this job before this assignment.
    pub retries: u32,
}

impl Assignment {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// A device's report on a job it was handed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub device_id: DeviceId,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl JobResult {
    pub fn success(job_id: impl Into<JobId>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            job_id: job_id.into(),
            device_id: device_id.into(),
            result: None,
            error: None,
            duration_ms: None,
        }
    }

    pub fn failure(
        job_id: impl Into<JobId>,
        device_id: impl Into<DeviceId>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::success(job_id, device_id)
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// The slice of a job that travels to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobChunk {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
}

impl From<&Job> for JobChunk {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            kind: job.kind.clone(),
            payload: job.payload.clone(),
        }
    }
}

// ── Admission ──────────────────────────────────────────────────────

/// A short-lived token that admits devices to the swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCode {
    pub code: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub max_uses: u32,
    pub used_count: u32,
    pub created_by: String,
    pub metadata: Option<HashMap<String, String>>,
}

impl JoinCode {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.used_count >= self.max_uses
    }
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Global run state set by the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Aggregate figures for the whole swarm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmStats {
    pub pending_jobs: usize,
    pub active_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    /// Estimated jobs per second. A heuristic, not a measured rate.
    pub global_velocity: f64,
    pub avg_latency_ms: f64,
    pub total_devices: usize,
    pub online_devices: usize,
}

/// Read-only projection of coordinator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSnapshot {
    pub run_state: RunState,
    pub devices: Vec<Device>,
    pub stats: SwarmStats,
    pub device_types: BTreeMap<DeviceType, usize>,
}
