//! REST API handlers.
//!
//! Each handler takes the coordinator lock through `SwarmHandle::with`
//! and returns a JSON envelope.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use swarmgrid_admission::{AdmissionError, JoinCodeOptions};
use swarmgrid_coordinator::CoordinatorError;
use swarmgrid_core::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn admission_status(error: &CoordinatorError) -> StatusCode {
    match error {
        CoordinatorError::AdmissionDenied(AdmissionError::NotFound) => StatusCode::NOT_FOUND,
        CoordinatorError::AdmissionDenied(AdmissionError::Expired) => StatusCode::GONE,
        CoordinatorError::AdmissionDenied(AdmissionError::Exhausted) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Snapshot & run state ───────────────────────────────────────

/// GET /api/v1/snapshot
pub async fn get_snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.swarm.snapshot().await)
}

/// Run state request body.
#[derive(Debug, Deserialize)]
pub struct RunStateRequest {
    pub state: RunState,
}

/// PUT /api/v1/run-state
pub async fn set_run_state(
    State(state): State<ApiState>,
    Json(req): Json<RunStateRequest>,
) -> impl IntoResponse {
    let run_state = state
        .swarm
        .with(|c| {
            c.set_run_state(req.state);
            c.run_state()
        })
        .await;
    ApiResponse::ok(run_state)
}

// ── Devices ────────────────────────────────────────────────────

/// Toggle request body.
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

/// POST /api/v1/devices/{id}/toggle
pub async fn toggle_device(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> impl IntoResponse {
    let device = state
        .swarm
        .with(|c| {
            c.toggle_device(&id, req.enabled)
                .then(|| c.registry().get(&id).cloned())
                .flatten()
        })
        .await;

    match device {
        Some(device) => ApiResponse::ok(device).into_response(),
        None => error_response("device not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Jobs ───────────────────────────────────────────────────────

/// One job in a submission. A missing id is generated.
#[derive(Debug, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub id: Option<JobId>,
    pub kind: JobKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Job submission body.
#[derive(Debug, Deserialize)]
pub struct SubmitJobsRequest {
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitJobsResponse {
    pub submitted: usize,
    pub accepted: usize,
}

/// POST /api/v1/jobs
pub async fn submit_jobs(
    State(state): State<ApiState>,
    Json(req): Json<SubmitJobsRequest>,
) -> impl IntoResponse {
    if req.jobs.is_empty() {
        return error_response("no jobs submitted", StatusCode::BAD_REQUEST).into_response();
    }

    let submitted = req.jobs.len();
    let jobs: Vec<Job> = req
        .jobs
        .into_iter()
        .map(|spec| {
            let id = spec
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| state.next_job_id());
            let job = Job::new(id, spec.kind, spec.payload);
            match spec.priority {
                Some(priority) => job.with_priority(priority),
                None => job,
            }
        })
        .collect();

    let accepted = state.swarm.with(|c| c.submit_batch(jobs)).await;
    (
        StatusCode::CREATED,
        ApiResponse::ok(SubmitJobsResponse {
            submitted,
            accepted,
        }),
    )
        .into_response()
}

/// POST /api/v1/flush
pub async fn flush_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    let flushed = state.swarm.with(|c| c.flush_jobs()).await;
    ApiResponse::ok(flushed.len())
}

// ── Join codes ─────────────────────────────────────────────────

/// Join code request body. Unset fields use configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct JoinCodeRequest {
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl From<JoinCodeRequest> for JoinCodeOptions {
    fn from(req: JoinCodeRequest) -> Self {
        JoinCodeOptions {
            ttl_secs: req.ttl_secs,
            max_uses: req.max_uses,
            created_by: req.created_by.or_else(|| Some("operator".to_string())),
            metadata: req.metadata,
        }
    }
}

/// POST /api/v1/join-codes
pub async fn create_join_code(
    State(state): State<ApiState>,
    Json(req): Json<JoinCodeRequest>,
) -> impl IntoResponse {
    let created = state
        .swarm
        .with(|c| {
            let code = c.generate_join_code(req.into())?;
            c.validate_join_code(&code)
        })
        .await;

    match created {
        Ok(code) => (StatusCode::CREATED, ApiResponse::ok(code)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/join-codes/{code}
pub async fn validate_join_code(
    State(state): State<ApiState>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    match state.swarm.with(|c| c.validate_join_code(&code)).await {
        Ok(code) => ApiResponse::ok(code).into_response(),
        Err(e) => error_response(&e.to_string(), admission_status(&e)).into_response(),
    }
}

// ── Benchmark ──────────────────────────────────────────────────

/// POST /api/v1/benchmark
pub async fn request_benchmark(State(state): State<ApiState>) -> impl IntoResponse {
    state.swarm.with(|c| c.request_benchmark()).await;
    (StatusCode::ACCEPTED, ApiResponse::ok("benchmark requested"))
}
