//! swarmgrid-api: HTTP surface for SwarmGrid.
//!
//! Operators drive the swarm over a small REST API; devices connect over
//! a WebSocket and speak the JSON protocol from `swarmgrid_core::protocol`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/snapshot` | Current swarm snapshot |
//! | PUT | `/api/v1/run-state` | Set the global run state |
//! | POST | `/api/v1/devices/{id}/toggle` | Enable or disable a device |
//! | POST | `/api/v1/jobs` | Submit a batch of jobs |
//! | POST | `/api/v1/join-codes` | Issue a join code |
//! | GET | `/api/v1/join-codes/{code}` | Validate a join code |
//! | POST | `/api/v1/benchmark` | Ask every device to benchmark |
//! | POST | `/api/v1/flush` | Abandon all pending jobs |
//! | GET | `/ws` | Device WebSocket |

pub mod handlers;
pub mod hub;
pub mod ws;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::routing::{get, post, put};
use swarmgrid_coordinator::SwarmHandle;

pub use hub::ConnectionHub;

/// Shared state for API handlers and device sockets.
#[derive(Clone)]
pub struct ApiState {
    pub swarm: SwarmHandle,
    pub hub: ConnectionHub,
    job_seq: Arc<AtomicU64>,
}

impl ApiState {
    pub fn new(swarm: SwarmHandle, hub: ConnectionHub) -> Self {
        Self {
            swarm,
            hub,
            job_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Id for a submitted job that did not bring its own.
    fn next_job_id(&self) -> String {
        let seq = self.job_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("job-{}-{seq}", swarmgrid_core::epoch_millis())
    }
}

/// Build the complete router (REST + device socket).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/snapshot", get(handlers::get_snapshot))
        .route("/run-state", put(handlers::set_run_state))
        .route("/devices/{id}/toggle", post(handlers::toggle_device))
        .route("/jobs", post(handlers::submit_jobs))
        .route("/join-codes", post(handlers::create_join_code))
        .route("/join-codes/{code}", get(handlers::validate_join_code))
        .route("/benchmark", post(handlers::request_benchmark))
        .route("/flush", post(handlers::flush_jobs))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws", get(ws::device_socket).with_state(state))
}
