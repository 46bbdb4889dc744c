//! Operator API regression tests.
//!
//! Drives the full router with `oneshot` requests and checks both the
//! HTTP status and the effect on the coordinator behind it.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use swarmgrid_api::{ApiState, ConnectionHub, build_router};
use swarmgrid_coordinator::{SwarmCoordinator, SwarmHandle};
use swarmgrid_core::*;

fn test_state() -> ApiState {
    let (swarm, _rx) = SwarmHandle::channel(SwarmCoordinator::from_config(&SwarmConfig::default()));
    ApiState::new(swarm, ConnectionHub::new())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn register(state: &ApiState, connection_id: &str, device_id: &str) {
    let registration = DeviceRegistration {
        device_id: Some(device_id.to_string()),
        name: device_id.to_string(),
        device_type: Some(DeviceType::Desktop),
        capabilities: Some(DeviceCapabilities {
            max_concurrency: 2,
            supported_jobs: [JobKind::from(JobKind::MAT_MUL)].into_iter().collect(),
            ..DeviceCapabilities::default()
        }),
        join_code: None,
    };
    state
        .swarm
        .with(|c| c.register_device(connection_id, registration))
        .await
        .unwrap();
}

#[tokio::test]
async fn snapshot_reports_registered_devices() {
    let state = test_state();
    register(&state, "conn-1", "desk").await;
    let router = build_router(state);

    let req = Request::builder()
        .uri("/api/v1/snapshot")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["stats"]["total_devices"], 1);
    assert_eq!(body["data"]["devices"][0]["id"], "desk");
}

#[tokio::test]
async fn run_state_round_trip() {
    let router = build_router(test_state());

    let (status, body) = send(
        &router,
        json_request("PUT", "/api/v1/run-state", json!({"state": "RUNNING"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "RUNNING");

    let req = Request::builder()
        .uri("/api/v1/snapshot")
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&router, req).await;
    assert_eq!(body["data"]["run_state"], "RUNNING");
}

#[tokio::test]
async fn unknown_run_state_is_rejected() {
    let router = build_router(test_state());
    let resp = router
        .oneshot(json_request(
            "PUT",
            "/api/v1/run-state",
            json!({"state": "SPRINTING"}),
        ))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn submitted_jobs_are_pushed_to_idle_devices() {
    let state = test_state();
    register(&state, "conn-1", "desk").await;
    let router = build_router(state.clone());

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/jobs",
            json!({"jobs": [
                {"kind": "MAT_MUL", "payload": {"n": 4}},
                {"kind": "MAT_MUL"},
                {"kind": "MAT_MUL"},
                {"id": "dup", "kind": "MAT_MUL"},
                {"id": "dup", "kind": "MAT_MUL"}
            ]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["submitted"], 5);
    assert_eq!(body["data"]["accepted"], 4);

    let stats = state.swarm.snapshot().await.stats;
    assert_eq!(stats.active_jobs, 2);
    assert_eq!(stats.pending_jobs, 2);
}

#[tokio::test]
async fn toggle_disables_device() {
    let state = test_state();
    register(&state, "conn-1", "desk").await;
    let router = build_router(state.clone());

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/devices/desk/toggle",
            json!({"enabled": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert_eq!(body["data"]["status"], "DISABLED");

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/devices/ghost/toggle",
            json!({"enabled": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn join_code_issue_and_validate() {
    let router = build_router(test_state());

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/join-codes",
            json!({"max_uses": 1, "metadata": {"site": "lab"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let code = body["data"]["code"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["max_uses"], 1);
    assert_eq!(body["data"]["created_by"], "operator");

    let req = Request::builder()
        .uri(format!("/api/v1/join-codes/{code}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["used_count"], 0);

    let req = Request::builder()
        .uri("/api/v1/join-codes/nope")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found");
}

#[tokio::test]
async fn join_code_with_huge_ttl_is_issued() {
    let router = build_router(test_state());

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/join-codes",
            json!({"ttl_secs": u64::MAX / 100}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["expires_at"], u64::MAX);
}

#[tokio::test]
async fn used_up_join_code_reads_as_unknown() {
    let state = test_state();
    let code = state
        .swarm
        .with(|c| {
            c.generate_join_code(swarmgrid_admission::JoinCodeOptions::default().with_max_uses(1))
        })
        .await
        .unwrap();

    let registration = DeviceRegistration {
        name: "phone".to_string(),
        join_code: Some(code.clone()),
        ..DeviceRegistration::default()
    };
    state
        .swarm
        .with(|c| c.register_device("conn-1", registration))
        .await
        .unwrap();

    let router = build_router(state);
    let req = Request::builder()
        .uri(format!("/api/v1/join-codes/{code}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, req).await;
    // Exhausted codes are evicted on use, so they read as unknown.
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn flush_abandons_pending_jobs() {
    let state = test_state();
    let router = build_router(state.clone());

    send(
        &router,
        json_request(
            "POST",
            "/api/v1/jobs",
            json!({"jobs": [{"kind": "MAT_MUL"}, {"kind": "MATH_STRESS"}]}),
        ),
    )
    .await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/flush")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 2);
    assert_eq!(state.swarm.snapshot().await.stats.pending_jobs, 0);
}

#[tokio::test]
async fn benchmark_is_accepted() {
    let router = build_router(test_state());
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/benchmark")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
}
