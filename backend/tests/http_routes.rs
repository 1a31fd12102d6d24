//! HTTP API tests against the full router with an in-memory store.

#![cfg(feature = "http-server")]

mod support;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use ferry_board::db::SailingEventRepository;
use ferry_board::http::{create_router, AppState};
use ferry_board::models::CorridorRegistry;

use support::morning;

fn app() -> (Router, ferry_board::db::LocalRepository) {
    let s = support::stack();
    let repo: Arc<dyn SailingEventRepository> = Arc::new(s.repo.clone());
    let state = AppState::new(repo, s.composer);
    (create_router(state), s.repo)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn event(time: &str, status: &str) -> Value {
    json!({
        "operator_id": "ssa",
        "corridor_id": "woods-hole-vineyard-haven",
        "from_port": "Woods Hole",
        "to_port": "Vineyard Haven",
        "service_date": "2026-07-04",
        "departure_time": time,
        "status": status,
        "source": "ssa-status-page",
        "observed_at": morning().to_rfc3339(),
    })
}

#[tokio::test]
async fn test_health_reports_store() {
    let (app, repo) = app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "connected");

    repo.set_healthy(false);
    let (_, body) = send(&app, get("/health")).await;
    assert_ne!(body["database"], "connected");
}

#[tokio::test]
async fn test_list_corridors() {
    let expected = CorridorRegistry::builtin().corridors().len();
    let (app, _) = app();

    let (status, body) = send(&app, get("/v1/corridors")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], expected);
    assert_eq!(body["corridors"][0]["id"], "woods-hole-vineyard-haven");
}

#[tokio::test]
async fn test_event_then_board() {
    let (app, _) = app();

    let (status, body) = send(&app, post("/v1/sailing-events", event("6:00 PM", "on_time"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"], "inserted");
    assert_eq!(body["sailing_key"], "woods-hole|vineyard-haven|6:00pm");

    let (status, body) = send(&app, post("/v1/sailing-events", event("18:00", "canceled"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "updated");

    let (status, body) = send(&app, post("/v1/sailing-events", event("6:00 PM", "on_time"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unchanged");

    let uri = format!(
        "/v1/corridors/woods-hole-vineyard-haven/board?at={}",
        morning().to_rfc3339().replace('+', "%2B")
    );
    let (status, board) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["provenance"]["today_authority"], "operator_only");
    assert_eq!(board["sailings"].as_array().unwrap().len(), 1);
    assert_eq!(board["sailings"][0]["status"], "canceled");
    assert_eq!(board["service_date"], "2026-07-04");
}

#[tokio::test]
async fn test_template_event_is_not_reconciled() {
    let (app, repo) = app();
    let mut body = event("6:00 PM", "canceled");
    body["schedule_source"] = json!("template");

    let (status, body) = send(&app, post("/v1/sailing-events", body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["outcome"], "failed");
    assert_eq!(repo.event_count(), 0);
}

#[tokio::test]
async fn test_event_validation() {
    let (app, _) = app();

    let (status, _) = send(&app, post("/v1/sailing-events", event("25:00", "on_time"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut unknown = event("6:00 PM", "on_time");
    unknown["corridor_id"] = json!("boston-provincetown");
    let (status, _) = send(&app, post("/v1/sailing-events", unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut uncovered = event("6:00 PM", "on_time");
    uncovered["to_port"] = json!("Nantucket");
    let (status, body) = send(&app, post("/v1/sailing-events", uncovered)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_store_down_fails_the_write() {
    let (app, repo) = app();
    repo.set_healthy(false);

    let (status, body) = send(&app, post("/v1/sailing-events", event("6:00 PM", "delayed"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["outcome"], "failed");
}

#[tokio::test]
async fn test_snapshot_ingest() {
    let (app, repo) = app();
    let body = json!({
        "corridor_id": "woods-hole-vineyard-haven",
        "service_date": "2026-07-04",
        "source": "ssa-status-page",
        "observed_at": morning().to_rfc3339(),
        "sailings": [
            { "from_port": "wh", "to_port": "vh", "departure_time": "9:30 AM", "status": "on_time" },
            { "from_port": "vh", "to_port": "wh", "departure_time": "10:45 AM", "status": "canceled", "reason": "Weather" }
        ]
    });

    let (status, report) = send(&app, post("/v1/operators/ssa/snapshots", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["inserted"], 2);
    assert_eq!(repo.event_count(), 2);

    let (status, report) = send(&app, post("/v1/operators/ssa/snapshots", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["unchanged"], 2);
}

#[tokio::test]
async fn test_snapshot_rejections() {
    let (app, repo) = app();
    let body = |operator_corridor: &str, port: &str| {
        json!({
            "corridor_id": operator_corridor,
            "service_date": "2026-07-04",
            "source": "hlc-status-page",
            "sailings": [
                { "from_port": "wh", "to_port": port, "departure_time": "9:30 AM", "status": "on_time" }
            ]
        })
    };

    let (status, _) = send(&app, post("/v1/operators/hlc/snapshots", body("woods-hole-vineyard-haven", "vh"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body_json) = send(&app, post("/v1/operators/ssa/snapshots", body("woods-hole-vineyard-haven", "nan"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json["code"], "INGEST_REJECTED");

    let (status, _) = send(&app, post("/v1/operators/ssa/snapshots", body("nowhere", "vh"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(repo.event_count(), 0);
}

#[tokio::test]
async fn test_snapshot_with_missing_columns_writes_nothing() {
    let (app, repo) = app();
    repo.set_missing_columns(["status_reason"]);
    let body = json!({
        "corridor_id": "woods-hole-vineyard-haven",
        "service_date": "2026-07-04",
        "source": "ssa-status-page",
        "sailings": [
            { "from_port": "wh", "to_port": "vh", "departure_time": "9:30 AM", "status": "canceled" }
        ]
    });

    let (status, body) = send(&app, post("/v1/operators/ssa/snapshots", body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "INGEST_REJECTED");
    assert_eq!(repo.event_count(), 0);
}

#[tokio::test]
async fn test_unknown_corridor_board() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/v1/corridors/nowhere/board")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_board_store_down_is_unavailable() {
    let (app, repo) = app();
    repo.set_healthy(false);
    let (status, body) = send(&app, get("/v1/corridors/woods-hole-vineyard-haven/board")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "STORE_UNAVAILABLE");
}
