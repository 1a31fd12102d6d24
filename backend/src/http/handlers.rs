//! HTTP handlers for the REST API.
//!
//! Each handler corresponds to an API endpoint and delegates to the
//! service layer for business logic.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use super::dto::{
    BoardQuery, CorridorListResponse, HealthResponse, ReconcileResponse, SailingEventRequest,
    SnapshotRequest,
};
use super::error::AppError;
use super::state::AppState;
use crate::models::{CorridorBoard, CorridorId, OperatorId};
use crate::services::{IngestOptions, IngestReport, ReconcileOutcome};

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
///
/// Health check endpoint to verify the service is running and database is accessible.
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    let db_status = match state.repository.health_check().await {
        Ok(true) => "connected".to_string(),
        Ok(false) => "disconnected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: "v1".to_string(),
        database: db_status,
    }))
}

// =============================================================================
// Boards
// =============================================================================

/// GET /v1/corridors
pub async fn list_corridors(State(state): State<AppState>) -> HandlerResult<CorridorListResponse> {
    let registry = state.composer.registry();
    let corridors: Vec<_> = registry
        .corridors()
        .iter()
        .map(|c| registry.summary(c))
        .collect();
    let total = corridors.len();

    Ok(Json(CorridorListResponse { corridors, total }))
}

/// GET /v1/corridors/{corridor_id}/board
///
/// Today's board for a corridor. `?at=` renders as of another instant.
pub async fn get_board(
    State(state): State<AppState>,
    Path(corridor_id): Path<String>,
    Query(query): Query<BoardQuery>,
) -> HandlerResult<CorridorBoard> {
    let now = query.at.unwrap_or_else(Utc::now);
    let board = state
        .composer
        .compose(&CorridorId::new(corridor_id), now)
        .await?;

    Ok(Json(board))
}

// =============================================================================
// Ingestion
// =============================================================================

/// POST /v1/sailing-events
///
/// Reconcile a single observation. Store failures come back as a `failed`
/// outcome with 503 rather than an error body.
pub async fn record_sailing_event(
    State(state): State<AppState>,
    Json(request): Json<SailingEventRequest>,
) -> Result<(StatusCode, Json<ReconcileResponse>), AppError> {
    let observation = request.into_observation(Utc::now())?;

    let registry = state.composer.registry();
    let corridor = registry
        .get(&observation.identity.corridor_id)
        .ok_or_else(|| {
            AppError::NotFound(format!("Corridor {} not found", observation.identity.corridor_id))
        })?;
    if !corridor.covers(&observation.identity.from_port, &observation.identity.to_port) {
        return Err(AppError::BadRequest(format!(
            "{} -> {} is not served by corridor {}",
            observation.identity.from_port, observation.identity.to_port, corridor.id
        )));
    }

    let outcome = state.overlay.reconcile(&observation).await;
    let status = match outcome {
        ReconcileOutcome::Inserted { .. } => StatusCode::CREATED,
        ReconcileOutcome::Updated { .. } | ReconcileOutcome::Unchanged => StatusCode::OK,
        ReconcileOutcome::Failed { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };

    Ok((
        status,
        Json(ReconcileResponse {
            sailing_key: observation.identity.sailing_key().to_string(),
            outcome,
        }),
    ))
}

/// POST /v1/operators/{operator_id}/snapshots
///
/// Ingest an operator's full published list for one corridor and date.
pub async fn ingest_snapshot(
    State(state): State<AppState>,
    Path(operator_id): Path<String>,
    Json(request): Json<SnapshotRequest>,
) -> HandlerResult<IngestReport> {
    let options = IngestOptions {
        infer_removed: request.infer_removed.unwrap_or(state.ingest.infer_removed),
    };
    let snapshot = request.into_snapshot(OperatorId::new(operator_id), Utc::now());

    let corridor = state
        .composer
        .registry()
        .get(&snapshot.corridor_id)
        .ok_or_else(|| AppError::NotFound(format!("Corridor {} not found", snapshot.corridor_id)))?;

    let report = state
        .overlay
        .ingest_operator_snapshot(&snapshot, corridor, options)
        .await?;

    Ok(Json(report))
}
