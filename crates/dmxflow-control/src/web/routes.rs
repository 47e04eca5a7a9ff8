//! REST API route definitions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get},
    Router,
};

use dmxflow_core::{PatchEntry, PatchError};

use super::handlers::{ApiResponse, PatchRequest, StatusResponse};
use super::server::AppState;
use crate::engine::UniverseSummary;
use crate::error::ControlError;

/// Build the API router
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/universes", get(get_universes))
        .route("/api/patch", get(get_patch).post(add_fixture))
        .route("/api/patch/:fixture_id", delete(remove_fixture))
}

/// GET /api/status - Receiver status and counters
async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    let universes = state.engine.universe_summaries();
    let status = StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        heartbeat: state.engine.heartbeat_status(),
        active_universes: universes.iter().filter(|u| !u.sources.is_empty()).count(),
        active_sources: universes.iter().map(|u| u.sources.len()).sum(),
        patched_fixtures: state.engine.patch_entries().len(),
        listening: state.engine.listening_universes(),
        stats: state.engine.stats(),
    };

    Json(ApiResponse::success(status))
}

/// GET /api/universes - Universes and their active senders
async fn get_universes(State(state): State<AppState>) -> Json<ApiResponse<Vec<UniverseSummary>>> {
    Json(ApiResponse::success(state.engine.universe_summaries()))
}

/// GET /api/patch - List patched fixtures
async fn get_patch(State(state): State<AppState>) -> Json<ApiResponse<Vec<PatchEntry>>> {
    Json(ApiResponse::success(state.engine.patch_entries()))
}

/// POST /api/patch - Patch a fixture
async fn add_fixture(
    State(state): State<AppState>,
    Json(request): Json<PatchRequest>,
) -> (StatusCode, Json<ApiResponse<PatchEntry>>) {
    match state.engine.add_fixture(request.clone()) {
        Ok(()) => {
            tracing::info!("Patched fixture {} via API", request.fixture_id);
            (StatusCode::CREATED, Json(ApiResponse::success(request)))
        }
        Err(e) => {
            tracing::warn!("Rejected patch request: {}", e);
            (patch_error_status(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// Malformed entries are the client's fault; overlaps are conflicts with
/// the current patch
fn patch_error_status(err: &ControlError) -> StatusCode {
    match err {
        ControlError::Patch(PatchError::InvalidAddress { .. })
        | ControlError::Patch(PatchError::InvalidFootprint { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ControlError::Patch(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// DELETE /api/patch/:fixture_id - Unpatch a fixture
async fn remove_fixture(
    Path(fixture_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PatchEntry>>, StatusCode> {
    state
        .engine
        .remove_fixture(&fixture_id)
        .map(|entry| Json(ApiResponse::success(entry)))
        .ok_or(StatusCode::NOT_FOUND)
}
