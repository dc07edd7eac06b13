use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::metrics::CounterSnapshot;
use crate::pipeline::model::hour_bucket;
use crate::pipeline::orchestrator::RunSummary;
use crate::pipeline::{JobOrchestrator, OrchestratorError};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
}

/// Operator surface. `/metrics` is merged in by the binary, which owns the recorder.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/runs", get(list_runs))
        .route("/runs/{bucket}", post(trigger_run).get(get_run))
        .route("/runs/{bucket}/restart", post(restart_run))
        .route("/runs/{bucket}/stop", post(stop_run))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct RunsResp {
    runs: Vec<RunSummary>,
    counters: CounterSnapshot,
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResp { error: self.1 })).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        let status = match e {
            OrchestratorError::UnknownRun(_) => StatusCode::NOT_FOUND,
            OrchestratorError::DuplicateRun(_)
            | OrchestratorError::NotRestartable { .. }
            | OrchestratorError::NotRunning { .. } => StatusCode::CONFLICT,
        };
        ApiError(status, e.to_string())
    }
}

/// Path bucket: RFC 3339 or unix seconds, truncated to the hour.
fn parse_bucket(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let ts = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.with_timezone(&Utc)
    } else if let Some(dt) = raw.parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single()) {
        dt
    } else {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("invalid bucket `{raw}`: expected RFC 3339 or unix seconds"),
        ));
    };
    Ok(hour_bucket(ts))
}

async fn list_runs(State(state): State<AppState>) -> Json<RunsResp> {
    Json(RunsResp {
        runs: state.orchestrator.runs(),
        counters: state.orchestrator.deps().counters.snapshot(),
    })
}

async fn get_run(State(state): State<AppState>, Path(bucket): Path<String>) -> Result<Json<RunSummary>, ApiError> {
    let key = state.orchestrator.key_for(parse_bucket(&bucket)?);
    state
        .orchestrator
        .run_summary(&key)
        .map(Json)
        .ok_or_else(|| OrchestratorError::UnknownRun(key).into())
}

/// Claims the bucket and returns at once; the run continues in the background.
async fn trigger_run(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<(StatusCode, Json<RunSummary>), ApiError> {
    let bucket = parse_bucket(&bucket)?;
    let summary = state.orchestrator.start(bucket)?;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

async fn restart_run(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<RunSummary>, ApiError> {
    let key = state.orchestrator.key_for(parse_bucket(&bucket)?);
    Ok(Json(state.orchestrator.restart(&key).await?))
}

async fn stop_run(State(state): State<AppState>, Path(bucket): Path<String>) -> Result<StatusCode, ApiError> {
    let key = state.orchestrator.key_for(parse_bucket(&bucket)?);
    state.orchestrator.stop(&key)?;
    Ok(StatusCode::ACCEPTED)
}
