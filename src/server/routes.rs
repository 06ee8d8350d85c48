//! HTTP route handlers for the run API.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;
use crate::registry::{CicdRun, FixRecord, LogEntry, RunResult, RunStatusView, RunSummary};
use crate::supervisor::{RunRequest, Supervisor};

/// Build the router with every route.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/status/{run_id}", get(get_status))
        .route("/api/logs/{run_id}", get(get_logs))
        .route("/api/fixes/{run_id}", get(get_fixes))
        .route("/api/cicd-runs/{run_id}", get(get_cicd_runs))
        .route("/api/results/{run_id}", get(get_results))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{run_id}/cancel", post(cancel_run))
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "healer",
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AnalyzeResponse {
    pub run_id: String,
    pub branch_name: String,
    pub status: String,
    pub message: String,
}

/// POST /api/analyze - start a run in the background.
async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let url = request.repo_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::unprocessable("repo_url must be an http(s) URL"));
    }

    // The completion handle is dropped; the run proceeds detached.
    let handle = state.supervisor.start(request)?;
    Ok(Json(AnalyzeResponse {
        run_id: handle.run_id.to_string(),
        branch_name: handle.branch_name,
        status: "started".to_string(),
        message: "Agent analysis started successfully".to_string(),
    }))
}

async fn get_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusView>, ApiError> {
    let run_id = Supervisor::parse_run_id(&run_id)?;
    Ok(Json(state.supervisor.status(run_id)?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LogsResponse {
    pub logs: Vec<LogEntry>,
}

/// GET /api/logs/{run_id}?limit=N - the most recent N log entries.
async fn get_logs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let run_id = Supervisor::parse_run_id(&run_id)?;
    let logs = state.supervisor.logs(run_id, query.limit)?;
    Ok(Json(LogsResponse { logs }))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FixesResponse {
    pub fixes: Vec<FixRecord>,
}

async fn get_fixes(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<FixesResponse>, ApiError> {
    let run_id = Supervisor::parse_run_id(&run_id)?;
    let fixes = state.supervisor.fixes(run_id)?;
    Ok(Json(FixesResponse { fixes }))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CicdRunsResponse {
    pub cicd_runs: Vec<CicdRun>,
}

async fn get_cicd_runs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<CicdRunsResponse>, ApiError> {
    let run_id = Supervisor::parse_run_id(&run_id)?;
    let cicd_runs = state.supervisor.cicd_runs(run_id)?;
    Ok(Json(CicdRunsResponse { cicd_runs }))
}

/// GET /api/results/{run_id} - the full record, live or from its snapshot.
async fn get_results(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunResult>, ApiError> {
    let run_id = Supervisor::parse_run_id(&run_id)?;
    Ok(Json(state.supervisor.result(run_id).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RunsResponse {
    pub runs: Vec<RunSummary>,
}

async fn list_runs(State(state): State<AppState>) -> Json<RunsResponse> {
    Json(RunsResponse {
        runs: state.supervisor.list(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CancelResponse {
    pub run_id: String,
    /// False when the run had already finished.
    pub cancelled: bool,
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let parsed = Supervisor::parse_run_id(&run_id)?;
    let cancelled = state.supervisor.cancel(parsed)?;
    Ok(Json(CancelResponse { run_id, cancelled }))
}
