//! Boot, maintenance and engine status endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::ApiResult;
use crate::system::{BootResult, OptimizationReport};
use crate::AppState;
use empire_common::engine::{EngineHealth, ErrorRecord};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    /// True when another pass was already running
    pub skipped: bool,
    pub report: Option<OptimizationReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnginesResponse {
    pub engines: Vec<EngineHealth>,
    pub jobs: Vec<String>,
    /// Failures of jobs that belong to no engine (`system.*`)
    pub system_errors: Vec<ErrorRecord>,
}

/// GET /api/system/boot
pub async fn last_boot(State(state): State<AppState>) -> Json<Option<BootResult>> {
    Json(state.boot.last_result().await)
}

/// POST /api/system/boot
pub async fn run_boot(State(state): State<AppState>) -> Json<BootResult> {
    Json(state.boot.run().await)
}

/// POST /api/system/optimize
pub async fn optimize(State(state): State<AppState>) -> ApiResult<Json<OptimizeResponse>> {
    let report = state.optimizer.run().await?;
    Ok(Json(OptimizeResponse {
        skipped: report.is_none(),
        report,
    }))
}

/// GET /api/system/engines
pub async fn engines(State(state): State<AppState>) -> Json<EnginesResponse> {
    let mut engines = Vec::with_capacity(state.engines.len());
    for host in state.engines.iter() {
        engines.push(host.health().await);
    }

    Json(EnginesResponse {
        engines,
        jobs: state.scheduler.job_names(),
        system_errors: state.scheduler.tracker().snapshot_prefixed("system."),
    })
}

pub fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/api/system/boot", get(last_boot).post(run_boot))
        .route("/api/system/optimize", post(optimize))
        .route("/api/system/engines", get(engines))
}
