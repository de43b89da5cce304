//! API key administration endpoints

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api_keys::{ApiKeyView, KeyTestResult, SaveApiKey, SaveOutcome};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: &'static str,
}

/// GET /api/admin/api-keys
pub async fn list_keys(State(state): State<AppState>) -> ApiResult<Json<Vec<ApiKeyView>>> {
    Ok(Json(state.api_keys.list().await?))
}

/// POST /api/admin/api-keys
pub async fn save_key(
    State(state): State<AppState>,
    Json(request): Json<SaveApiKey>,
) -> ApiResult<Json<SaveOutcome>> {
    Ok(Json(state.api_keys.save(request).await?))
}

/// DELETE /api/admin/api-keys/:id
pub async fn delete_key(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<DeleteResponse>> {
    state.api_keys.delete(&id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "API key deleted successfully",
    }))
}

/// POST /api/admin/api-keys/:id/test
///
/// A malformed or undecryptable key is a `200` with `valid: false`.
pub async fn test_key(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<KeyTestResult>> {
    Ok(Json(state.api_keys.test(&id).await?))
}

pub fn api_key_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/api-keys", get(list_keys).post(save_key))
        .route("/api/admin/api-keys/:id", delete(delete_key))
        .route("/api/admin/api-keys/:id/test", post(test_key))
}
