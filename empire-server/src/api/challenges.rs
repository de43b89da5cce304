//! Viral challenge endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::engines::challenges::{
    Challenge, ChallengeLeaderboard, CreatedChallenge, JoinOutcome, JoinRequest, NewChallenge,
    ProgressOutcome, ShareOutcome,
};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub user_id: String,
    pub progress: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub user_id: String,
    pub platform: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// POST /api/challenges
pub async fn create_challenge(
    State(state): State<AppState>,
    Json(request): Json<NewChallenge>,
) -> ApiResult<(StatusCode, Json<CreatedChallenge>)> {
    let created = state.challenges.create_challenge(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/challenges/:id
pub async fn get_challenge(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Challenge>> {
    Ok(Json(state.challenges.get_challenge(id).await?))
}

/// POST /api/challenges/:id/join
pub async fn join_challenge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<Json<JoinOutcome>> {
    Ok(Json(state.challenges.join_challenge(id, request).await?))
}

/// POST /api/challenges/:id/progress
pub async fn update_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<Json<ProgressOutcome>> {
    let outcome = state
        .challenges
        .update_progress(id, &request.user_id, request.progress)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/challenges/:id/share
pub async fn share_challenge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ShareRequest>,
) -> ApiResult<Json<ShareOutcome>> {
    let outcome = state
        .challenges
        .share_challenge(id, &request.user_id, &request.platform)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/challenges/:id/leaderboard?limit=50
pub async fn leaderboard(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<ChallengeLeaderboard>> {
    Ok(Json(state.challenges.leaderboard(id, query.limit).await?))
}

pub fn challenge_routes() -> Router<AppState> {
    Router::new()
        .route("/api/challenges", post(create_challenge))
        .route("/api/challenges/:id", get(get_challenge))
        .route("/api/challenges/:id/join", post(join_challenge))
        .route("/api/challenges/:id/progress", post(update_progress))
        .route("/api/challenges/:id/share", post(share_challenge))
        .route("/api/challenges/:id/leaderboard", get(leaderboard))
}
