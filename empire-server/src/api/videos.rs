//! UGC video endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::engines::ugc_video::{
    ContestLeaderboard, CreatedContest, Interaction, ModerationDecision, ModerationOutcome, NewContest, NewVideo,
    SubmitOutcome, VideoAnalytics, VideoSubmission,
};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default)]
    pub vertical: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub id: i64,
    pub views: i64,
}

#[derive(Debug, Serialize)]
pub struct InteractionResponse {
    pub id: i64,
    pub interaction: Interaction,
    pub total: i64,
}

/// POST /api/videos
pub async fn submit_video(
    State(state): State<AppState>,
    Json(request): Json<NewVideo>,
) -> ApiResult<(StatusCode, Json<SubmitOutcome>)> {
    let outcome = state.videos.submit_video(request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/videos/:id
pub async fn get_video(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<VideoSubmission>> {
    Ok(Json(state.videos.get_video(id).await?))
}

/// POST /api/videos/:id/moderate
pub async fn moderate_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(decision): Json<ModerationDecision>,
) -> ApiResult<Json<ModerationOutcome>> {
    Ok(Json(state.videos.moderate_video(id, decision).await?))
}

/// POST /api/videos/:id/view
pub async fn record_view(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ViewResponse>> {
    let views = state.videos.record_view(id).await?;
    Ok(Json(ViewResponse { id, views }))
}

/// POST /api/videos/:id/like
pub async fn like_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<InteractionResponse>> {
    record(&state, id, Interaction::Like).await
}

/// POST /api/videos/:id/share
pub async fn share_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<InteractionResponse>> {
    record(&state, id, Interaction::Share).await
}

async fn record(state: &AppState, id: i64, interaction: Interaction) -> ApiResult<Json<InteractionResponse>> {
    let total = state.videos.record_interaction(id, interaction).await?;
    Ok(Json(InteractionResponse { id, interaction, total }))
}

/// POST /api/videos/contests
pub async fn create_contest(
    State(state): State<AppState>,
    Json(request): Json<NewContest>,
) -> ApiResult<(StatusCode, Json<CreatedContest>)> {
    let created = state.videos.create_contest(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/videos/contests/:id/leaderboard
pub async fn contest_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ContestLeaderboard>> {
    Ok(Json(state.videos.contest_leaderboard(id).await?))
}

/// GET /api/videos/analytics?vertical=tech
pub async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<VideoAnalytics>> {
    Ok(Json(state.videos.analytics(query.vertical.as_deref()).await?))
}

pub fn video_routes() -> Router<AppState> {
    Router::new()
        .route("/api/videos", post(submit_video))
        .route("/api/videos/analytics", get(analytics))
        .route("/api/videos/contests", post(create_contest))
        .route("/api/videos/contests/:id/leaderboard", get(contest_leaderboard))
        .route("/api/videos/:id", get(get_video))
        .route("/api/videos/:id/moderate", post(moderate_video))
        .route("/api/videos/:id/view", post(record_view))
        .route("/api/videos/:id/like", post(like_video))
        .route("/api/videos/:id/share", post(share_video))
}
