//! Forum endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::engines::forum::{
    CurationReport, ForumAnalytics, ForumAnswer, ForumCategory, ForumLeaderboard, ForumPost,
    NewAnswer, NewCategory, NewPost, Platform, VoteOutcome, VoteRequest,
};
use crate::error::ApiResult;
use crate::AppState;

const DEFAULT_CURATION_ITEMS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct TimeframeQuery {
    #[serde(default)]
    pub timeframe: Option<String>,
}

impl TimeframeQuery {
    fn timeframe(&self) -> &str {
        self.timeframe.as_deref().unwrap_or("30d")
    }
}

#[derive(Debug, Serialize)]
pub struct PostDetail {
    pub post: ForumPost,
    pub answers: Vec<ForumAnswer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    pub answer_id: i64,
}

#[derive(Debug, Serialize)]
pub struct AiAnswerResponse {
    pub generated: bool,
    pub answer: Option<ForumAnswer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurateRequest {
    pub platform: Platform,
    pub vertical: String,
    #[serde(default)]
    pub max_items: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PointsResponse {
    pub username: String,
    pub points: i64,
}

/// GET /api/forum/categories
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<ForumCategory>>> {
    Ok(Json(state.forum.list_categories().await?))
}

/// POST /api/forum/categories
pub async fn create_category(
    State(state): State<AppState>,
    Json(request): Json<NewCategory>,
) -> ApiResult<(StatusCode, Json<ForumCategory>)> {
    let category = state.forum.create_category(request).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// GET /api/forum/categories/:id
pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ForumCategory>> {
    Ok(Json(state.forum.get_category(id).await?))
}

/// POST /api/forum/posts
pub async fn create_post(
    State(state): State<AppState>,
    Json(request): Json<NewPost>,
) -> ApiResult<(StatusCode, Json<ForumPost>)> {
    let post = state.forum.create_post(request).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// GET /api/forum/posts/:id
///
/// Counts as a view.
pub async fn get_post(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<PostDetail>> {
    let post = state.forum.get_post(id).await?;
    let answers = state.forum.list_answers(id).await?;
    Ok(Json(PostDetail { post, answers }))
}

/// POST /api/forum/posts/:id/answers
pub async fn add_answer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<NewAnswer>,
) -> ApiResult<(StatusCode, Json<ForumAnswer>)> {
    let answer = state.forum.add_answer(id, request).await?;
    Ok((StatusCode::CREATED, Json(answer)))
}

/// POST /api/forum/posts/:id/accept
pub async fn accept_answer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AcceptRequest>,
) -> ApiResult<Json<ForumAnswer>> {
    Ok(Json(state.forum.accept_answer(id, request.answer_id).await?))
}

/// POST /api/forum/posts/:id/ai-answer
pub async fn generate_ai_answer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<AiAnswerResponse>> {
    let answer = state.forum.generate_ai_answer(id).await?;
    Ok(Json(AiAnswerResponse {
        generated: answer.is_some(),
        answer,
    }))
}

/// POST /api/forum/vote
pub async fn vote(
    State(state): State<AppState>,
    Json(request): Json<VoteRequest>,
) -> ApiResult<Json<VoteOutcome>> {
    Ok(Json(state.forum.vote(request).await?))
}

/// POST /api/forum/curate
pub async fn curate(
    State(state): State<AppState>,
    Json(request): Json<CurateRequest>,
) -> ApiResult<Json<CurationReport>> {
    let max_items = request.max_items.unwrap_or(DEFAULT_CURATION_ITEMS);
    let report = state
        .forum
        .curate_external_content(request.platform, &request.vertical, max_items)
        .await?;
    Ok(Json(report))
}

/// GET /api/forum/analytics?timeframe=7d
pub async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<TimeframeQuery>,
) -> ApiResult<Json<ForumAnalytics>> {
    Ok(Json(state.forum.analytics(query.timeframe()).await?))
}

/// GET /api/forum/leaderboard?timeframe=7d
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<TimeframeQuery>,
) -> ApiResult<Json<ForumLeaderboard>> {
    Ok(Json(state.forum.leaderboard(query.timeframe()).await?))
}

/// GET /api/forum/points/:username
pub async fn user_points(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<PointsResponse>> {
    let points = state.forum.user_points(&username).await?;
    Ok(Json(PointsResponse { username, points }))
}

pub fn forum_routes() -> Router<AppState> {
    Router::new()
        .route("/api/forum/categories", get(list_categories).post(create_category))
        .route("/api/forum/categories/:id", get(get_category))
        .route("/api/forum/posts", post(create_post))
        .route("/api/forum/posts/:id", get(get_post))
        .route("/api/forum/posts/:id/answers", post(add_answer))
        .route("/api/forum/posts/:id/accept", post(accept_answer))
        .route("/api/forum/posts/:id/ai-answer", post(generate_ai_answer))
        .route("/api/forum/vote", post(vote))
        .route("/api/forum/curate", post(curate))
        .route("/api/forum/analytics", get(analytics))
        .route("/api/forum/leaderboard", get(leaderboard))
        .route("/api/forum/points/:username", get(user_points))
}
