//! Newsletter endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::engines::newsletter::{
    CreatedEdition, Edition, NewEdition, NewsletterAnalytics, SendOptions, SendOutcome,
    SubscribeOutcome, SubscribeRequest, Subscriber,
};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    #[serde(default)]
    pub edition_id: Option<i64>,
}

/// POST /api/newsletter/editions
pub async fn create_edition(
    State(state): State<AppState>,
    Json(request): Json<NewEdition>,
) -> ApiResult<(StatusCode, Json<CreatedEdition>)> {
    let created = state.newsletter.create_edition(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/newsletter/editions/:id
pub async fn get_edition(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Edition>> {
    Ok(Json(state.newsletter.get_edition(id).await?))
}

/// POST /api/newsletter/editions/:id/send
///
/// Body selects a test send, a scheduled send or an immediate send.
pub async fn send_edition(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(options): Json<SendOptions>,
) -> ApiResult<Json<SendOutcome>> {
    Ok(Json(state.newsletter.send_edition(id, options).await?))
}

/// POST /api/newsletter/subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> ApiResult<Json<SubscribeOutcome>> {
    Ok(Json(state.newsletter.subscribe(request).await?))
}

/// POST /api/newsletter/unsubscribe
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(request): Json<UnsubscribeRequest>,
) -> ApiResult<Json<Subscriber>> {
    Ok(Json(state.newsletter.unsubscribe(&request.email).await?))
}

/// GET /api/newsletter/analytics?editionId=1
pub async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<NewsletterAnalytics>> {
    Ok(Json(state.newsletter.analytics(query.edition_id).await?))
}

pub fn newsletter_routes() -> Router<AppState> {
    Router::new()
        .route("/api/newsletter/editions", post(create_edition))
        .route("/api/newsletter/editions/:id", get(get_edition))
        .route("/api/newsletter/editions/:id/send", post(send_edition))
        .route("/api/newsletter/subscribe", post(subscribe))
        .route("/api/newsletter/unsubscribe", post(unsubscribe))
        .route("/api/newsletter/analytics", get(analytics))
}
