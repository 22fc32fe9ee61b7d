use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::api::{
    AppState,
    dtos::{
        BackfillParams, BackfillResponse, ExtractRequest, FlushParams, HealthResponse,
        MarkReadRequest, MarkReadResponse, SubscribeRequest, validate_days,
    },
    error::{ApiError, ErrorResponse},
};
use crate::extractor::ExtractionReport;
use crate::retention::{MANUAL_FLUSH_DAYS, SweepReport};
use crate::sync::{SubscribeOutcome, SyncReport};

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses(
        (status = 200, description = "Service and store are reachable", body = HealthResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    match state.store.ping().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "OK".to_string(),
            database: "healthy".to_string(),
        })),
        Err(e) => {
            error!(error = %e, "store health check failed");
            Err(ApiError::Unavailable("database unavailable".to_string()))
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/sync",
    tag = "sync",
    params(("user_id" = Uuid, Path, description = "User whose feeds are synced")),
    responses(
        (status = 200, description = "Sync finished; per-feed failures are only logged", body = SyncReport),
        (status = 500, description = "Subscriptions could not be listed", body = ErrorResponse)
    )
)]
pub async fn sync_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state
        .sync
        .sync_user(user_id, |done, total| debug!(done, total, "sync progress"))
        .await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/subscriptions",
    tag = "feeds",
    params(("user_id" = Uuid, Path, description = "Subscribing user")),
    request_body = SubscribeRequest,
    responses(
        (status = 201, description = "Subscribed", body = SubscribeOutcome),
        (status = 400, description = "Invalid feed URL", body = ErrorResponse),
        (status = 422, description = "URL is not a feed", body = ErrorResponse),
        (status = 502, description = "Feed could not be fetched", body = ErrorResponse)
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeOutcome>), ApiError> {
    let outcome = state
        .sync
        .subscribe(user_id, &payload.url, payload.group_id)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/read/older",
    tag = "articles",
    params(("user_id" = Uuid, Path, description = "User marking articles")),
    request_body = MarkReadRequest,
    responses(
        (status = 200, description = "Articles marked as read", body = MarkReadResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn mark_older_as_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    payload.validate().map_err(ApiError::BadRequest)?;
    let marked = state
        .sync
        .sweeper()
        .mark_older_as_read(user_id, payload.days)
        .await?;
    Ok(Json(MarkReadResponse { marked }))
}

#[utoipa::path(
    put,
    path = "/v1/users/{user_id}/saved/{article_id}",
    tag = "articles",
    params(
        ("user_id" = Uuid, Path, description = "User saving the article"),
        ("article_id" = Uuid, Path, description = "Article to keep")
    ),
    responses(
        (status = 204, description = "Saved"),
        (status = 404, description = "No such article", body = ErrorResponse)
    )
)]
pub async fn save_article(
    State(state): State<AppState>,
    Path((user_id, article_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.store.save_article(user_id, article_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/users/{user_id}/saved/{article_id}",
    tag = "articles",
    params(
        ("user_id" = Uuid, Path, description = "User unsaving the article"),
        ("article_id" = Uuid, Path, description = "Article to release")
    ),
    responses((status = 204, description = "Not saved anymore"))
)]
pub async fn unsave_article(
    State(state): State<AppState>,
    Path((user_id, article_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let removed = state.store.unsave_article(user_id, article_id).await?;
    debug!(removed, "unsave");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/sync/due",
    tag = "sync",
    responses((status = 200, description = "Scheduled sync finished", body = SyncReport))
)]
pub async fn sync_due(State(state): State<AppState>) -> Result<Json<SyncReport>, ApiError> {
    let report = state.sync.sync_all_due_users().await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/v1/articles/extract",
    tag = "articles",
    request_body = ExtractRequest,
    responses((status = 200, description = "Extraction finished", body = ExtractionReport))
)]
pub async fn extract_content(
    State(state): State<AppState>,
    Json(payload): Json<ExtractRequest>,
) -> Json<ExtractionReport> {
    info!(articles = payload.articles.len(), "extraction requested");
    Json(state.sync.extractor().extract_content(&payload.articles).await)
}

#[utoipa::path(
    post,
    path = "/v1/articles/backfill-images",
    tag = "articles",
    params(BackfillParams),
    responses((status = 200, description = "Images found and stored", body = BackfillResponse))
)]
pub async fn backfill_images(
    State(state): State<AppState>,
    Query(params): Query<BackfillParams>,
) -> Result<Json<BackfillResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(state.sync.config().backfill_limit)
        .max(0);
    let count = state.sync.extractor().backfill_images(limit).await?;
    Ok(Json(BackfillResponse { count }))
}

#[utoipa::path(
    post,
    path = "/v1/articles/flush",
    tag = "articles",
    params(FlushParams),
    responses(
        (status = 200, description = "Old unsaved articles deleted", body = SweepReport),
        (status = 400, description = "Invalid cutoff", body = ErrorResponse)
    )
)]
pub async fn flush_old_articles(
    State(state): State<AppState>,
    Query(params): Query<FlushParams>,
) -> Result<Json<SweepReport>, ApiError> {
    let days = params.days.unwrap_or(MANUAL_FLUSH_DAYS);
    validate_days(days).map_err(ApiError::BadRequest)?;
    let report = state.sync.sweeper().flush_old_articles(days).await?;
    Ok(Json(report))
}
