//! HTTP surface over the ingestion pipeline.
//!
//! Authentication is handled upstream; routes take the acting user from the
//! path.

pub mod dtos;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::store::FeedStore;
use crate::sync::SyncService;

pub use error::{ApiError, ErrorResponse};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FeedStore>,
    pub sync: Arc<SyncService>,
}

impl AppState {
    pub fn new(sync: Arc<SyncService>) -> Self {
        Self {
            store: sync.store().clone(),
            sync,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check,
        handlers::sync_user,
        handlers::subscribe,
        handlers::mark_older_as_read,
        handlers::save_article,
        handlers::unsave_article,
        handlers::sync_due,
        handlers::extract_content,
        handlers::backfill_images,
        handlers::flush_old_articles,
    ),
    components(schemas(
        dtos::HealthResponse,
        dtos::SubscribeRequest,
        dtos::MarkReadRequest,
        dtos::MarkReadResponse,
        dtos::ExtractRequest,
        dtos::BackfillResponse,
        ErrorResponse,
        crate::sync::SyncReport,
        crate::sync::SubscribeOutcome,
        crate::extractor::ExtractionReport,
        crate::retention::SweepReport,
        crate::store::ArticleRef,
        crate::entities::Feed,
        crate::entities::Subscription,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "sync", description = "Feed synchronisation"),
        (name = "feeds", description = "Subscriptions"),
        (name = "articles", description = "Extraction, retention and per-user article state")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/v1/users/{user_id}/sync", post(handlers::sync_user))
        .route(
            "/v1/users/{user_id}/subscriptions",
            post(handlers::subscribe),
        )
        .route(
            "/v1/users/{user_id}/read/older",
            post(handlers::mark_older_as_read),
        )
        .route(
            "/v1/users/{user_id}/saved/{article_id}",
            put(handlers::save_article).delete(handlers::unsave_article),
        )
        .route("/v1/sync/due", post(handlers::sync_due))
        .route("/v1/articles/extract", post(handlers::extract_content))
        .route(
            "/v1/articles/backfill-images",
            post(handlers::backfill_images),
        )
        .route("/v1/articles/flush", post(handlers::flush_old_articles))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
