use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::feed::FeedError;
use crate::store::StoreError;
use crate::sync::SyncError;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// The feed could not be fetched.
    Upstream(String),
    /// The feed was fetched but is not a feed.
    Unprocessable(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            Self::Internal(detail) => {
                // details stay in the logs
                error!(%detail, "request failed");
                "Internal server error".to_string()
            }
            Self::BadRequest(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::Upstream(msg)
            | Self::Unprocessable(msg)
            | Self::Unavailable(msg) => msg,
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Constraint(_) => Self::Conflict(err.to_string()),
            StoreError::Database(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidUrl(_) => Self::BadRequest(err.to_string()),
            SyncError::Feed(FeedError::Fetch(_)) => Self::Upstream(err.to_string()),
            SyncError::Feed(FeedError::Parse(_)) => Self::Unprocessable(err.to_string()),
            SyncError::Store(store_err) => store_err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn store_errors_map_to_statuses() {
        let not_found: ApiError = StoreError::NotFound {
            entity: "article",
            id: Uuid::nil(),
        }
        .into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let internal: ApiError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn feed_errors_map_to_statuses() {
        let parse: ApiError = SyncError::Feed(FeedError::Parse("bad xml".into())).into();
        assert_eq!(parse.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let invalid: ApiError = SyncError::InvalidUrl("nope".into()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }
}
