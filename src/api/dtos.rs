use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::retention::MAX_CUTOFF_DAYS;
use crate::store::ArticleRef;

/// Age cutoffs in days must be non-negative and at most
/// [`MAX_CUTOFF_DAYS`].
pub fn validate_days(days: i64) -> Result<(), String> {
    if days < 0 {
        return Err("days must not be negative".to_string());
    }
    if days > MAX_CUTOFF_DAYS {
        return Err(format!("days must be at most {MAX_CUTOFF_DAYS}"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub url: String,
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkReadRequest {
    pub days: i64,
}

impl MarkReadRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_days(self.days)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MarkReadResponse {
    pub marked: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExtractRequest {
    pub articles: Vec<ArticleRef>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BackfillParams {
    /// Defaults to the configured backfill limit.
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BackfillResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FlushParams {
    /// Age cutoff in days; 30 when omitted.
    pub days: Option<i64>,
}
