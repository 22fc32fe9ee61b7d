use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// --- Tables ---

/// A subscribable source, shared by every user subscribed to the same URL.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Feed {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub icon_url: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Sync attempts that failed in a row; reset by any successful fetch.
    pub consecutive_failures: i32,
    /// Scheduled syncs leave the feed alone until this instant.
    pub retry_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub feed_id: Uuid,
    pub group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Article {
    pub id: Uuid,
    pub feed_id: Uuid, // first feed that produced this URL
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub excerpt: Option<String>,
    pub content: String,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Profile {
    pub id: Uuid,
    /// Hours between scheduled syncs; `None` means the configured default.
    pub sync_interval: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SavedArticle {
    pub user_id: Uuid,
    pub article_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ReadArticle {
    pub user_id: Uuid,
    pub article_id: Uuid,
    pub read_at: DateTime<Utc>,
}
