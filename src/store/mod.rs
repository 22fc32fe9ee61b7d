//! Persistence contract used by the ingestion pipeline.
//!
//! `FeedStore` is the only shared mutable resource in the system. Correctness
//! under concurrent ingestion rests on the store enforcing unique feed and
//! article URLs and resolving upsert conflicts atomically.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{Article, Feed, Profile, Subscription};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
}

impl StoreError {
    /// Errors caused by one bad record rather than by the store itself.
    pub fn is_record_level(&self) -> bool {
        match self {
            Self::Constraint(_) => true,
            Self::NotFound { .. } => true,
            Self::Database(sqlx::Error::Database(db_err)) => !matches!(
                db_err.kind(),
                sqlx::error::ErrorKind::Other
            ),
            Self::Database(_) => false,
        }
    }
}

/// A normalized article ready to be upserted by URL.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub feed_id: Uuid,
    pub title: String,
    pub url: String,
    pub image_url: Option<String>,
    pub content: String,
    pub excerpt: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Minimal handle on a stored article, enough to drive extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ArticleRef {
    pub id: Uuid,
    pub url: String,
    pub image_url: Option<String>,
}

/// Fields the extractor may write back onto an article.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleUpdate {
    pub content: Option<String>,
    /// Only applied when the stored image is still null.
    pub image_url: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
}

/// A feed as seen through one user's subscription.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SubscribedFeed {
    pub feed_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub retry_after: Option<DateTime<Utc>>,
    pub group_id: Option<Uuid>,
}

/// Failure bookkeeping written alongside `last_fetched_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedHealth {
    pub consecutive_failures: i32,
    pub retry_after: Option<DateTime<Utc>>,
}

impl FeedHealth {
    pub fn healthy() -> Self {
        Self::default()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Insert a feed by URL or fill in missing metadata on the existing row.
    async fn upsert_feed(
        &self,
        url: &str,
        title: Option<String>,
        icon_url: Option<String>,
        fetched_at: Option<DateTime<Utc>>,
    ) -> Result<Feed, StoreError>;

    /// Fill title/icon on a feed that has none yet. Existing values win.
    async fn update_feed_details(
        &self,
        feed_id: Uuid,
        title: Option<String>,
        icon_url: Option<String>,
    ) -> Result<(), StoreError>;

    async fn update_feed_last_fetched(
        &self,
        feed_id: Uuid,
        fetched_at: DateTime<Utc>,
        health: FeedHealth,
    ) -> Result<(), StoreError>;

    /// Idempotent: an existing (user, feed) pair is returned untouched.
    async fn subscribe(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        group_id: Option<Uuid>,
    ) -> Result<Subscription, StoreError>;

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<SubscribedFeed>, StoreError>;

    async fn list_all_profiles(&self) -> Result<Vec<Profile>, StoreError>;

    /// Upsert keyed on URL; returns only the rows that were newly inserted.
    async fn upsert_articles(&self, records: &[NewArticle]) -> Result<Vec<ArticleRef>, StoreError>;

    async fn update_article(&self, article_id: Uuid, update: ArticleUpdate)
    -> Result<(), StoreError>;

    async fn get_article(&self, article_id: Uuid) -> Result<Option<Article>, StoreError>;

    /// Newest first, at most `limit` rows.
    async fn list_articles_missing_image(&self, limit: i64)
    -> Result<Vec<ArticleRef>, StoreError>;

    async fn list_articles_older_than(&self, cutoff: DateTime<Utc>)
    -> Result<Vec<Uuid>, StoreError>;

    /// Saved article ids for one user, or for everyone when `user_id` is `None`.
    async fn list_saved_article_ids(&self, user_id: Option<Uuid>)
    -> Result<Vec<Uuid>, StoreError>;

    /// Deletes the given articles except those saved by anyone at delete time.
    /// Returns the number of rows actually removed.
    async fn delete_articles(&self, article_ids: &[Uuid]) -> Result<u64, StoreError>;

    async fn save_article(&self, user_id: Uuid, article_id: Uuid) -> Result<(), StoreError>;

    async fn unsave_article(&self, user_id: Uuid, article_id: Uuid) -> Result<bool, StoreError>;

    /// Mark unread articles of the user's feeds published before `cutoff` as read.
    async fn mark_read_before(&self, user_id: Uuid, cutoff: DateTime<Utc>)
    -> Result<u64, StoreError>;
}
