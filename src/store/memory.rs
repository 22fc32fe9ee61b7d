use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{Article, Feed, Profile, Subscription};
use crate::store::{
    ArticleRef, ArticleUpdate, FeedHealth, FeedStore, NewArticle, StoreError, SubscribedFeed,
};

/// In-process store with the same uniqueness and conflict rules as `PgStore`.
///
/// Every operation runs under a single lock, which gives it the atomicity the
/// Postgres implementation gets from `ON CONFLICT` and conditional deletes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    feeds: HashMap<Uuid, Feed>,
    feed_by_url: HashMap<String, Uuid>,
    subscriptions: Vec<Subscription>,
    profiles: Vec<Profile>,
    articles: HashMap<Uuid, Article>,
    article_by_url: HashMap<String, Uuid>,
    saved: HashSet<(Uuid, Uuid)>,
    read: HashSet<(Uuid, Uuid)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user profile; profiles are owned by the auth layer.
    pub fn add_profile(&self, user_id: Uuid, sync_interval: Option<i32>) {
        self.lock().profiles.push(Profile {
            id: user_id,
            sync_interval,
        });
    }

    pub fn feed(&self, feed_id: Uuid) -> Option<Feed> {
        self.lock().feeds.get(&feed_id).cloned()
    }

    pub fn feed_by_url(&self, url: &str) -> Option<Feed> {
        let inner = self.lock();
        let id = inner.feed_by_url.get(url)?;
        inner.feeds.get(id).cloned()
    }

    pub fn articles(&self) -> Vec<Article> {
        let mut articles: Vec<Article> = self.lock().articles.values().cloned().collect();
        articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        articles
    }

    pub fn article_by_url(&self, url: &str) -> Option<Article> {
        let inner = self.lock();
        let id = inner.article_by_url.get(url)?;
        inner.articles.get(id).cloned()
    }

    pub fn is_read(&self, user_id: Uuid, article_id: Uuid) -> bool {
        self.lock().read.contains(&(user_id, article_id))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the others.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn upsert_article(&mut self, record: &NewArticle) -> Result<Option<ArticleRef>, StoreError> {
        if !self.feeds.contains_key(&record.feed_id) {
            return Err(StoreError::Constraint(format!(
                "article {} references unknown feed {}",
                record.url, record.feed_id
            )));
        }

        if let Some(id) = self.article_by_url.get(&record.url) {
            let existing = self
                .articles
                .get_mut(id)
                .ok_or(StoreError::NotFound {
                    entity: "article",
                    id: *id,
                })?;
            existing.title = record.title.clone();
            existing.excerpt = record.excerpt.clone();
            if record.author.is_some() {
                existing.author = record.author.clone();
            }
            if existing.extracted_at.is_none() {
                existing.content = record.content.clone();
            }
            if existing.image_url.is_none() {
                existing.image_url = record.image_url.clone();
            }
            return Ok(None);
        }

        let article = Article {
            id: Uuid::new_v4(),
            feed_id: record.feed_id,
            url: record.url.clone(),
            title: record.title.clone(),
            author: record.author.clone(),
            excerpt: record.excerpt.clone(),
            content: record.content.clone(),
            image_url: record.image_url.clone(),
            published_at: record.published_at,
            extracted_at: None,
            created_at: Utc::now(),
        };
        let inserted = ArticleRef {
            id: article.id,
            url: article.url.clone(),
            image_url: article.image_url.clone(),
        };
        self.article_by_url.insert(article.url.clone(), article.id);
        self.articles.insert(article.id, article);
        Ok(Some(inserted))
    }

    fn is_saved_by_anyone(&self, article_id: Uuid) -> bool {
        self.saved.iter().any(|(_, id)| *id == article_id)
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_feed(
        &self,
        url: &str,
        title: Option<String>,
        icon_url: Option<String>,
        fetched_at: Option<DateTime<Utc>>,
    ) -> Result<Feed, StoreError> {
        let mut inner = self.lock();
        if let Some(id) = inner.feed_by_url.get(url).copied() {
            let feed = inner.feeds.get_mut(&id).ok_or(StoreError::NotFound {
                entity: "feed",
                id,
            })?;
            if title.is_some() {
                feed.title = title;
            }
            if icon_url.is_some() {
                feed.icon_url = icon_url;
            }
            if fetched_at.is_some() {
                feed.last_fetched_at = fetched_at;
            }
            return Ok(feed.clone());
        }

        let feed = Feed {
            id: Uuid::new_v4(),
            url: url.to_string(),
            title,
            icon_url,
            last_fetched_at: fetched_at,
            consecutive_failures: 0,
            retry_after: None,
            created_at: Utc::now(),
        };
        inner.feed_by_url.insert(feed.url.clone(), feed.id);
        inner.feeds.insert(feed.id, feed.clone());
        Ok(feed)
    }

    async fn update_feed_details(
        &self,
        feed_id: Uuid,
        title: Option<String>,
        icon_url: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let feed = inner.feeds.get_mut(&feed_id).ok_or(StoreError::NotFound {
            entity: "feed",
            id: feed_id,
        })?;
        if feed.title.is_none() {
            feed.title = title;
        }
        if feed.icon_url.is_none() {
            feed.icon_url = icon_url;
        }
        Ok(())
    }

    async fn update_feed_last_fetched(
        &self,
        feed_id: Uuid,
        fetched_at: DateTime<Utc>,
        health: FeedHealth,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let feed = inner.feeds.get_mut(&feed_id).ok_or(StoreError::NotFound {
            entity: "feed",
            id: feed_id,
        })?;
        feed.last_fetched_at = Some(fetched_at);
        feed.consecutive_failures = health.consecutive_failures;
        feed.retry_after = health.retry_after;
        Ok(())
    }

    async fn subscribe(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        group_id: Option<Uuid>,
    ) -> Result<Subscription, StoreError> {
        let mut inner = self.lock();
        if !inner.feeds.contains_key(&feed_id) {
            return Err(StoreError::NotFound {
                entity: "feed",
                id: feed_id,
            });
        }
        if let Some(existing) = inner
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.feed_id == feed_id)
        {
            return Ok(existing.clone());
        }
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id,
            feed_id,
            group_id,
            created_at: Utc::now(),
        };
        inner.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<SubscribedFeed>, StoreError> {
        let inner = self.lock();
        let feeds = inner
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter_map(|s| {
                inner.feeds.get(&s.feed_id).map(|feed| SubscribedFeed {
                    feed_id: feed.id,
                    url: feed.url.clone(),
                    title: feed.title.clone(),
                    last_fetched_at: feed.last_fetched_at,
                    consecutive_failures: feed.consecutive_failures,
                    retry_after: feed.retry_after,
                    group_id: s.group_id,
                })
            })
            .collect();
        Ok(feeds)
    }

    async fn list_all_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        Ok(self.lock().profiles.clone())
    }

    async fn upsert_articles(&self, records: &[NewArticle]) -> Result<Vec<ArticleRef>, StoreError> {
        let mut inner = self.lock();
        // Validate first so a failing batch leaves nothing behind, like a
        // single multi-row INSERT would.
        if let Some(bad) = records.iter().find(|r| !inner.feeds.contains_key(&r.feed_id)) {
            return Err(StoreError::Constraint(format!(
                "article {} references unknown feed {}",
                bad.url, bad.feed_id
            )));
        }
        let mut inserted = Vec::new();
        for record in records {
            if let Some(article) = inner.upsert_article(record)? {
                inserted.push(article);
            }
        }
        Ok(inserted)
    }

    async fn update_article(
        &self,
        article_id: Uuid,
        update: ArticleUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let article = inner
            .articles
            .get_mut(&article_id)
            .ok_or(StoreError::NotFound {
                entity: "article",
                id: article_id,
            })?;
        if let Some(content) = update.content {
            article.content = content;
        }
        if article.image_url.is_none() {
            article.image_url = update.image_url;
        }
        if update.extracted_at.is_some() {
            article.extracted_at = update.extracted_at;
        }
        Ok(())
    }

    async fn get_article(&self, article_id: Uuid) -> Result<Option<Article>, StoreError> {
        Ok(self.lock().articles.get(&article_id).cloned())
    }

    async fn list_articles_missing_image(
        &self,
        limit: i64,
    ) -> Result<Vec<ArticleRef>, StoreError> {
        let inner = self.lock();
        let mut missing: Vec<&Article> = inner
            .articles
            .values()
            .filter(|a| a.image_url.is_none())
            .collect();
        missing.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(missing
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|a| ArticleRef {
                id: a.id,
                url: a.url.clone(),
                image_url: None,
            })
            .collect())
    }

    async fn list_articles_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .lock()
            .articles
            .values()
            .filter(|a| a.published_at < cutoff)
            .map(|a| a.id)
            .collect())
    }

    async fn list_saved_article_ids(
        &self,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.lock();
        let ids: HashSet<Uuid> = inner
            .saved
            .iter()
            .filter(|(owner, _)| user_id.is_none_or(|u| u == *owner))
            .map(|(_, article_id)| *article_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn delete_articles(&self, article_ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut deleted = 0;
        for id in article_ids {
            if inner.is_saved_by_anyone(*id) {
                continue;
            }
            if let Some(article) = inner.articles.remove(id) {
                inner.article_by_url.remove(&article.url);
                inner.read.retain(|(_, article_id)| article_id != id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn save_article(&self, user_id: Uuid, article_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.articles.contains_key(&article_id) {
            return Err(StoreError::NotFound {
                entity: "article",
                id: article_id,
            });
        }
        inner.saved.insert((user_id, article_id));
        Ok(())
    }

    async fn unsave_article(&self, user_id: Uuid, article_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock().saved.remove(&(user_id, article_id)))
    }

    async fn mark_read_before(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let feed_ids: HashSet<Uuid> = inner
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.feed_id)
            .collect();
        let to_mark: Vec<Uuid> = inner
            .articles
            .values()
            .filter(|a| a.published_at < cutoff && feed_ids.contains(&a.feed_id))
            .map(|a| a.id)
            .collect();
        let mut marked = 0;
        for article_id in to_mark {
            if inner.read.insert((user_id, article_id)) {
                marked += 1;
            }
        }
        Ok(marked)
    }
}
