use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Pool, Postgres};
use uuid::Uuid;

use crate::entities::{Article, Feed, Profile, Subscription};
use crate::store::{
    ArticleRef, ArticleUpdate, FeedHealth, FeedStore, NewArticle, StoreError, SubscribedFeed,
};

/// Postgres-backed store. Uniqueness of feed and article URLs is enforced by
/// the schema; all conflict handling happens inside single statements.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

#[derive(Debug, FromRow)]
struct UpsertedArticle {
    id: Uuid,
    url: String,
    image_url: Option<String>,
    inserted: bool,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FeedStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_feed(
        &self,
        url: &str,
        title: Option<String>,
        icon_url: Option<String>,
        fetched_at: Option<DateTime<Utc>>,
    ) -> Result<Feed, StoreError> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (url, title, icon_url, last_fetched_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (url) DO UPDATE
              SET title           = COALESCE(EXCLUDED.title, feeds.title),
                  icon_url        = COALESCE(EXCLUDED.icon_url, feeds.icon_url),
                  last_fetched_at = COALESCE(EXCLUDED.last_fetched_at, feeds.last_fetched_at)
            RETURNING id, url, title, icon_url, last_fetched_at,
                      consecutive_failures, retry_after, created_at
            "#,
        )
        .bind(url)
        .bind(title)
        .bind(icon_url)
        .bind(fetched_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(feed)
    }

    async fn update_feed_details(
        &self,
        feed_id: Uuid,
        title: Option<String>,
        icon_url: Option<String>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET title    = COALESCE(title, $2),
                icon_url = COALESCE(icon_url, $3)
            WHERE id = $1
            "#,
        )
        .bind(feed_id)
        .bind(title)
        .bind(icon_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_feed_last_fetched(
        &self,
        feed_id: Uuid,
        fetched_at: DateTime<Utc>,
        health: FeedHealth,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at      = $2,
                consecutive_failures = $3,
                retry_after          = $4
            WHERE id = $1
            "#,
        )
        .bind(feed_id)
        .bind(fetched_at)
        .bind(health.consecutive_failures)
        .bind(health.retry_after)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "feed",
                id: feed_id,
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        group_id: Option<Uuid>,
    ) -> Result<Subscription, StoreError> {
        // The no-op DO UPDATE makes RETURNING yield the existing row too.
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, feed_id, group_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, feed_id) DO UPDATE
              SET user_id = subscriptions.user_id
            RETURNING id, user_id, feed_id, group_id, created_at
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<SubscribedFeed>, StoreError> {
        let feeds = sqlx::query_as::<_, SubscribedFeed>(
            r#"
            SELECT f.id AS feed_id, f.url, f.title, f.last_fetched_at,
                   f.consecutive_failures, f.retry_after, s.group_id
            FROM subscriptions s
            JOIN feeds f ON f.id = s.feed_id
            WHERE s.user_id = $1
            ORDER BY s.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    async fn list_all_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let profiles =
            sqlx::query_as::<_, Profile>("SELECT id, sync_interval FROM profiles ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(profiles)
    }

    async fn upsert_articles(&self, records: &[NewArticle]) -> Result<Vec<ArticleRef>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut feed_ids = Vec::with_capacity(records.len());
        let mut titles = Vec::with_capacity(records.len());
        let mut urls = Vec::with_capacity(records.len());
        let mut image_urls = Vec::with_capacity(records.len());
        let mut contents = Vec::with_capacity(records.len());
        let mut excerpts = Vec::with_capacity(records.len());
        let mut authors = Vec::with_capacity(records.len());
        let mut published = Vec::with_capacity(records.len());
        for r in records {
            feed_ids.push(r.feed_id);
            titles.push(r.title.clone());
            urls.push(r.url.clone());
            image_urls.push(r.image_url.clone());
            contents.push(r.content.clone());
            excerpts.push(r.excerpt.clone());
            authors.push(r.author.clone());
            published.push(r.published_at);
        }

        // xmax = 0 only for rows created by this statement, which is how the
        // inserted subset is told apart from refreshed rows.
        let rows = sqlx::query_as::<_, UpsertedArticle>(
            r#"
            INSERT INTO articles
                  (feed_id, title, url, image_url, content, excerpt, author, published_at)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::text[], $3::text[], $4::text[],
                $5::text[], $6::text[], $7::text[], $8::timestamptz[]
            )
            ON CONFLICT (url) DO UPDATE
              SET title     = EXCLUDED.title,
                  excerpt   = EXCLUDED.excerpt,
                  author    = COALESCE(EXCLUDED.author, articles.author),
                  content   = CASE WHEN articles.extracted_at IS NULL
                                   THEN EXCLUDED.content
                                   ELSE articles.content END,
                  image_url = COALESCE(articles.image_url, EXCLUDED.image_url)
            RETURNING id, url, image_url, (xmax = 0) AS inserted
            "#,
        )
        .bind(&feed_ids)
        .bind(&titles)
        .bind(&urls)
        .bind(&image_urls)
        .bind(&contents)
        .bind(&excerpts)
        .bind(&authors)
        .bind(&published)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|row| row.inserted)
            .map(|row| ArticleRef {
                id: row.id,
                url: row.url,
                image_url: row.image_url,
            })
            .collect())
    }

    async fn update_article(
        &self,
        article_id: Uuid,
        update: ArticleUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET content      = COALESCE($2, content),
                image_url    = COALESCE(image_url, $3),
                extracted_at = COALESCE($4, extracted_at)
            WHERE id = $1
            "#,
        )
        .bind(article_id)
        .bind(update.content)
        .bind(update.image_url)
        .bind(update.extracted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "article",
                id: article_id,
            });
        }
        Ok(())
    }

    async fn get_article(&self, article_id: Uuid) -> Result<Option<Article>, StoreError> {
        let article = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, feed_id, url, title, author, excerpt, content, image_url,
                   published_at, extracted_at, created_at
            FROM articles
            WHERE id = $1
            "#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(article)
    }

    async fn list_articles_missing_image(
        &self,
        limit: i64,
    ) -> Result<Vec<ArticleRef>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT id, url
            FROM articles
            WHERE image_url IS NULL
            ORDER BY published_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, url)| ArticleRef {
                id,
                url,
                image_url: None,
            })
            .collect())
    }

    async fn list_articles_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM articles WHERE published_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    async fn list_saved_article_ids(
        &self,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT article_id
            FROM saved_articles
            WHERE $1::uuid IS NULL OR user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn delete_articles(&self, article_ids: &[Uuid]) -> Result<u64, StoreError> {
        if article_ids.is_empty() {
            return Ok(0);
        }

        // The NOT EXISTS re-check closes the window between the eligibility
        // scan and the delete: a save that lands in between wins.
        let result = sqlx::query(
            r#"
            DELETE FROM articles a
            WHERE a.id = ANY($1)
              AND NOT EXISTS (
                  SELECT 1 FROM saved_articles s WHERE s.article_id = a.id
              )
            "#,
        )
        .bind(article_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn save_article(&self, user_id: Uuid, article_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO saved_articles (user_id, article_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, article_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                StoreError::NotFound {
                    entity: "article",
                    id: article_id,
                }
            }
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn unsave_article(&self, user_id: Uuid, article_id: Uuid) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM saved_articles WHERE user_id = $1 AND article_id = $2")
                .bind(user_id)
                .bind(article_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_read_before(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO read_articles (user_id, article_id)
            SELECT $1, a.id
            FROM articles a
            JOIN subscriptions s ON s.feed_id = a.feed_id AND s.user_id = $1
            WHERE a.published_at < $2
            ON CONFLICT (user_id, article_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_test_db() -> Option<PgStore> {
        // Skip tests if TEST_DATABASE_URL is not set
        let database_url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("Skipping database tests: TEST_DATABASE_URL not set");
                return None;
            }
        };

        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        Some(PgStore::new(pool))
    }

    fn unique_url(prefix: &str) -> String {
        format!("https://{}.example.com/{}", prefix, Uuid::new_v4())
    }

    fn record(feed_id: Uuid, url: &str, content: &str) -> NewArticle {
        NewArticle {
            feed_id,
            title: "Test article".to_string(),
            url: url.to_string(),
            image_url: None,
            content: content.to_string(),
            excerpt: None,
            author: None,
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_articles_first_writer_keeps_ownership() {
        let Some(store) = setup_test_db().await else {
            return; // Skip test if database not available
        };
        let feed_a = store
            .upsert_feed(&unique_url("a"), None, None, None)
            .await
            .expect("Failed to insert feed a");
        let feed_b = store
            .upsert_feed(&unique_url("b"), None, None, None)
            .await
            .expect("Failed to insert feed b");
        let url = unique_url("story");

        let inserted = store
            .upsert_articles(&[record(feed_a.id, &url, "first")])
            .await
            .expect("Failed to insert article");
        assert_eq!(inserted.len(), 1);

        let again = store
            .upsert_articles(&[record(feed_b.id, &url, "second")])
            .await
            .expect("Failed to upsert article");
        assert!(again.is_empty());

        let article = store
            .get_article(inserted[0].id)
            .await
            .expect("Failed to load article")
            .expect("Article should exist");
        assert_eq!(article.feed_id, feed_a.id);
        assert_eq!(article.content, "second");
    }

    #[tokio::test]
    async fn test_delete_articles_respects_saves() {
        let Some(store) = setup_test_db().await else {
            return; // Skip test if database not available
        };
        let feed = store
            .upsert_feed(&unique_url("retention"), None, None, None)
            .await
            .expect("Failed to insert feed");
        let saved_url = unique_url("saved");
        let mut saved = record(feed.id, &saved_url, "");
        saved.published_at = Utc::now() - Duration::days(90);
        let mut unsaved = record(feed.id, &unique_url("unsaved"), "");
        unsaved.published_at = Utc::now() - Duration::days(90);
        let inserted = store
            .upsert_articles(&[saved, unsaved])
            .await
            .expect("Failed to insert articles");
        let (kept, dropped): (Vec<_>, Vec<_>) =
            inserted.iter().partition(|a| a.url == saved_url);

        store
            .save_article(Uuid::new_v4(), kept[0].id)
            .await
            .expect("Failed to save article");

        let ids: Vec<Uuid> = inserted.iter().map(|a| a.id).collect();
        let deleted = store
            .delete_articles(&ids)
            .await
            .expect("Failed to delete articles");

        assert_eq!(deleted, 1);
        assert!(store.get_article(kept[0].id).await.unwrap().is_some());
        assert!(store.get_article(dropped[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let Some(store) = setup_test_db().await else {
            return; // Skip test if database not available
        };
        let feed = store
            .upsert_feed(&unique_url("subs"), None, None, None)
            .await
            .expect("Failed to insert feed");
        let user = Uuid::new_v4();

        let first = store.subscribe(user, feed.id, None).await.unwrap();
        let second = store.subscribe(user, feed.id, None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_subscriptions(user).await.unwrap().len(), 1);
    }
}
