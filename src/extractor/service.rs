use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use utoipa::ToSchema;

use crate::config::PipelineConfig;
use crate::extractor::{extract, page_image};
use crate::fetcher::HttpFetcher;
use crate::store::{ArticleRef, ArticleUpdate, FeedStore, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExtractionReport {
    /// Articles handed in.
    pub attempted: usize,
    /// Articles whose content was replaced.
    pub processed_count: usize,
}

/// Fetches article pages in bounded concurrent batches and writes the
/// extracted body back. Never fails: every per-article problem ends up in
/// the logs and leaves the stored article as it was.
pub struct ContentExtractor {
    store: Arc<dyn FeedStore>,
    fetcher: HttpFetcher,
    batch_size: usize,
}

impl ContentExtractor {
    pub fn new(store: Arc<dyn FeedStore>, fetcher: HttpFetcher, batch_size: usize) -> Self {
        Self {
            store,
            fetcher,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(
        store: Arc<dyn FeedStore>,
        fetcher: HttpFetcher,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(store, fetcher, config.extract_batch_size)
    }

    #[instrument(skip_all, fields(articles = articles.len(), batch_size = self.batch_size))]
    pub async fn extract_content(&self, articles: &[ArticleRef]) -> ExtractionReport {
        let mut report = ExtractionReport::default();

        for batch in articles.chunks(self.batch_size) {
            let updated = join_all(batch.iter().map(|article| self.extract_one(article))).await;
            report.attempted += batch.len();
            report.processed_count += updated.into_iter().filter(|ok| *ok).count();
        }

        info!(
            attempted = report.attempted,
            processed = report.processed_count,
            "extraction finished"
        );
        report
    }

    /// Run extraction in the background. Callers normally drop the handle.
    pub fn spawn_extraction(self: &Arc<Self>, articles: Vec<ArticleRef>) -> JoinHandle<ExtractionReport> {
        let extractor = Arc::clone(self);
        let span = info_span!("background_extraction", articles = articles.len());

        tokio::spawn(async move { extractor.extract_content(&articles).await }.instrument(span))
    }

    async fn extract_one(&self, article: &ArticleRef) -> bool {
        let page = match self.fetcher.fetch_page(&article.url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url = %article.url, error = %e, "article fetch failed");
                return false;
            }
        };

        let extracted = match extract(&page) {
            Ok(extracted) => extracted,
            Err(reason) => {
                debug!(url = %article.url, %reason, "keeping feed content");
                return false;
            }
        };

        let update = ArticleUpdate {
            content: Some(extracted.html),
            image_url: match article.image_url {
                Some(_) => None,
                None => extracted.image_url,
            },
            extracted_at: Some(Utc::now()),
        };

        match self.store.update_article(article.id, update).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %article.url, error = %e, "failed to store extracted content");
                false
            }
        }
    }

    /// Probe page metadata for articles that still have no image, newest
    /// first. Returns how many images were found and stored.
    #[instrument(skip(self))]
    pub async fn backfill_images(&self, limit: i64) -> Result<usize, StoreError> {
        let candidates = self.store.list_articles_missing_image(limit).await?;
        if candidates.is_empty() {
            debug!("no articles missing an image");
            return Ok(0);
        }

        let mut found = 0;
        for article in &candidates {
            let page = match self.fetcher.fetch_page(&article.url).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(url = %article.url, error = %e, "skipping image backfill");
                    continue;
                }
            };

            let Some(image_url) = page_image(&page) else {
                continue;
            };

            let update = ArticleUpdate {
                image_url: Some(image_url),
                ..ArticleUpdate::default()
            };
            match self.store.update_article(article.id, update).await {
                Ok(()) => found += 1,
                Err(e) => warn!(url = %article.url, error = %e, "failed to store image"),
            }
        }

        info!(candidates = candidates.len(), found, "image backfill finished");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockFeedStore;
    use std::time::Duration;
    use uuid::Uuid;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(2), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_pages_never_touch_the_store() {
        let mut store = MockFeedStore::new();
        store.expect_update_article().never();

        let extractor = ContentExtractor::new(Arc::new(store), fetcher(), 2);
        let refs: Vec<ArticleRef> = (0..3)
            .map(|i| ArticleRef {
                id: Uuid::new_v4(),
                // port 9 (discard) is closed on any sane test host
                url: format!("http://127.0.0.1:9/article/{i}"),
                image_url: None,
            })
            .collect();

        let report = extractor.extract_content(&refs).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.processed_count, 0);
    }

    #[tokio::test]
    async fn test_backfill_with_nothing_to_do() {
        let mut store = MockFeedStore::new();
        store
            .expect_list_articles_missing_image()
            .withf(|limit| *limit == 20)
            .times(1)
            .returning(|_| Ok(Vec::new()));
        store.expect_update_article().never();

        let extractor = ContentExtractor::new(Arc::new(store), fetcher(), 5);
        assert_eq!(extractor.backfill_images(20).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_backfill_surfaces_listing_failure() {
        let mut store = MockFeedStore::new();
        store
            .expect_list_articles_missing_image()
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolClosed)));

        let extractor = ContentExtractor::new(Arc::new(store), fetcher(), 5);
        assert!(extractor.backfill_images(20).await.is_err());
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let extractor = ContentExtractor::new(Arc::new(MockFeedStore::new()), fetcher(), 0);
        assert_eq!(extractor.batch_size, 1);
    }
}
