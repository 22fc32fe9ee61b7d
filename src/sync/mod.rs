//! Sync Orchestrator.
//!
//! Drives Parser -> Normalizer -> Extractor for one user's feeds or for every
//! due feed across all users. Feeds are processed one after another; a
//! failing feed is logged, has its freshness advanced and is put into
//! backoff, and never stops the rest of the run.

pub mod backoff;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::entities::{Feed, Subscription};
use crate::extractor::ContentExtractor;
use crate::feed::{self, FeedError, ParsedFeed};
use crate::fetcher::HttpFetcher;
use crate::normalizer::{ingest, normalize};
use crate::retention::RetentionSweeper;
use crate::store::{FeedStore, StoreError, SubscribedFeed};

pub use backoff::{BASE_FEED_BACKOFF, backoff_delay, in_backoff, next_health};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    /// Articles that did not exist before this run.
    pub inserted_count: usize,
    pub feeds_total: usize,
    pub feeds_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscribeOutcome {
    pub feed: Feed,
    pub subscription: Subscription,
    pub inserted_count: usize,
}

/// What the orchestrator needs to know about a feed to sync it.
#[derive(Debug, Clone)]
struct FeedTarget {
    feed_id: Uuid,
    url: String,
    has_title: bool,
    consecutive_failures: i32,
}

impl From<&SubscribedFeed> for FeedTarget {
    fn from(sub: &SubscribedFeed) -> Self {
        Self {
            feed_id: sub.feed_id,
            url: sub.url.clone(),
            has_title: sub.title.is_some(),
            consecutive_failures: sub.consecutive_failures,
        }
    }
}

/// Inclusive: a feed fetched exactly `interval_hours` ago is due. An
/// interval too large to represent is never due.
pub fn is_due(last_fetched_at: Option<DateTime<Utc>>, interval_hours: i64, now: DateTime<Utc>) -> bool {
    let Some(last) = last_fetched_at else {
        return true;
    };
    match Duration::try_hours(interval_hours) {
        Some(interval) => now.signed_duration_since(last) >= interval,
        None => false,
    }
}

pub struct SyncService {
    store: Arc<dyn FeedStore>,
    fetcher: HttpFetcher,
    extractor: Arc<ContentExtractor>,
    sweeper: Arc<RetentionSweeper>,
    config: PipelineConfig,
}

impl SyncService {
    pub fn new(store: Arc<dyn FeedStore>, fetcher: HttpFetcher, config: PipelineConfig) -> Self {
        let extractor = Arc::new(ContentExtractor::from_config(
            store.clone(),
            fetcher.clone(),
            &config,
        ));
        let sweeper = Arc::new(RetentionSweeper::new(store.clone()));

        Self {
            store,
            fetcher,
            extractor,
            sweeper,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn FeedStore> {
        &self.store
    }

    pub fn extractor(&self) -> &Arc<ContentExtractor> {
        &self.extractor
    }

    pub fn sweeper(&self) -> &Arc<RetentionSweeper> {
        &self.sweeper
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Sync every feed the user subscribes to, reporting `(done, total)`
    /// before the first feed and after each one.
    ///
    /// Backoff is ignored here: a user asking for a refresh gets one.
    #[instrument(skip(self, on_progress))]
    pub async fn sync_user<F>(&self, user_id: Uuid, mut on_progress: F) -> Result<SyncReport, SyncError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let subscriptions = self.store.list_subscriptions(user_id).await?;
        let targets: Vec<FeedTarget> = subscriptions.iter().map(FeedTarget::from).collect();
        let total = targets.len();

        on_progress(0, total);

        let mut report = SyncReport {
            feeds_total: total,
            ..SyncReport::default()
        };
        for (done, target) in targets.iter().enumerate() {
            match self.run_feed(target).await {
                Some(inserted) => report.inserted_count += inserted,
                None => report.feeds_failed += 1,
            }
            on_progress(done + 1, total);
        }

        info!(
            inserted = report.inserted_count,
            feeds = report.feeds_total,
            failed = report.feeds_failed,
            "user sync finished"
        );
        self.sweeper.spawn_sweep(self.config.retention_days);

        Ok(report)
    }

    /// Scheduled entry point. Due feeds from every profile are collected into
    /// one work-list keyed by feed id, so a feed shared by several users is
    /// fetched once per run.
    #[instrument(skip(self))]
    pub async fn sync_all_due_users(&self) -> Result<SyncReport, SyncError> {
        let now = Utc::now();
        let profiles = self.store.list_all_profiles().await?;

        let mut work: BTreeMap<Uuid, FeedTarget> = BTreeMap::new();
        for profile in &profiles {
            let interval_hours = profile
                .sync_interval
                .map(i64::from)
                .unwrap_or(self.config.default_sync_interval_hours);

            let subscriptions = match self.store.list_subscriptions(profile.id).await {
                Ok(subscriptions) => subscriptions,
                Err(e) => {
                    warn!(user_id = %profile.id, error = %e, "skipping user, cannot list subscriptions");
                    continue;
                }
            };

            for sub in &subscriptions {
                if !is_due(sub.last_fetched_at, interval_hours, now) {
                    continue;
                }
                if in_backoff(sub.retry_after, now) {
                    debug!(url = %sub.url, retry_after = ?sub.retry_after, "feed in backoff");
                    continue;
                }
                work.entry(sub.feed_id).or_insert_with(|| FeedTarget::from(sub));
            }
        }

        let mut report = SyncReport {
            feeds_total: work.len(),
            ..SyncReport::default()
        };
        for target in work.values() {
            match self.run_feed(target).await {
                Some(inserted) => report.inserted_count += inserted,
                None => report.feeds_failed += 1,
            }
        }

        info!(
            users = profiles.len(),
            inserted = report.inserted_count,
            feeds = report.feeds_total,
            failed = report.feeds_failed,
            "scheduled sync finished"
        );
        self.sweeper.spawn_sweep(self.config.retention_days);

        Ok(report)
    }

    /// Add a feed for a user: parse it, register the shared Feed row, link
    /// the subscription and ingest the current items.
    #[instrument(skip(self))]
    pub async fn subscribe(
        &self,
        user_id: Uuid,
        url: &str,
        group_id: Option<Uuid>,
    ) -> Result<SubscribeOutcome, SyncError> {
        let url = feed_url(url)?;
        let parsed = feed::fetch_and_parse(&self.fetcher, &url).await?;
        let now = Utc::now();

        let feed = self
            .store
            .upsert_feed(
                &url,
                Some(feed::display_title(&parsed, &url)),
                feed::icon_url_for(parsed.site_link.as_deref(), &url),
                Some(now),
            )
            .await?;
        let subscription = self.store.subscribe(user_id, feed.id, group_id).await?;
        let inserted_count = self.ingest_parsed(feed.id, &url, &parsed, now).await?;

        info!(feed_id = %feed.id, inserted = inserted_count, "subscribed");
        Ok(SubscribeOutcome {
            feed,
            subscription,
            inserted_count,
        })
    }

    /// Sync one feed and record the attempt. `None` means the feed failed.
    async fn run_feed(&self, target: &FeedTarget) -> Option<usize> {
        let span = info_span!("sync_feed", feed_id = %target.feed_id, url = %target.url);

        async {
            let result = self.sync_feed(target).await;
            let now = Utc::now();
            let health = next_health(target.consecutive_failures, result.is_ok(), now);

            if let Err(e) = self
                .store
                .update_feed_last_fetched(target.feed_id, now, health)
                .await
            {
                warn!(error = %e, "failed to record fetch attempt");
            }

            match result {
                Ok(inserted) => Some(inserted),
                Err(e) => {
                    warn!(
                        error = %e,
                        failures = health.consecutive_failures,
                        retry_after = ?health.retry_after,
                        "feed sync failed"
                    );
                    None
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn sync_feed(&self, target: &FeedTarget) -> Result<usize, SyncError> {
        let parsed = feed::fetch_and_parse(&self.fetcher, &target.url).await?;

        if !target.has_title {
            let title = feed::display_title(&parsed, &target.url);
            let icon = feed::icon_url_for(parsed.site_link.as_deref(), &target.url);
            if let Err(e) = self
                .store
                .update_feed_details(target.feed_id, Some(title), icon)
                .await
            {
                warn!(error = %e, "failed to fill feed details");
            }
        }

        self.ingest_parsed(target.feed_id, &target.url, &parsed, Utc::now())
            .await
    }

    /// Normalize, upsert and hand the new rows to the extractor without
    /// waiting for it.
    async fn ingest_parsed(
        &self,
        feed_id: Uuid,
        feed_url: &str,
        parsed: &ParsedFeed,
        now: DateTime<Utc>,
    ) -> Result<usize, SyncError> {
        let base = parsed
            .site_link
            .as_deref()
            .and_then(|link| Url::parse(link).ok())
            .or_else(|| Url::parse(feed_url).ok());

        let records = normalize(feed_id, &parsed.candidates(now), base.as_ref());
        let inserted = ingest(self.store.as_ref(), &records).await?;

        debug!(items = parsed.items.len(), records = records.len(), inserted = inserted.len(), "ingested");

        let count = inserted.len();
        if count > 0 {
            self.extractor.spawn_extraction(inserted);
        }
        Ok(count)
    }
}

fn feed_url(raw: &str) -> Result<String, SyncError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|e| SyncError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SyncError::InvalidUrl(format!(
            "{trimmed}: only http and https feeds are supported"
        )));
    }
    Ok(parsed.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockFeedStore;

    #[test]
    fn due_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(is_due(Some(now - Duration::hours(24)), 24, now));
        assert!(is_due(Some(now - Duration::hours(30)), 24, now));
        assert!(!is_due(
            Some(now - Duration::hours(24) + Duration::seconds(1)),
            24,
            now
        ));
    }

    #[test]
    fn huge_interval_is_never_due() {
        let now = Utc::now();
        assert!(!is_due(Some(now - Duration::days(3650)), i64::MAX, now));
        assert!(is_due(None, i64::MAX, now));
    }

    #[test]
    fn never_fetched_is_always_due() {
        assert!(is_due(None, 24, Utc::now()));
    }

    #[test]
    fn feed_url_validation() {
        assert_eq!(
            feed_url("  https://example.com/feed.xml ").unwrap(),
            "https://example.com/feed.xml"
        );
        assert!(matches!(feed_url("ftp://example.com/rss"), Err(SyncError::InvalidUrl(_))));
        assert!(matches!(feed_url("not a url"), Err(SyncError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn listing_failure_fails_user_sync() {
        let mut store = MockFeedStore::new();
        store
            .expect_list_subscriptions()
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));

        let fetcher = HttpFetcher::from_config(&PipelineConfig::default()).unwrap();
        let service = SyncService::new(Arc::new(store), fetcher, PipelineConfig::default());

        let mut calls = 0;
        let result = service.sync_user(Uuid::new_v4(), |_, _| calls += 1).await;

        assert!(matches!(result, Err(SyncError::Store(_))));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn no_subscriptions_reports_zero_progress() {
        let mut store = MockFeedStore::new();
        store.expect_list_subscriptions().returning(|_| Ok(Vec::new()));
        store
            .expect_list_articles_older_than()
            .returning(|_| Ok(Vec::new()));

        let fetcher = HttpFetcher::from_config(&PipelineConfig::default()).unwrap();
        let service = SyncService::new(Arc::new(store), fetcher, PipelineConfig::default());

        let mut seen = Vec::new();
        let report = service
            .sync_user(Uuid::new_v4(), |done, total| seen.push((done, total)))
            .await
            .unwrap();

        assert_eq!(seen, vec![(0, 0)]);
        assert_eq!(report, SyncReport::default());
    }
}
