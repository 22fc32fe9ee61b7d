//! Retention Sweeper: reclaim storage from aged articles nobody saved.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::{FeedStore, StoreError};

/// Cutoff used for manual "archive cleanup" requests.
pub const MANUAL_FLUSH_DAYS: i64 = 30;

/// Largest age cutoff taken at face value, roughly a thousand years. Postgres
/// timestamps run out long before chrono's do.
pub const MAX_CUTOFF_DAYS: i64 = 365 * 1000;

/// `now - days`, with `days` clamped into `0..=MAX_CUTOFF_DAYS`.
pub fn cutoff_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days.clamp(0, MAX_CUTOFF_DAYS))
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SweepReport {
    /// Articles past the cutoff before save exclusion.
    pub eligible: usize,
    pub deleted: u64,
}

pub struct RetentionSweeper {
    store: Arc<dyn FeedStore>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Delete every article published more than `cutoff_days` ago unless any
    /// user has saved it.
    ///
    /// The saved set is subtracted up front to keep the delete small; the
    /// store's delete re-checks saves atomically, so a save landing between
    /// the two steps still wins.
    #[instrument(skip(self))]
    pub async fn flush_old_articles(&self, cutoff_days: i64) -> Result<SweepReport, StoreError> {
        let cutoff = cutoff_before(Utc::now(), cutoff_days);

        let old = self.store.list_articles_older_than(cutoff).await?;
        if old.is_empty() {
            debug!("nothing past the retention cutoff");
            return Ok(SweepReport::default());
        }

        let saved: HashSet<Uuid> = self
            .store
            .list_saved_article_ids(None)
            .await?
            .into_iter()
            .collect();

        let doomed: Vec<Uuid> = old.iter().copied().filter(|id| !saved.contains(id)).collect();
        if doomed.is_empty() {
            debug!(eligible = old.len(), "every old article is saved");
            return Ok(SweepReport {
                eligible: old.len(),
                deleted: 0,
            });
        }

        let deleted = self.store.delete_articles(&doomed).await?;
        info!(eligible = old.len(), deleted, "retention sweep finished");

        Ok(SweepReport {
            eligible: old.len(),
            deleted,
        })
    }

    /// Fire-and-forget sweep; failures only reach the logs.
    pub fn spawn_sweep(self: &Arc<Self>, cutoff_days: i64) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(
            async move {
                if let Err(e) = sweeper.flush_old_articles(cutoff_days).await {
                    warn!(error = %e, "retention sweep failed");
                }
            }
            .instrument(info_span!("background_sweep", cutoff_days)),
        )
    }

    /// Mark everything in the user's feeds older than `days` as read.
    #[instrument(skip(self))]
    pub async fn mark_older_as_read(&self, user_id: Uuid, days: i64) -> Result<u64, StoreError> {
        let cutoff = cutoff_before(Utc::now(), days);
        let marked = self.store.mark_read_before(user_id, cutoff).await?;
        info!(marked, "marked older articles as read");
        Ok(marked)
    }
}
