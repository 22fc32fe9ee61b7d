//! Long-running worker loop: scheduled sync followed by image backfill on a
//! fixed tick, with graceful shutdown on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::{
    signal,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::sync::SyncService;

const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub backfill_limit: i64,
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick: config.scheduler_tick(),
            backfill_limit: config.pipeline().backfill_limit,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(300),
            backfill_limit: 20,
        }
    }
}

pub struct Scheduler {
    sync: Arc<SyncService>,
    config: SchedulerConfig,
    worker_id: Uuid,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(sync: Arc<SyncService>, config: SchedulerConfig) -> Self {
        Self {
            sync,
            config,
            worker_id: Uuid::new_v4(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the loop after the in-flight tick.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run until Ctrl-C or until the shutdown token is cancelled.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.worker_id,
            tick_secs = self.config.tick.as_secs(),
            backfill_limit = self.config.backfill_limit,
            "starting scheduler"
        );

        let shutdown_token = self.shutdown_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("failed to listen for shutdown signal: {}", e);
                        return;
                    }
                    info!("received shutdown signal, finishing current tick");
                    shutdown_token.cancel();
                }
                _ = shutdown_token.cancelled() => {}
            }
        });

        // tokio panics on a zero period
        let mut ticker = interval(self.config.tick.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // the tick itself is not raced against shutdown
                    self.run_tick()
                        .instrument(info_span!("tick", worker_id = %self.worker_id))
                        .await;
                }
            }
        }

        Ok(())
    }

    /// One pass: sync whatever is due, then look for missing images.
    pub async fn run_tick(&self) {
        match self.sync.sync_all_due_users().await {
            Ok(report) => info!(
                inserted = report.inserted_count,
                feeds = report.feeds_total,
                failed = report.feeds_failed,
                "scheduled sync complete"
            ),
            Err(e) => error!(error = %e, "scheduled sync failed"),
        }

        match self
            .sync
            .extractor()
            .backfill_images(self.config.backfill_limit)
            .await
        {
            Ok(found) => info!(found, "image backfill complete"),
            Err(e) => warn!(error = %e, "image backfill failed"),
        }
    }
}
