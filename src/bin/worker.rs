use std::sync::Arc;

use anyhow::Result;
use currents::{
    config::Config,
    fetcher::HttpFetcher,
    scheduler::{Scheduler, SchedulerConfig},
    store::PgStore,
    sync::SyncService,
    telemetry,
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    telemetry::init_tracing(config.log_format());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(config.database_url())
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let fetcher = HttpFetcher::from_config(config.pipeline())?;
    let sync = Arc::new(SyncService::new(
        Arc::new(PgStore::new(pool)),
        fetcher,
        config.pipeline().clone(),
    ));

    let scheduler = Scheduler::new(sync, SchedulerConfig::from_config(&config));
    scheduler.run().await
}
