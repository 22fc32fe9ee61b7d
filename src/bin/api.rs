use std::sync::Arc;

use anyhow::{Context, Result};
use currents::{
    api::{self, AppState},
    config::Config,
    fetcher::HttpFetcher,
    store::PgStore,
    sync::SyncService,
    telemetry,
};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    telemetry::init_tracing(config.log_format());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(config.database_url())
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let fetcher = HttpFetcher::from_config(config.pipeline())?;
    let sync = Arc::new(SyncService::new(
        Arc::new(PgStore::new(pool)),
        fetcher,
        config.pipeline().clone(),
    ));
    let app = api::router(AppState::new(sync));

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr()))?;
    info!(addr = config.bind_addr(), "api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down api");
        })
        .await?;

    Ok(())
}
