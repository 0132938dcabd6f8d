mod catalog;
mod destination;

use std::sync::Arc;
use std::time::Duration;

use tradesync_common::error::TradeSyncResult;
use tradesync_config::{init_tracing, AppConfig};
use tradesync_db::settings::pg_repository::PgSettingsRepository;
use tradesync_db::sync::pg_repository::PgStatusRepository;
use tradesync_db::uom::pg_repository::PgUomConversionRepository;
use tradesync_sync::manager::IntegrationManager;
use tradesync_sync::uom::UomConversionCache;

use crate::destination::client::{DestinationClient, DestinationClientConfig};

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load configuration");
    init_tracing(&config.log_level);

    tracing::info!(
        service = "tradesync-integrator",
        source_system = %config.source_system_name,
        "starting"
    );

    let source_pool = tradesync_db::create_pool(&config.source_database_url, 4)
        .await
        .expect("failed to connect to source database");
    let status_pool = tradesync_db::create_pool(&config.status_database_url, 4)
        .await
        .expect("failed to connect to status database");

    let client = DestinationClient::new(DestinationClientConfig::from_app_config(&config))
        .expect("failed to create destination client");
    let uom = Arc::new(UomConversionCache::new(Arc::new(
        PgUomConversionRepository::new(source_pool.clone()),
    )));
    let registry = catalog::build_registry(&source_pool, &client, &uom)
        .expect("invalid job catalog");

    let status = Arc::new(PgStatusRepository::new(status_pool.clone()));
    let manager = IntegrationManager::new(
        &config.source_system_name,
        registry,
        status.clone(),
        status,
        Arc::new(PgSettingsRepository::new(status_pool)),
    )
    .with_overrides(config.setting_overrides.clone())
    .with_cache(uom);

    match config.run_interval_secs {
        None => {
            if let Err(e) = run_once(&manager).await {
                tracing::error!(error = %e, "integration run failed");
                std::process::exit(1);
            }
        }
        Some(secs) => run_forever(&manager, Duration::from_secs(secs)).await,
    }
}

async fn run_once(manager: &IntegrationManager) -> TradeSyncResult<()> {
    let report = manager.execute().await?;
    tracing::info!(
        source_system_id = report.source_system_id,
        jobs = report.outcomes.len(),
        resynced = report.resynced.len(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "integration run finished"
    );
    Ok(())
}

/// Repeat runs until Ctrl-C. A failed run is logged and retried on the next tick.
async fn run_forever(manager: &IntegrationManager, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_once(manager).await {
                    tracing::error!(error = %e, "integration run failed, retrying next interval");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }
}
