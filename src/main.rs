use anyhow::Result;
use pricekeeper::config::AppConfig;
use pricekeeper::engine::FeedEngine;
use pricekeeper::poller::PricePoller;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args().nth(1);
    let config = AppConfig::load(config_path.as_deref())?;
    info!(
        assets = config.engine.assets.len(),
        venues = config.venues.enabled_venues().len(),
        "starting pricekeeper"
    );

    let (mut engine, mut alerts) = FeedEngine::new(&config)?;

    let _staleness = engine.start_staleness_watchdog(
        Duration::from_millis(config.engine.stale_check_interval_ms),
        chrono::Duration::milliseconds(config.engine.stale_after_ms as i64),
    );

    let _poller = if config.poller.enabled {
        Some(PricePoller::new(config.poller.clone(), config.assets(), engine.prices())?.start())
    } else {
        None
    };

    tokio::spawn(async move {
        while let Some(alert) = alerts.recv().await {
            warn!(
                asset = %alert.asset,
                median = %alert.median_price,
                reference = %alert.reference_price,
                "median deviates from reference"
            );
        }
    });

    engine.start();

    tokio::select! {
        _ = engine.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            engine.shutdown();
        }
    }

    // drain the final close events from the winding-down sessions
    let _ = tokio::time::timeout(Duration::from_secs(2), engine.run()).await;
    info!("stopped");
    Ok(())
}
