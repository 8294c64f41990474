use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use transit_alerts::alerts::AlertEngine;
use transit_alerts::config::AppConfig;
use transit_alerts::directory::TransitDirectory;
use transit_alerts::store::PgStore;
use transit_alerts::{db, kafka};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Transit Alerts Service...");

    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    info!("Connected to database");

    if config.run_migrations {
        db::run_migrations(&pool).await?;
        info!("Database migrations applied");
    }

    let store = Arc::new(PgStore::new(pool));

    let engine = Arc::new(
        AlertEngine::new(store.clone())
            .with_default_validity(config.alert_default_validity_minutes)
            .with_purge_retention(config.purge_retention()),
    );
    let directory = Arc::new(TransitDirectory::new(store));

    if config.alert_purge_interval_secs > 0 {
        let engine = engine.clone();
        let every = Duration::from_secs(config.alert_purge_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.purge_expired().await {
                    error!("Alert purge failed: {}", e);
                }
            }
        });
        info!("Expired alert purge every {}s", config.alert_purge_interval_secs);
    }

    if config.kafka_enabled {
        kafka::start_kafka_consumer(&config, directory).await?;
    } else {
        info!("Kafka ingestion disabled; waiting for shutdown signal");
        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
    }

    Ok(())
}
