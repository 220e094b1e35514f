//! Steeple drain worker binary entrypoint.
//!
//! Runs the scheduled drain on a fixed interval. Deployments that trigger
//! drains from an external scheduler instead should call the API server's
//! `POST /api/notifications/process-due` endpoint and skip this binary.

use std::time::Duration;

use steeple_common::config::AppConfig;
use steeple_common::db;
use steeple_dispatch::processor::DrainProcessor;
use steeple_dispatch::provider::PushClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "steeple_dispatch=info".into()),
        )
        .json()
        .init();

    tracing::info!("Steeple drain worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let client = PushClient::new(&config)?;
    let processor = DrainProcessor::new(pool, client, config.drain_batch_size);

    tracing::info!(
        interval_secs = config.drain_interval_secs,
        batch_size = config.drain_batch_size,
        "Starting drain loop"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.drain_interval_secs));

    // Run with graceful shutdown on Ctrl+C
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match processor.run_once().await {
                    Ok(summary) => {
                        if summary.fetched > 0 {
                            tracing::info!(
                                sent = summary.sent,
                                failed = summary.failed,
                                skipped = summary.skipped,
                                "Drain pass finished"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Drain pass failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                break;
            }
        }
    }

    tracing::info!("Steeple drain worker stopped.");
    Ok(())
}
