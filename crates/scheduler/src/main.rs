use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use nudge_common::config::AppConfig;
use nudge_common::db;
use nudge_engine::dispatch::DispatchEngine;
use nudge_engine::failover::{Endpoint, FailoverPolicy};
use nudge_engine::scheduler::SchedulingLoop;
use nudge_engine::store::PgRegistrationStore;
use nudge_notifier::HttpPushProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nudge_scheduler=info,nudge_engine=info,nudge_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Nudge scheduler starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // One provider per configured gateway, primary first
    let timeout = Duration::from_secs(config.push_request_timeout_secs);
    let mut endpoints = Vec::with_capacity(config.push_endpoints.len());
    for host in &config.push_endpoints {
        let provider =
            HttpPushProvider::new(host, &config.push_topic, config.push_auth_token.clone(), timeout)?;
        endpoints.push(Endpoint::new(
            host.clone(),
            Arc::new(provider),
            config.push_retryable_reasons.iter().cloned(),
        ));
        tracing::info!(endpoint = %host, "Push endpoint configured");
    }

    let cancel = CancellationToken::new();
    let store = Arc::new(PgRegistrationStore::new(pool));
    let engine = DispatchEngine::new(
        config.engine(),
        FailoverPolicy::new(endpoints)?,
        store.clone(),
        cancel.clone(),
    );
    let scheduler = SchedulingLoop::new(
        store,
        engine,
        config.delivery_min_hour,
        config.delivery_max_hour,
        config.quiescence(),
    );

    // Stop pending waits on Ctrl+C; the loop exits after the current step
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            shutdown.cancel();
        }
    });

    scheduler
        .run(Duration::from_secs(config.scheduler_interval_secs))
        .await;

    tracing::info!("Nudge scheduler stopped.");
    Ok(())
}
