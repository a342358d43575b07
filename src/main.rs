use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod services;

use config::Config;
use db::{AccountRepository, TWITCH_PROVIDER};
use services::{
    deleter::SubscriptionDeleter,
    helix::{HelixClient, SubscriptionApi},
    init,
    reconcile::ReconciliationJob,
    refresh::{RefreshFlagBatcher, SqliteAccountStore},
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "eventsub_reconciler=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM, waiting for Ctrl+C only: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;

    tracing::info!("Starting EventSub reconciler");

    let pool = init::init_db(&config).await?;

    let api: Arc<dyn SubscriptionApi> = Arc::new(HelixClient::new(&config.twitch)?);
    let deleter = Arc::new(SubscriptionDeleter::new(api.clone(), config.deleter.clone()));

    // The batcher stops after the reconciliation worker so late marks still get flushed.
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let (flush_tx, _flush_rx) = tokio::sync::broadcast::channel::<()>(1);
    let (refresh, refresh_handle) = RefreshFlagBatcher::spawn(
        Arc::new(SqliteAccountStore::new(pool.clone())),
        config.refresh.clone(),
        flush_tx.clone(),
    );

    let job = Arc::new(ReconciliationJob::new(api, deleter, refresh));

    match config.reconcile.interval_seconds {
        Some(interval) => {
            tracing::info!("Running reconciliation every {}s", interval);
            let worker = init::spawn_reconcile_worker(
                job.clone(),
                config.reconcile.clone(),
                interval,
                shutdown_tx.clone(),
            );

            shutdown_signal().await;
            tracing::info!("Shutdown signal received; waiting for the current run to finish");
            let _ = shutdown_tx.send(());
            if let Err(e) = worker.await {
                tracing::error!("Reconciliation worker panicked: {}", e);
            }
        }
        None => {
            init::run_reconciliation(&job, &config.reconcile).await;
        }
    }

    // The batcher does a final flush on shutdown.
    let _ = flush_tx.send(());
    if tokio::time::timeout(Duration::from_secs(30), refresh_handle)
        .await
        .is_err()
    {
        tracing::warn!("Timed out waiting for the refresh batcher to flush");
    }

    match AccountRepository::list_requiring_refresh(&pool, TWITCH_PROVIDER).await {
        Ok(accounts) => tracing::info!(
            "{} Twitch account(s) currently flagged for credential refresh",
            accounts.len()
        ),
        Err(e) => tracing::warn!("Failed to count accounts flagged for refresh: {}", e),
    }

    tracing::info!("EventSub reconciler stopped");
    Ok(())
}
